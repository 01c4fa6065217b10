//! Sub-agent progress events and their flattened wire form.

use chrono::Utc;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Event tags with a dedicated wire shape. Any other tag is carried verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEventKind {
    TextDelta,
    Reasoning,
    Source,
    ToolCall,
    ToolResult,
    Finish,
    Error,
}

impl StreamEventKind {
    pub const ALL: [StreamEventKind; 7] = [
        Self::TextDelta,
        Self::Reasoning,
        Self::Source,
        Self::ToolCall,
        Self::ToolResult,
        Self::Finish,
        Self::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextDelta => "text-delta",
            Self::Reasoning => "reasoning",
            Self::Source => "source",
            Self::ToolCall => "tool-call",
            Self::ToolResult => "tool-result",
            Self::Finish => "finish",
            Self::Error => "error",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

/// A progress event raised by a sub-agent while a step runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub sub_agent_id: String,
    pub sub_agent_name: String,
    pub timestamp: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl StreamEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        kind: impl Into<String>,
        sub_agent_id: impl Into<String>,
        sub_agent_name: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            event_type: kind.into(),
            sub_agent_id: sub_agent_id.into(),
            sub_agent_name: sub_agent_name.into(),
            timestamp: Utc::now().to_rfc3339(),
            data,
        }
    }

    pub fn kind(&self) -> Option<StreamEventKind> {
        StreamEventKind::from_tag(&self.event_type)
    }

    /// Read a field from `data`, if `data` is an object holding it.
    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }

    /// Whether this is a tool-call or tool-result event.
    pub fn is_tool_event(&self) -> bool {
        matches!(
            self.kind(),
            Some(StreamEventKind::ToolCall | StreamEventKind::ToolResult)
        )
    }
}

/// Identity fields carried by every stream part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAgentOrigin {
    pub sub_agent_id: String,
    pub sub_agent_name: String,
    pub timestamp: String,
}

impl SubAgentOrigin {
    pub fn of(event: &StreamEvent) -> Self {
        Self {
            sub_agent_id: event.sub_agent_id.clone(),
            sub_agent_name: event.sub_agent_name.clone(),
            timestamp: event.timestamp.clone(),
        }
    }
}

/// Canonical wire form of a [`StreamEvent`]: same tag, `data` hoisted to the
/// top level. Fields absent from the source event stay absent.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    TextDelta {
        text_delta: Option<Value>,
        origin: SubAgentOrigin,
    },
    Reasoning {
        reasoning: Option<Value>,
        origin: SubAgentOrigin,
    },
    Source {
        source: Option<Value>,
        origin: SubAgentOrigin,
    },
    ToolCall {
        tool_call_id: Option<Value>,
        tool_name: Option<Value>,
        args: Option<Value>,
        origin: SubAgentOrigin,
    },
    ToolResult {
        tool_call_id: Option<Value>,
        tool_name: Option<Value>,
        result: Option<Value>,
        origin: SubAgentOrigin,
    },
    Finish {
        finish_reason: Option<Value>,
        usage: Option<Value>,
        origin: SubAgentOrigin,
    },
    Error {
        error: Option<Value>,
        origin: SubAgentOrigin,
    },
    /// Unrecognized tag: every `data` key spread at the top level.
    Other {
        part_type: String,
        fields: Map<String, Value>,
        origin: SubAgentOrigin,
    },
}

impl StreamPart {
    pub fn part_type(&self) -> &str {
        match self {
            Self::TextDelta { .. } => StreamEventKind::TextDelta.as_str(),
            Self::Reasoning { .. } => StreamEventKind::Reasoning.as_str(),
            Self::Source { .. } => StreamEventKind::Source.as_str(),
            Self::ToolCall { .. } => StreamEventKind::ToolCall.as_str(),
            Self::ToolResult { .. } => StreamEventKind::ToolResult.as_str(),
            Self::Finish { .. } => StreamEventKind::Finish.as_str(),
            Self::Error { .. } => StreamEventKind::Error.as_str(),
            Self::Other { part_type, .. } => part_type,
        }
    }

    pub fn origin(&self) -> &SubAgentOrigin {
        match self {
            Self::TextDelta { origin, .. }
            | Self::Reasoning { origin, .. }
            | Self::Source { origin, .. }
            | Self::ToolCall { origin, .. }
            | Self::ToolResult { origin, .. }
            | Self::Finish { origin, .. }
            | Self::Error { origin, .. }
            | Self::Other { origin, .. } => origin,
        }
    }

    /// Flattened JSON object as sent on the wire.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        let put = |map: &mut Map<String, Value>, key: &str, value: &Option<Value>| {
            if let Some(v) = value {
                map.insert(key.to_string(), v.clone());
            }
        };
        match self {
            Self::TextDelta { text_delta, .. } => put(&mut map, "textDelta", text_delta),
            Self::Reasoning { reasoning, .. } => put(&mut map, "reasoning", reasoning),
            Self::Source { source, .. } => put(&mut map, "source", source),
            Self::ToolCall {
                tool_call_id,
                tool_name,
                args,
                ..
            } => {
                put(&mut map, "toolCallId", tool_call_id);
                put(&mut map, "toolName", tool_name);
                put(&mut map, "args", args);
            }
            Self::ToolResult {
                tool_call_id,
                tool_name,
                result,
                ..
            } => {
                put(&mut map, "toolCallId", tool_call_id);
                put(&mut map, "toolName", tool_name);
                put(&mut map, "result", result);
            }
            Self::Finish {
                finish_reason,
                usage,
                ..
            } => {
                put(&mut map, "finishReason", finish_reason);
                put(&mut map, "usage", usage);
            }
            Self::Error { error, .. } => put(&mut map, "error", error),
            Self::Other { fields, .. } => {
                for (k, v) in fields {
                    map.insert(k.clone(), v.clone());
                }
            }
        }

        // Tag and identity fields win over same-named data keys.
        map.insert("type".into(), Value::String(self.part_type().to_string()));
        let origin = self.origin();
        map.insert("subAgentId".into(), Value::String(origin.sub_agent_id.clone()));
        map.insert(
            "subAgentName".into(),
            Value::String(origin.sub_agent_name.clone()),
        );
        map.insert("timestamp".into(), Value::String(origin.timestamp.clone()));
        Value::Object(map)
    }
}

impl Serialize for StreamPart {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}
