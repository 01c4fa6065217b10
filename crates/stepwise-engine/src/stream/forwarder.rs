use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use stepwise_core::config::EngineConfig;
use stepwise_core::stream::StreamEvent;
use stepwise_core::traits::EventSink;

/// Forwarding policy.
#[derive(Debug, Clone)]
pub struct ForwardOptions {
    /// Allow-list of event types. Empty forwards nothing.
    pub types: HashSet<String>,
    /// Rewrite tool names as `"{subAgentName}: {toolName}"`.
    pub add_sub_agent_prefix: bool,
}

impl Default for ForwardOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl ForwardOptions {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            add_sub_agent_prefix: true,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            types: config.forwarded_types.iter().cloned().collect(),
            add_sub_agent_prefix: config.add_sub_agent_prefix,
        }
    }

    pub fn with_prefix(mut self, add_sub_agent_prefix: bool) -> Self {
        self.add_sub_agent_prefix = add_sub_agent_prefix;
        self
    }
}

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Forwarded,
    /// Malformed: not an object, or missing identity/type.
    Rejected,
    /// Type not in the allow-list.
    Filtered,
    /// The sink failed; the failure was logged and swallowed.
    SinkFailed,
}

/// Validates, filters, and prefixes sub-agent events before handing them to a sink.
#[derive(Clone)]
pub struct EventForwarder {
    options: ForwardOptions,
    sink: Arc<dyn EventSink>,
}

impl EventForwarder {
    pub fn new(sink: Arc<dyn EventSink>, options: ForwardOptions) -> Self {
        Self { options, sink }
    }

    pub fn options(&self) -> &ForwardOptions {
        &self.options
    }

    /// Forward a raw, untrusted event.
    pub async fn forward(&self, raw: &Value) -> ForwardOutcome {
        forward(raw, &self.options, self.sink.as_ref()).await
    }

    /// Forward an event built in-process.
    pub async fn forward_event(&self, event: StreamEvent) -> ForwardOutcome {
        forward_event(event, &self.options, self.sink.as_ref()).await
    }
}

/// Forward a raw event: validate its shape, then apply [`forward_event`].
pub async fn forward(raw: &Value, options: &ForwardOptions, sink: &dyn EventSink) -> ForwardOutcome {
    match parse_event(raw) {
        Ok(event) => forward_event(event, options, sink).await,
        Err(problem) => {
            warn!(problem, "Dropping malformed stream event");
            ForwardOutcome::Rejected
        }
    }
}

/// Filter, prefix, and deliver one event. Never fails.
pub async fn forward_event(
    mut event: StreamEvent,
    options: &ForwardOptions,
    sink: &dyn EventSink,
) -> ForwardOutcome {
    if event.event_type.is_empty() || event.sub_agent_id.is_empty() || event.sub_agent_name.is_empty()
    {
        warn!(
            event_type = %event.event_type,
            "Dropping stream event without type or sub-agent identity"
        );
        return ForwardOutcome::Rejected;
    }

    if !options.types.contains(&event.event_type) {
        debug!(event_type = %event.event_type, "Stream event type not forwarded");
        return ForwardOutcome::Filtered;
    }

    if event.is_tool_event() {
        apply_tool_prefix(&mut event, options.add_sub_agent_prefix);
    }

    let event_type = event.event_type.clone();
    let delivery = AssertUnwindSafe(sink.send(event)).catch_unwind().await;
    match delivery {
        Ok(Ok(())) => ForwardOutcome::Forwarded,
        Ok(Err(e)) => {
            warn!(event_type = %event_type, error = %e, "Stream sink failed, event dropped");
            ForwardOutcome::SinkFailed
        }
        Err(_) => {
            warn!(event_type = %event_type, "Stream sink panicked, event dropped");
            ForwardOutcome::SinkFailed
        }
    }
}

fn apply_tool_prefix(event: &mut StreamEvent, add_prefix: bool) {
    let tool_name = event
        .data_field("toolName")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    match tool_name {
        Some(name) if add_prefix => {
            let prefixed = format!("{}: {}", event.sub_agent_name, name);
            if let Some(Value::Object(data)) = event.data.as_mut() {
                data.insert("toolName".into(), Value::String(prefixed));
            }
        }
        Some(_) => {}
        None => event.data = None,
    }
}

fn parse_event(raw: &Value) -> Result<StreamEvent, &'static str> {
    let obj = raw.as_object().ok_or("event is not an object")?;

    let text = |key: &str| obj.get(key).and_then(Value::as_str).filter(|s| !s.is_empty());
    let event_type = text("type").ok_or("missing type")?;
    let sub_agent_id = text("subAgentId").ok_or("missing subAgentId")?;
    let sub_agent_name = text("subAgentName").ok_or("missing subAgentName")?;

    let timestamp = match obj.get("timestamp") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => Utc::now().to_rfc3339(),
    };
    let data = match obj.get("data") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.clone()),
    };

    Ok(StreamEvent {
        event_type: event_type.to_string(),
        sub_agent_id: sub_agent_id.to_string(),
        sub_agent_name: sub_agent_name.to_string(),
        timestamp,
        data,
    })
}
