use serde_json::{Map, Value};

use stepwise_core::stream::{StreamEvent, StreamEventKind, StreamPart, SubAgentOrigin};

/// Map a sub-agent event onto its canonical wire part.
///
/// Total and pure: missing `data` fields come out absent, and unknown tags
/// spread their whole `data` object next to the identity fields.
pub fn to_stream_part(event: &StreamEvent) -> StreamPart {
    let origin = SubAgentOrigin::of(event);
    let field = |key: &str| event.data_field(key).cloned();

    match event.kind() {
        Some(StreamEventKind::TextDelta) => StreamPart::TextDelta {
            text_delta: field("textDelta"),
            origin,
        },
        Some(StreamEventKind::Reasoning) => StreamPart::Reasoning {
            reasoning: field("reasoning"),
            origin,
        },
        Some(StreamEventKind::Source) => StreamPart::Source {
            source: field("source"),
            origin,
        },
        Some(StreamEventKind::ToolCall) => StreamPart::ToolCall {
            tool_call_id: field("toolCallId"),
            tool_name: field("toolName"),
            args: field("args"),
            origin,
        },
        Some(StreamEventKind::ToolResult) => StreamPart::ToolResult {
            tool_call_id: field("toolCallId"),
            tool_name: field("toolName"),
            result: field("result"),
            origin,
        },
        Some(StreamEventKind::Finish) => StreamPart::Finish {
            finish_reason: field("finishReason"),
            usage: field("usage"),
            origin,
        },
        Some(StreamEventKind::Error) => StreamPart::Error {
            error: field("error"),
            origin,
        },
        None => StreamPart::Other {
            part_type: event.event_type.clone(),
            fields: spread(event.data.as_ref()),
            origin,
        },
    }
}

fn spread(data: Option<&Value>) -> Map<String, Value> {
    match data {
        Some(Value::Object(map)) => map.clone(),
        // Non-object payloads have no keys to hoist.
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: &str, data: Option<Value>) -> StreamEvent {
        StreamEvent {
            event_type: kind.into(),
            sub_agent_id: "agent-1".into(),
            sub_agent_name: "Researcher".into(),
            timestamp: "2026-03-01T12:00:00Z".into(),
            data,
        }
    }

    #[test]
    fn test_text_delta_hoisted() {
        let part = to_stream_part(&event("text-delta", Some(json!({"textDelta": "Hel"}))));
        assert_eq!(
            part.to_value(),
            json!({
                "type": "text-delta",
                "textDelta": "Hel",
                "subAgentId": "agent-1",
                "subAgentName": "Researcher",
                "timestamp": "2026-03-01T12:00:00Z",
            })
        );
    }

    #[test]
    fn test_tool_call_hoisted() {
        let part = to_stream_part(&event(
            "tool-call",
            Some(json!({
                "toolCallId": "c1",
                "toolName": "Researcher: search",
                "args": {"q": "rust"},
            })),
        ));
        let value = part.to_value();
        assert_eq!(value["toolCallId"], "c1");
        assert_eq!(value["toolName"], "Researcher: search");
        assert_eq!(value["args"], json!({"q": "rust"}));
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_finish_and_error() {
        let finish = to_stream_part(&event(
            "finish",
            Some(json!({"finishReason": "stop", "usage": {"totalTokens": 12}})),
        ));
        assert_eq!(finish.to_value()["finishReason"], "stop");
        assert_eq!(finish.to_value()["usage"]["totalTokens"], 12);

        let error = to_stream_part(&event("error", Some(json!({"error": "timeout"}))));
        assert_eq!(error.to_value()["error"], "timeout");
    }

    #[test]
    fn test_missing_fields_are_absent() {
        let part = to_stream_part(&event("tool-result", None));
        let value = part.to_value();
        assert_eq!(value["type"], "tool-result");
        assert!(value.get("toolName").is_none());
        assert!(value.get("result").is_none());
        assert_eq!(value["subAgentName"], "Researcher");
    }

    #[test]
    fn test_deterministic() {
        let e = event("reasoning", Some(json!({"reasoning": "first, ..."})));
        assert_eq!(to_stream_part(&e), to_stream_part(&e));
        assert_eq!(to_stream_part(&e).to_value(), to_stream_part(&e).to_value());
    }

    #[test]
    fn test_unknown_type_flattens_data() {
        let part = to_stream_part(&event(
            "object-delta",
            Some(json!({"object": {"title": "Dra"}, "index": 3})),
        ));
        assert_eq!(
            part.to_value(),
            json!({
                "type": "object-delta",
                "object": {"title": "Dra"},
                "index": 3,
                "subAgentId": "agent-1",
                "subAgentName": "Researcher",
                "timestamp": "2026-03-01T12:00:00Z",
            })
        );
    }

    #[test]
    fn test_unknown_type_with_empty_data_has_no_data_field() {
        for data in [None, Some(json!({})), Some(Value::Null)] {
            let value = to_stream_part(&event("step-note", data)).to_value();
            assert_eq!(
                value,
                json!({
                    "type": "step-note",
                    "subAgentId": "agent-1",
                    "subAgentName": "Researcher",
                    "timestamp": "2026-03-01T12:00:00Z",
                })
            );
        }
    }

    #[test]
    fn test_identity_not_overridden_by_data() {
        let value = to_stream_part(&event(
            "custom",
            Some(json!({"subAgentId": "spoofed", "note": "x"})),
        ))
        .to_value();
        assert_eq!(value["subAgentId"], "agent-1");
        assert_eq!(value["note"], "x");
    }
}
