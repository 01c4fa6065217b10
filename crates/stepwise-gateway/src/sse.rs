use std::convert::Infallible;
use std::pin::Pin;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use stepwise_core::error::Result;
use stepwise_core::types::ExecutionRecord;
use stepwise_engine::WorkflowStream;

use crate::protocol::ApiError;

pub type SseStream = Pin<Box<dyn tokio_stream::Stream<Item = std::result::Result<Event, Infallible>> + Send>>;

const RELAY_BUFFER: usize = 64;

fn frame(kind: &str, data: &Value) -> Event {
    Event::default().event(kind).data(data.to_string())
}

/// Terminal message of a finished run.
pub fn result_message(record: &ExecutionRecord) -> Value {
    let end_at = record
        .ended_at
        .or_else(|| record.suspension.as_ref().map(|s| s.suspended_at));
    json!({
        "type": "workflow-result",
        "executionId": record.execution_id,
        "status": record.status,
        "result": record.result,
        "endAt": end_at,
    })
}

/// Terminal message of a failed run.
pub fn error_message(err: ApiError) -> Value {
    let mut body = err.body();
    if let Value::Object(map) = &mut body {
        map.insert("type".into(), Value::String("error".into()));
    }
    body
}

/// SSE response carrying a single error message.
pub fn failed(err: ApiError) -> Response {
    let event = frame("error", &error_message(err));
    let stream: SseStream = Box::pin(tokio_stream::once(Ok::<_, Infallible>(event)));
    Sse::new(stream).into_response()
}

/// Relay an execution's events, then its result or error, as SSE messages.
pub fn relay(mut stream: WorkflowStream) -> Response {
    let (tx, rx) = mpsc::channel::<std::result::Result<Event, Infallible>>(RELAY_BUFFER);
    let execution_id = stream.execution_id().clone();

    tokio::spawn(async move {
        let mut connected = true;
        while let Some(event) = stream.next_event().await {
            if tx
                .send(Ok(frame(event.event_type(), &event.to_value())))
                .await
                .is_err()
            {
                connected = false;
                break;
            }
        }
        if !connected {
            debug!(execution_id = %execution_id, "SSE client disconnected; execution continues");
            return;
        }

        let outcome: Result<ExecutionRecord> = stream.outcome().await;
        let last = match outcome {
            Ok(record) => frame("workflow-result", &result_message(&record)),
            Err(e) => frame("error", &error_message(ApiError::from(e))),
        };
        let _ = tx.send(Ok(last)).await;
    });

    let stream: SseStream = Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx));
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}
