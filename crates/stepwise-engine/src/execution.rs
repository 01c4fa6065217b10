//! Live event sequence of one streamed execution.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::stream::{StreamEvent, StreamPart};
use stepwise_core::traits::EventSink;
use stepwise_core::types::{ExecutionId, ExecutionRecord};

use crate::stream::to_stream_part;

/// One item of an execution's event sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    StepStart {
        execution_id: ExecutionId,
        step_id: String,
        timestamp: String,
    },
    StepComplete {
        execution_id: ExecutionId,
        step_id: String,
        output: Value,
        timestamp: String,
    },
    StepSuspended {
        execution_id: ExecutionId,
        step_id: Option<String>,
        reason: Option<String>,
        timestamp: String,
    },
    /// A forwarded sub-agent event in wire form.
    Part(StreamPart),
}

impl ExecutionEvent {
    pub fn step_start(execution_id: &ExecutionId, step_id: &str) -> Self {
        Self::StepStart {
            execution_id: execution_id.clone(),
            step_id: step_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn step_complete(execution_id: &ExecutionId, step_id: &str, output: Value) -> Self {
        Self::StepComplete {
            execution_id: execution_id.clone(),
            step_id: step_id.to_string(),
            output,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn step_suspended(
        execution_id: &ExecutionId,
        step_id: Option<String>,
        reason: Option<String>,
    ) -> Self {
        Self::StepSuspended {
            execution_id: execution_id.clone(),
            step_id,
            reason,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Wire tag, also used as the SSE event name.
    pub fn event_type(&self) -> &str {
        match self {
            Self::StepStart { .. } => "step-start",
            Self::StepComplete { .. } => "step-complete",
            Self::StepSuspended { .. } => "step-suspended",
            Self::Part(part) => part.part_type(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::StepStart {
                execution_id,
                step_id,
                timestamp,
            } => json!({
                "type": self.event_type(),
                "executionId": execution_id,
                "stepId": step_id,
                "timestamp": timestamp,
            }),
            Self::StepComplete {
                execution_id,
                step_id,
                output,
                timestamp,
            } => json!({
                "type": self.event_type(),
                "executionId": execution_id,
                "stepId": step_id,
                "output": output,
                "timestamp": timestamp,
            }),
            Self::StepSuspended {
                execution_id,
                step_id,
                reason,
                timestamp,
            } => json!({
                "type": self.event_type(),
                "executionId": execution_id,
                "stepId": step_id,
                "reason": reason,
                "timestamp": timestamp,
            }),
            Self::Part(part) => part.to_value(),
        }
    }
}

impl Serialize for ExecutionEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Producer half of an execution's event sequence.
///
/// Shared by the runner and, through the forwarder, by sub-agents. Once
/// closed, every send is refused.
#[derive(Clone)]
pub struct ExecutionChannel {
    sender: Arc<Mutex<Option<mpsc::Sender<ExecutionEvent>>>>,
}

impl ExecutionChannel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Deliver an event, waiting for buffer space. Returns false once the
    /// channel is closed or the consumer went away.
    pub async fn send(&self, event: ExecutionEvent) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match sender {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Stop accepting events. The consumer sees end-of-sequence after
    /// draining what is buffered.
    pub fn close(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map_or(true, |tx| tx.is_closed())
    }
}

impl EventSink for ExecutionChannel {
    fn send(&self, event: StreamEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let part = to_stream_part(&event);
            if ExecutionChannel::send(self, ExecutionEvent::Part(part)).await {
                Ok(())
            } else {
                Err(StepwiseError::Stream("execution stream closed".into()))
            }
        })
    }
}

/// Consumer half of a streamed execution.
pub struct WorkflowStream {
    execution_id: ExecutionId,
    workflow_id: String,
    events: mpsc::Receiver<ExecutionEvent>,
    outcome: oneshot::Receiver<Result<ExecutionRecord>>,
}

impl WorkflowStream {
    pub(crate) fn new(
        execution_id: ExecutionId,
        workflow_id: String,
        events: mpsc::Receiver<ExecutionEvent>,
        outcome: oneshot::Receiver<Result<ExecutionRecord>>,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            events,
            outcome,
        }
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Next event, or `None` once the run has terminated and the buffer is drained.
    pub async fn next_event(&mut self) -> Option<ExecutionEvent> {
        self.events.recv().await
    }

    /// Final record of the run, or the error that ended it. Undelivered
    /// events are discarded so the runner never waits on buffer space.
    pub async fn outcome(self) -> Result<ExecutionRecord> {
        let Self {
            events, outcome, ..
        } = self;
        drop(events);
        resolve(outcome).await
    }

    /// Drain the remaining events, then resolve the outcome.
    pub async fn collect(mut self) -> (Vec<ExecutionEvent>, Result<ExecutionRecord>) {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        (events, self.outcome().await)
    }

    /// Split into an event stream and the deferred outcome.
    pub fn into_parts(self) -> (ReceiverStream<ExecutionEvent>, Outcome) {
        (ReceiverStream::new(self.events), Outcome(self.outcome))
    }

    /// Event sequence as a `futures::Stream`, discarding the outcome.
    pub fn into_stream(self) -> ReceiverStream<ExecutionEvent> {
        ReceiverStream::new(self.events)
    }
}

/// Deferred final record of a streamed execution.
pub struct Outcome(oneshot::Receiver<Result<ExecutionRecord>>);

impl Outcome {
    pub async fn wait(self) -> Result<ExecutionRecord> {
        resolve(self.0).await
    }
}

async fn resolve(rx: oneshot::Receiver<Result<ExecutionRecord>>) -> Result<ExecutionRecord> {
    rx.await
        .map_err(|_| StepwiseError::Stream("execution task ended without an outcome".into()))?
}
