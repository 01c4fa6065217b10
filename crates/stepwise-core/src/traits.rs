use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::provider::{GenerationChunk, GenerationRequest, ObjectGeneration, TextGeneration};
use crate::stream::StreamEvent;
use crate::types::{ExecutionId, ExecutionRecord};

/// Text and object generation against a model vendor.
pub trait GenerationProvider: Send + Sync + 'static {
    /// Provider name (e.g., "anthropic", "scripted").
    fn name(&self) -> &str;

    /// Generate a complete text response.
    fn generate_text(&self, request: GenerationRequest) -> BoxFuture<'_, Result<TextGeneration>>;

    /// Stream a text response. Each generation step ends with a `Finish` chunk.
    fn stream_text(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<GenerationChunk>>>>;

    /// Generate an object conforming to `request.schema`.
    fn generate_object(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<ObjectGeneration>>;

    /// Stream partial objects conforming to `request.schema`.
    fn stream_object(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<GenerationChunk>>>>;
}

/// Persistence backend for execution records.
pub trait ExecutionStore: Send + Sync + 'static {
    /// Insert or replace the record for its execution ID.
    fn save(&self, record: &ExecutionRecord) -> BoxFuture<'_, Result<()>>;

    /// Load a record by execution ID.
    fn load(&self, execution_id: &ExecutionId) -> BoxFuture<'_, Result<Option<ExecutionRecord>>>;

    /// List records of one workflow, most recently started first.
    fn list_by_workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<Vec<ExecutionRecord>>>;
}

/// Downstream consumer of forwarded sub-agent events.
pub trait EventSink: Send + Sync + 'static {
    /// Deliver one event. Errors are contained by the caller.
    fn send(&self, event: StreamEvent) -> BoxFuture<'_, Result<()>>;
}
