//! Mocks and fixtures shared by the Stepwise test suites.

use std::path::PathBuf;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use serde_json::Value;

use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::provider::{
    FinishReason, GenerationChunk, GenerationRequest, ObjectGeneration, ProviderStage,
    TextGeneration, TokenUsage,
};
use stepwise_core::stream::StreamEvent;
use stepwise_core::traits::{EventSink, ExecutionStore, GenerationProvider};
use stepwise_core::types::{ExecutionId, ExecutionRecord};

pub use stepwise_memory::MemoryExecutionStore;

/// Deterministic provider that replays a fixed chunk script.
pub struct ScriptedProvider {
    chunks: Vec<GenerationChunk>,
    /// Fail with this status code after emitting this many chunks.
    failure: Option<(usize, u16)>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    pub fn new(chunks: Vec<GenerationChunk>) -> Self {
        Self {
            chunks,
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers `text` in one delta.
    pub fn text(text: &str) -> Self {
        Self::new(vec![
            GenerationChunk::TextDelta(text.to_string()),
            GenerationChunk::Finish {
                reason: FinishReason::Stop,
                usage: TokenUsage::new(8, text.len() as u64),
            },
        ])
    }

    pub fn failing_after(mut self, chunks: usize, status_code: u16) -> Self {
        self.failure = Some((chunks, status_code));
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, request: GenerationRequest) {
        self.requests.lock().unwrap().push(request);
    }

    fn error(&self, stage: ProviderStage, status_code: u16) -> StepwiseError {
        StepwiseError::Provider {
            message: format!("scripted failure ({status_code})"),
            stage,
            status_code: Some(status_code),
        }
    }

    fn script(&self, stage: ProviderStage) -> BoxStream<'_, Result<GenerationChunk>> {
        let mut items: Vec<Result<GenerationChunk>> = Vec::new();
        match self.failure {
            Some((after, status)) => {
                items.extend(self.chunks.iter().take(after).cloned().map(Ok));
                items.push(Err(self.error(stage, status)));
            }
            None => items.extend(self.chunks.iter().cloned().map(Ok)),
        }
        Box::pin(stream::iter(items))
    }

    fn usage(&self) -> (TokenUsage, FinishReason) {
        let mut usage = TokenUsage::default();
        let mut reason = FinishReason::Stop;
        for chunk in &self.chunks {
            if let GenerationChunk::Finish { reason: r, usage: u } = chunk {
                usage.add(u);
                reason = r.clone();
            }
        }
        (usage, reason)
    }
}

impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate_text(&self, request: GenerationRequest) -> BoxFuture<'_, Result<TextGeneration>> {
        self.record(request);
        Box::pin(async move {
            if let Some((_, status)) = self.failure {
                return Err(self.error(ProviderStage::TextGeneration, status));
            }
            let text: String = self
                .chunks
                .iter()
                .filter_map(|c| match c {
                    GenerationChunk::TextDelta(t) => Some(t.as_str()),
                    _ => None,
                })
                .collect();
            let (usage, finish_reason) = self.usage();
            Ok(TextGeneration {
                text,
                usage,
                finish_reason,
            })
        })
    }

    fn stream_text(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<GenerationChunk>>>> {
        self.record(request);
        Box::pin(async move { Ok(self.script(ProviderStage::Streaming)) })
    }

    fn generate_object(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<ObjectGeneration>> {
        self.record(request);
        Box::pin(async move {
            if let Some((_, status)) = self.failure {
                return Err(self.error(ProviderStage::ObjectGeneration, status));
            }
            let object = self
                .chunks
                .iter()
                .rev()
                .find_map(|c| match c {
                    GenerationChunk::ObjectDelta(v) => Some(v.clone()),
                    _ => None,
                })
                .unwrap_or(Value::Null);
            let (usage, finish_reason) = self.usage();
            Ok(ObjectGeneration {
                object,
                usage,
                finish_reason,
            })
        })
    }

    fn stream_object(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<GenerationChunk>>>> {
        self.record(request);
        Box::pin(async move { Ok(self.script(ProviderStage::ObjectStreaming)) })
    }
}

/// Sink that keeps every event it receives, or refuses them all.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StreamEvent>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn send(&self, event: StreamEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.fail {
                return Err(StepwiseError::Stream("recording sink refused event".into()));
            }
            self.events.lock().unwrap().push(event);
            Ok(())
        })
    }
}

/// Store whose every operation fails.
pub struct FailingExecutionStore;

impl ExecutionStore for FailingExecutionStore {
    fn save(&self, _record: &ExecutionRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Err(StepwiseError::Database("disk full".into())) })
    }

    fn load(&self, _execution_id: &ExecutionId) -> BoxFuture<'_, Result<Option<ExecutionRecord>>> {
        Box::pin(async { Err(StepwiseError::Database("disk full".into())) })
    }

    fn list_by_workflow(&self, _workflow_id: &str) -> BoxFuture<'_, Result<Vec<ExecutionRecord>>> {
        Box::pin(async { Err(StepwiseError::Database("disk full".into())) })
    }
}

/// Write `contents` to a `stepwise.toml` in a fresh temp dir.
pub fn temp_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stepwise.toml");
    std::fs::write(&path, contents).unwrap();
    (dir, path)
}

/// Config text pointing the store at `db_path` and the gateway at `bind`.
pub fn config_toml(bind: &str, db_path: &std::path::Path) -> String {
    let mut store = toml::Table::new();
    store.insert(
        "path".into(),
        toml::Value::String(db_path.display().to_string()),
    );
    let mut gateway = toml::Table::new();
    gateway.insert("bind".into(), toml::Value::String(bind.to_string()));

    let mut root = toml::Table::new();
    root.insert("store".into(), toml::Value::Table(store));
    root.insert("gateway".into(), toml::Value::Table(gateway));
    toml::to_string(&root).unwrap()
}
