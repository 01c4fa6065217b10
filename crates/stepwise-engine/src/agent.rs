//! Steps backed by a generation provider.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::provider::{
    ChatMessage, FinishReason, GenerationChunk, GenerationRequest, ProviderOptions, ProviderStage,
    TokenUsage, ToolDefinition,
};
use stepwise_core::stream::StreamEvent;
use stepwise_core::traits::GenerationProvider;

use crate::step::{Step, StepContext};
use crate::stream::EventEmitter;

/// An agent invoked from a workflow step. Its progress is tagged with its
/// own identity so consumers can tell nested agents apart.
pub struct SubAgent {
    pub id: String,
    pub name: String,
    pub instructions: Option<String>,
    pub options: ProviderOptions,
    pub tools: Vec<ToolDefinition>,
    provider: Arc<dyn GenerationProvider>,
}

/// Collected result of one streamed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub text: String,
    pub object: Option<Value>,
    pub usage: TokenUsage,
    pub finish_reason: Option<FinishReason>,
}

impl SubAgent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: Arc<dyn GenerationProvider>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            instructions: None,
            options: ProviderOptions::default(),
            tools: Vec::new(),
            provider,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_options(mut self, options: ProviderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    fn request(&self, prompt: String) -> GenerationRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(instructions) = &self.instructions {
            messages.push(ChatMessage::system(instructions.clone()));
        }
        messages.push(ChatMessage::user(prompt));
        GenerationRequest::new(messages)
            .with_tools(self.tools.clone())
            .with_options(self.options.clone())
    }

    /// Stream a text generation, publishing every chunk through `emitter`.
    pub async fn stream_text(&self, prompt: String, emitter: &EventEmitter) -> Result<AgentReply> {
        let request = self.request(prompt);
        let stream = self
            .provider
            .stream_text(request)
            .await
            .map_err(|e| self.provider_error(e, ProviderStage::Streaming));
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => return Err(self.report(e, emitter).await),
        };
        self.drain(stream, emitter, ProviderStage::Streaming).await
    }

    /// Stream an object generation against `schema`; the last partial object wins.
    pub async fn stream_object(
        &self,
        prompt: String,
        schema: Value,
        emitter: &EventEmitter,
    ) -> Result<AgentReply> {
        let request = self.request(prompt).with_schema(schema);
        let stream = self
            .provider
            .stream_object(request)
            .await
            .map_err(|e| self.provider_error(e, ProviderStage::ObjectStreaming));
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => return Err(self.report(e, emitter).await),
        };
        self.drain(stream, emitter, ProviderStage::ObjectStreaming).await
    }

    async fn drain(
        &self,
        mut stream: futures::stream::BoxStream<'_, Result<GenerationChunk>>,
        emitter: &EventEmitter,
        stage: ProviderStage,
    ) -> Result<AgentReply> {
        let mut reply = AgentReply {
            text: String::new(),
            object: None,
            usage: TokenUsage::default(),
            finish_reason: None,
        };

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return Err(self.report(self.provider_error(e, stage), emitter).await),
            };

            match &chunk {
                GenerationChunk::TextDelta(text) => reply.text.push_str(text),
                GenerationChunk::ObjectDelta(object) => reply.object = Some(object.clone()),
                GenerationChunk::Finish { reason, usage } => {
                    reply.usage.add(usage);
                    reply.finish_reason = Some(reason.clone());
                }
                _ => {}
            }
            emitter.emit(self.event_for(chunk)).await;
        }

        debug!(
            sub_agent = %self.name,
            total_tokens = reply.usage.total_tokens,
            "Sub-agent generation finished"
        );
        Ok(reply)
    }

    fn event_for(&self, chunk: GenerationChunk) -> StreamEvent {
        let (kind, data) = match chunk {
            GenerationChunk::TextDelta(text) => ("text-delta", json!({"textDelta": text})),
            GenerationChunk::ReasoningDelta(text) => ("reasoning", json!({"reasoning": text})),
            GenerationChunk::Source(source) => ("source", json!({"source": source})),
            GenerationChunk::ToolCall { id, name, args } => (
                "tool-call",
                json!({"toolCallId": id, "toolName": name, "args": args}),
            ),
            GenerationChunk::ToolResult { id, name, result } => (
                "tool-result",
                json!({"toolCallId": id, "toolName": name, "result": result}),
            ),
            GenerationChunk::ObjectDelta(object) => ("object-delta", json!({"object": object})),
            GenerationChunk::Finish { reason, usage } => (
                "finish",
                json!({"finishReason": reason, "usage": usage}),
            ),
        };
        StreamEvent::new(kind, self.id.clone(), self.name.clone(), Some(data))
    }

    fn provider_error(&self, e: StepwiseError, stage: ProviderStage) -> StepwiseError {
        match e {
            StepwiseError::Provider { .. } => e,
            other => StepwiseError::Provider {
                message: other.to_string(),
                stage,
                status_code: None,
            },
        }
    }

    /// Publish the failure as an `error` event, then hand it back.
    async fn report(&self, e: StepwiseError, emitter: &EventEmitter) -> StepwiseError {
        let event = StreamEvent::new(
            "error",
            self.id.clone(),
            self.name.clone(),
            Some(json!({"error": e.to_string()})),
        );
        emitter.emit(event).await;
        e
    }
}

impl Step {
    /// A step that streams `agent`'s answer to the prompt built from the
    /// step context. Output: `{"text": ..., "usage": ...}`.
    pub fn agent<F>(id: impl Into<String>, agent: Arc<SubAgent>, prompt: F) -> Step
    where
        F: Fn(&StepContext) -> String + Send + Sync + 'static,
    {
        Step::new(id, move |ctx: StepContext| {
            let agent = agent.clone();
            let prompt = prompt(&ctx);
            async move {
                let reply = agent.stream_text(prompt, ctx.emitter()).await?;
                Ok(json!({"text": reply.text, "usage": reply.usage}))
            }
        })
    }
}
