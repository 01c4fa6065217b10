//! Built-in demo workflows served by `stepwise serve`.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use serde_json::{json, Value};

use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::provider::{
    FinishReason, GenerationChunk, GenerationRequest, ObjectGeneration, Role, TextGeneration,
    TokenUsage,
};
use stepwise_core::traits::GenerationProvider;
use stepwise_engine::{Step, StepContext, SubAgent, WorkflowDefinition, WorkflowRegistry};

/// Offline provider: answers by restating the last user message, one word per chunk.
pub struct EchoProvider;

impl EchoProvider {
    fn answer(request: &GenerationRequest) -> String {
        request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    fn usage(request: &GenerationRequest, answer: &str) -> TokenUsage {
        let prompt: usize = request
            .messages
            .iter()
            .map(|m| m.content.split_whitespace().count())
            .sum();
        TokenUsage::new(prompt as u64, answer.split_whitespace().count() as u64)
    }
}

impl GenerationProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn generate_text(&self, request: GenerationRequest) -> BoxFuture<'_, Result<TextGeneration>> {
        Box::pin(async move {
            let text = Self::answer(&request);
            Ok(TextGeneration {
                usage: Self::usage(&request, &text),
                text,
                finish_reason: FinishReason::Stop,
            })
        })
    }

    fn stream_text(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<GenerationChunk>>>> {
        Box::pin(async move {
            let text = Self::answer(&request);
            let mut chunks: Vec<Result<GenerationChunk>> = text
                .split_inclusive(' ')
                .map(|word| Ok(GenerationChunk::TextDelta(word.to_string())))
                .collect();
            chunks.push(Ok(GenerationChunk::Finish {
                reason: FinishReason::Stop,
                usage: Self::usage(&request, &text),
            }));
            let stream: BoxStream<'_, Result<GenerationChunk>> = Box::pin(stream::iter(chunks));
            Ok(stream)
        })
    }

    fn generate_object(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<ObjectGeneration>> {
        Box::pin(async move {
            let text = Self::answer(&request);
            Ok(ObjectGeneration {
                usage: Self::usage(&request, &text),
                object: json!({"text": text}),
                finish_reason: FinishReason::Stop,
            })
        })
    }

    fn stream_object(
        &self,
        request: GenerationRequest,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<GenerationChunk>>>> {
        Box::pin(async move {
            let text = Self::answer(&request);
            let chunks = vec![
                Ok(GenerationChunk::ObjectDelta(json!({"text": text}))),
                Ok(GenerationChunk::Finish {
                    reason: FinishReason::Stop,
                    usage: Self::usage(&request, &text),
                }),
            ];
            let stream: BoxStream<'_, Result<GenerationChunk>> = Box::pin(stream::iter(chunks));
            Ok(stream)
        })
    }
}

fn text_of(value: Option<&Value>) -> String {
    value
        .and_then(|v| v.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// research -> writing, each step a streamed sub-agent.
fn research_writing(provider: Arc<dyn GenerationProvider>) -> Result<WorkflowDefinition> {
    let researcher = Arc::new(
        SubAgent::new("researcher", "Researcher", provider.clone())
            .with_instructions("Collect the key facts about the topic."),
    );
    let writer = Arc::new(
        SubAgent::new("writer", "Writer", provider)
            .with_instructions("Turn research notes into a short article."),
    );

    WorkflowDefinition::builder("research-writing")
        .name("Research and write")
        .description("Researches a topic, then drafts an article from the notes")
        .input_schema(json!({
            "type": "object",
            "properties": {"topic": {"type": "string"}},
            "required": ["topic"],
        }))
        .then(Step::agent("research", researcher, |ctx| {
            let topic = ctx.input()["topic"].as_str().unwrap_or_default();
            format!("Research notes on {topic}")
        }))
        .then(
            Step::agent("writing", writer, |ctx| {
                let notes = text_of(ctx.get_step_data("research"));
                match ctx.resume_data().and_then(|d| d["extra"].as_str()) {
                    Some(extra) => format!("Article from: {notes}. Also cover {extra}"),
                    None => format!("Article from: {notes}"),
                }
            })
            .with_resume_schema(json!({
                "type": "object",
                "properties": {"extra": {"type": "string"}},
            })),
        )
        .build()
}

/// draft -> (human approval) -> publish.
fn approval() -> Result<WorkflowDefinition> {
    WorkflowDefinition::builder("approval")
        .name("Draft with approval")
        .description("Suspends after drafting until a reviewer resumes it")
        .then(
            Step::new("draft", |ctx: StepContext| async move {
                let topic = ctx.input()["topic"].as_str().unwrap_or("untitled").to_string();
                ctx.suspend("awaiting reviewer approval");
                Ok(json!({"draft": format!("Draft about {topic}")}))
            })
            .with_suspend_schema(json!({
                "type": "object",
                "properties": {"reason": {"type": "string"}},
            })),
        )
        .then(
            Step::new("publish", |ctx: StepContext| async move {
                let approved = ctx.data()["approved"].as_bool().unwrap_or(false);
                if !approved {
                    return Err(StepwiseError::step("draft was rejected"));
                }
                let draft = ctx.get_step_data("draft").cloned().unwrap_or_default();
                Ok(json!({"published": draft["draft"]}))
            })
            .with_resume_schema(json!({
                "type": "object",
                "properties": {"approved": {"type": "boolean"}},
                "required": ["approved"],
            })),
        )
        .build()
}

/// Two analyses in parallel, then a joined report.
fn fan_out() -> Result<WorkflowDefinition> {
    WorkflowDefinition::builder("fan-out")
        .name("Parallel analysis")
        .then(Step::new("normalize", |ctx: StepContext| async move {
            let text = ctx.data()["text"].as_str().unwrap_or_default().trim().to_string();
            Ok(json!({"text": text}))
        }))
        .and_all(
            "analyze",
            vec![
                Step::new("word-count", |ctx: StepContext| async move {
                    let text = ctx.data()["text"].as_str().unwrap_or_default();
                    Ok(json!(text.split_whitespace().count()))
                }),
                Step::new("shout", |ctx: StepContext| async move {
                    Ok(json!(ctx.data()["text"].as_str().unwrap_or_default().to_uppercase()))
                }),
            ],
        )
        .then(Step::new("report", |ctx: StepContext| async move {
            Ok(json!({
                "words": ctx.data()["word-count"],
                "loud": ctx.data()["shout"],
            }))
        }))
        .build()
}

/// Register every built-in workflow.
pub fn register_builtin(registry: &WorkflowRegistry) -> Result<()> {
    let provider: Arc<dyn GenerationProvider> = Arc::new(EchoProvider);
    registry.register(research_writing(provider)?)?;
    registry.register(approval()?)?;
    registry.register(fan_out()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::config::EngineConfig;
    use stepwise_core::types::ExecutionStatus;
    use stepwise_memory::MemoryExecutionStore;

    fn registry() -> WorkflowRegistry {
        let registry = WorkflowRegistry::new(
            Arc::new(MemoryExecutionStore::new()),
            EngineConfig::default(),
        );
        register_builtin(&registry).unwrap();
        registry
    }

    #[test]
    fn test_builtin_workflows_registered() {
        let ids: Vec<_> = registry().list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["approval", "fan-out", "research-writing"]);
    }

    #[test]
    fn test_register_builtin_twice_is_idempotent() {
        let registry = registry();
        register_builtin(&registry).unwrap();
        assert_eq!(registry.list().len(), 3);
    }

    #[tokio::test]
    async fn test_research_writing_echoes_through_agents() {
        let record = registry()
            .execute("research-writing", json!({"topic": "tides"}))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(
            record.result.unwrap()["text"],
            "Article from: Research notes on tides"
        );
    }

    #[tokio::test]
    async fn test_approval_waits_for_reviewer() {
        let registry = registry();
        let record = registry
            .execute("approval", json!({"topic": "rust"}))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Suspended);

        let done = registry
            .resume(
                "approval",
                &record.execution_id,
                json!({"approved": true}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.result.unwrap()["published"], "Draft about rust");
    }

    #[tokio::test]
    async fn test_fan_out_joins_parallel_outputs() {
        let record = registry()
            .execute("fan-out", json!({"text": "  hello parallel world "}))
            .await
            .unwrap();
        assert_eq!(
            record.result.unwrap(),
            json!({"words": 3, "loud": "HELLO PARALLEL WORLD"})
        );
    }
}
