use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Notify;

use stepwise_core::config::EngineConfig;
use stepwise_core::error::StepwiseError;
use stepwise_core::provider::{FinishReason, GenerationChunk, TokenUsage};
use stepwise_core::traits::ExecutionStore;
use stepwise_core::types::ExecutionStatus;
use stepwise_engine::{
    ExecutionEvent, Step, StepContext, SubAgent, WorkflowDefinition, WorkflowRegistry,
};
use stepwise_memory::SqliteExecutionStore;
use stepwise_test_utils::{MemoryExecutionStore, ScriptedProvider};

/// `research -> {text: "a"}`, `writing -> {text: "a+b"}`, plus `+extra` when
/// the writing step is handed an `extra` value, either as resume data or input.
fn research_writing(gate: Option<Arc<Notify>>) -> WorkflowDefinition {
    WorkflowDefinition::builder("W")
        .name("Research and write")
        .input_schema(json!({"type": "object", "required": ["topic"]}))
        .then(Step::new("research", move |_ctx: StepContext| {
            let gate = gate.clone();
            async move {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                Ok(json!({"text": "a"}))
            }
        }))
        .then(Step::new("writing", |ctx: StepContext| async move {
            let research = ctx.get_step_data("research").cloned().unwrap_or_default();
            let mut text = format!("{}+b", research["text"].as_str().unwrap_or_default());
            let extra = ctx
                .resume_data()
                .and_then(|d| d.get("extra"))
                .or_else(|| ctx.input().get("extra"));
            if let Some(Value::String(extra)) = extra {
                text.push('+');
                text.push_str(extra);
            }
            Ok(json!({"text": text}))
        }))
        .build()
        .unwrap()
}

fn registry_with(store: Arc<dyn ExecutionStore>, config: EngineConfig) -> Arc<WorkflowRegistry> {
    Arc::new(WorkflowRegistry::new(store, config))
}

#[tokio::test]
async fn test_research_writing_completes_with_ordered_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("executions.db");
    let store = Arc::new(SqliteExecutionStore::open(&db).unwrap());
    let registry = registry_with(store, EngineConfig::default());
    registry.register(research_writing(None)).unwrap();

    let record = registry.execute("W", json!({"topic": "x"})).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.result, Some(json!({"text": "a+b"})));
    assert_eq!(record.steps.step_ids(), vec!["research", "writing"]);
    assert!(record.ended_at.is_some());

    // A fresh handle on the same file sees the persisted record.
    let reopened = SqliteExecutionStore::open(&db).unwrap();
    let loaded = reopened.load(&record.execution_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ExecutionStatus::Completed);
    assert_eq!(loaded.steps.get("writing"), Some(&json!({"text": "a+b"})));
}

#[tokio::test]
async fn test_suspend_before_writing_then_resume() {
    let gate = Arc::new(Notify::new());
    let registry = registry_with(
        Arc::new(MemoryExecutionStore::new()),
        EngineConfig::default(),
    );
    registry.register(research_writing(Some(gate.clone()))).unwrap();

    let mut stream = registry.stream("W", json!({"topic": "x"})).await.unwrap();
    let id = stream.execution_id().clone();
    let first = stream.next_event().await.unwrap();
    assert_eq!(first.event_type(), "step-start");

    registry.suspend(&id, Some("review".into())).unwrap();
    let again = registry.suspend(&id, None).unwrap_err();
    assert!(matches!(again, StepwiseError::NoActiveExecution(_)));
    gate.notify_one();

    let (events, outcome) = stream.collect().await;
    let suspended = outcome.unwrap();
    assert_eq!(suspended.status, ExecutionStatus::Suspended);
    assert_eq!(suspended.steps.step_ids(), vec!["research"]);
    assert_eq!(suspended.suspension.unwrap().reason.as_deref(), Some("review"));
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::StepSuspended { .. })
    ));

    let state = registry.execution_state("W", &id).await.unwrap();
    assert_eq!(state.status, ExecutionStatus::Suspended);

    // The gate is consumed; resumption never re-runs research.
    let resumed = registry
        .resume("W", &id, json!({"extra": "c"}), None)
        .await
        .unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.steps.step_ids(), vec!["research", "writing"]);
    assert_eq!(resumed.result, Some(json!({"text": "a+b+c"})));

    // Same result as an uninterrupted run with the data injected up front.
    let plain = registry_with(
        Arc::new(MemoryExecutionStore::new()),
        EngineConfig::default(),
    );
    plain.register(research_writing(None)).unwrap();
    let straight = plain
        .execute("W", json!({"topic": "x", "extra": "c"}))
        .await
        .unwrap();
    assert_eq!(straight.result, resumed.result);
    let outputs = |r: &stepwise_core::types::ExecutionRecord| -> Vec<(String, Value)> {
        r.steps
            .entries()
            .iter()
            .map(|e| (e.step_id.clone(), e.output.clone()))
            .collect()
    };
    assert_eq!(outputs(&straight), outputs(&resumed));
}

#[tokio::test]
async fn test_resume_of_completed_execution_is_rejected() {
    let registry = registry_with(
        Arc::new(MemoryExecutionStore::new()),
        EngineConfig::default(),
    );
    registry.register(research_writing(None)).unwrap();
    let record = registry.execute("W", json!({"topic": "x"})).await.unwrap();

    let err = registry
        .resume("W", &record.execution_id, json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StepwiseError::NotSuspended { .. }));
}

#[tokio::test]
async fn test_sub_agent_tool_calls_reach_stream_prefixed() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        GenerationChunk::ToolCall {
            id: "c1".into(),
            name: "search".into(),
            args: json!({"q": "x"}),
        },
        GenerationChunk::TextDelta("found".into()),
        GenerationChunk::Finish {
            reason: FinishReason::Stop,
            usage: TokenUsage::new(3, 1),
        },
    ]));
    let researcher = Arc::new(SubAgent::new("r1", "Researcher", provider));
    let wf = WorkflowDefinition::builder("agentic")
        .then(Step::agent("research", researcher, |ctx| {
            format!("look up {}", ctx.input()["topic"])
        }))
        .build()
        .unwrap();

    let registry = registry_with(
        Arc::new(MemoryExecutionStore::new()),
        EngineConfig::default(),
    );
    registry.register(wf).unwrap();

    let (events, outcome) = registry
        .stream("agentic", json!({"topic": "x"}))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(outcome.unwrap().result.unwrap()["text"], "found");

    let parts: Vec<Value> = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::Part(_)))
        .map(|e| e.to_value())
        .collect();
    let tool_call = parts.iter().find(|p| p["type"] == "tool-call").unwrap();
    assert_eq!(tool_call["toolName"], "Researcher: search");
    assert_eq!(tool_call["subAgentId"], "r1");
    assert!(parts.iter().any(|p| p["type"] == "text-delta"));
}

#[tokio::test]
async fn test_forwarded_types_filter_applies_to_streams() {
    let provider = Arc::new(ScriptedProvider::text("quiet"));
    let agent = Arc::new(SubAgent::new("a1", "Writer", provider));
    let wf = WorkflowDefinition::builder("quiet")
        .then(Step::agent("write", agent, |_ctx| "go".to_string()))
        .build()
        .unwrap();

    let config = EngineConfig {
        forwarded_types: vec![],
        ..EngineConfig::default()
    };
    let registry = registry_with(Arc::new(MemoryExecutionStore::new()), config);
    registry.register(wf).unwrap();

    let (events, outcome) = registry
        .stream("quiet", json!({}))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(outcome.unwrap().status, ExecutionStatus::Completed);
    let tags: Vec<_> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(tags, vec!["step-start", "step-complete"]);
}

#[tokio::test]
async fn test_step_failure_preserves_partial_ledger() {
    let wf = WorkflowDefinition::builder("flaky")
        .then(Step::new("ok", |_ctx: StepContext| async { Ok(json!(1)) }))
        .then(Step::new("boom", |_ctx: StepContext| async {
            Err(StepwiseError::step("upstream timeout"))
        }))
        .build()
        .unwrap();
    let store = Arc::new(MemoryExecutionStore::new());
    let registry = registry_with(store.clone(), EngineConfig::default());
    registry.register(wf).unwrap();

    let err = registry.execute("flaky", json!({})).await.unwrap_err();
    assert!(matches!(err, StepwiseError::ExecutionFailed { .. }));

    let records = registry.list_executions("flaky").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Failed);
    assert_eq!(records[0].steps.step_ids(), vec!["ok"]);
    assert!(records[0]
        .error
        .as_deref()
        .unwrap()
        .contains("upstream timeout"));
}
