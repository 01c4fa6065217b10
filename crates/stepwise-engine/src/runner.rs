use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info};

use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::event::EventBus;
use stepwise_core::traits::ExecutionStore;
use stepwise_core::types::{
    ExecutionRecord, ExecutionStatus, LifecycleEvent, StepLedger, SuspensionInfo,
};

use crate::controller::SuspendController;
use crate::execution::{ExecutionChannel, ExecutionEvent};
use crate::schema;
use crate::step::{Step, StepContext, StepNode};
use crate::stream::EventEmitter;
use crate::workflow::WorkflowDefinition;

/// Everything one run of the runner needs besides the record itself.
#[derive(Clone)]
pub struct RunContext {
    pub definition: Arc<WorkflowDefinition>,
    pub controller: Arc<SuspendController>,
    pub emitter: EventEmitter,
    /// Event sequence of a streamed execution.
    pub channel: Option<ExecutionChannel>,
}

/// Advances an execution record through its workflow's chain.
///
/// Suspension is observed only at node boundaries, including the one after
/// the last node; a parallel group is one node.
pub struct StepChainRunner {
    store: Arc<dyn ExecutionStore>,
    event_bus: Arc<EventBus>,
}

impl StepChainRunner {
    pub fn new(store: Arc<dyn ExecutionStore>, event_bus: Arc<EventBus>) -> Self {
        Self { store, event_bus }
    }

    /// Run from `record.cursor` until completion, failure, or suspension.
    ///
    /// Suspension returns `Ok` with a suspended record. A step failure
    /// persists the failed record and returns `ExecutionFailed`.
    pub async fn run(&self, ctx: &RunContext, mut record: ExecutionRecord) -> Result<ExecutionRecord> {
        let nodes = ctx.definition.nodes();
        let input = Arc::new(record.input.clone());
        let mut resume_data = ctx.controller.take_resume_data();

        record.status = ExecutionStatus::Running;
        record.suspension = None;

        while record.cursor < nodes.len() {
            let node = &nodes[record.cursor];

            if ctx.controller.is_suspend_requested() {
                return self.suspend(ctx, record, Some(node.id())).await;
            }

            let resumed = resume_data.take();
            let data = match &resumed {
                Some(data) => data.clone(),
                None => previous_output(nodes, &record),
            };
            debug!(
                execution_id = %record.execution_id,
                step_id = node.id(),
                cursor = record.cursor,
                "Running step"
            );

            let ledger = Arc::new(record.steps.clone());
            let outputs = match self
                .run_node(ctx, node, data, resumed, input.clone(), ledger)
                .await
            {
                Ok(outputs) => outputs,
                Err((step_id, e)) => return Err(self.fail(record, &step_id, e).await),
            };

            for (step_id, output) in &outputs {
                record.steps.record(step_id.clone(), output.clone());
            }
            record.cursor += 1;
            self.persist(&record).await?;

            for (step_id, output) in outputs {
                self.event_bus.publish(LifecycleEvent::StepCompleted {
                    execution_id: record.execution_id.clone(),
                    step_id: step_id.clone(),
                });
                if let Some(channel) = &ctx.channel {
                    channel
                        .send(ExecutionEvent::step_complete(&record.execution_id, &step_id, output))
                        .await;
                }
            }
        }

        // A suspend that lands during the last node still takes effect; a
        // later resume completes without running anything.
        if ctx.controller.is_suspend_requested() {
            return self.suspend(ctx, record, None).await;
        }

        self.complete(ctx, record).await
    }

    async fn run_node(
        &self,
        ctx: &RunContext,
        node: &StepNode,
        data: Value,
        resume_data: Option<Value>,
        input: Arc<Value>,
        ledger: Arc<StepLedger>,
    ) -> std::result::Result<Vec<(String, Value)>, (String, StepwiseError)> {
        let invocations = node.steps().iter().map(|step| {
            let step_ctx = StepContext::new(
                data.clone(),
                input.clone(),
                resume_data.clone(),
                ctx.definition.id.clone(),
                step.id.clone(),
                ledger.clone(),
                ctx.controller.clone(),
                ctx.emitter.clone(),
            );
            async move {
                if let Some(channel) = &ctx.channel {
                    channel
                        .send(ExecutionEvent::step_start(step_ctx.execution_id(), &step.id))
                        .await;
                }
                let output = invoke(step, step_ctx).await;
                (step.id.clone(), output)
            }
        });

        // Members of a group all run to completion before any is recorded.
        let results = join_all(invocations).await;

        let mut outputs = Vec::with_capacity(results.len());
        for (step_id, result) in results {
            match result {
                Ok(output) => outputs.push((step_id, output)),
                Err(e) => return Err((step_id, e)),
            }
        }
        Ok(outputs)
    }

    async fn suspend(
        &self,
        ctx: &RunContext,
        mut record: ExecutionRecord,
        step_id: Option<&str>,
    ) -> Result<ExecutionRecord> {
        let reason = ctx.controller.reason();
        record.status = ExecutionStatus::Suspended;
        record.suspension = Some(SuspensionInfo {
            reason: reason.clone(),
            suspended_at: Utc::now(),
            step_id: step_id.map(str::to_string),
        });
        self.persist(&record).await?;

        info!(
            execution_id = %record.execution_id,
            step_id = step_id.unwrap_or(""),
            reason = reason.as_deref().unwrap_or(""),
            "Execution suspended"
        );
        self.event_bus.publish(LifecycleEvent::Suspended {
            execution_id: record.execution_id.clone(),
            reason: reason.clone(),
        });

        if let Some(channel) = &ctx.channel {
            channel
                .send(ExecutionEvent::step_suspended(
                    &record.execution_id,
                    step_id.map(str::to_string),
                    reason,
                ))
                .await;
            channel.close();
        }
        Ok(record)
    }

    async fn complete(&self, ctx: &RunContext, mut record: ExecutionRecord) -> Result<ExecutionRecord> {
        let nodes = ctx.definition.nodes();
        let result = nodes
            .last()
            .and_then(|node| node.collect_output(&record.steps))
            .unwrap_or(Value::Null);

        if let Err(e) = schema::validate_optional(
            ctx.definition.result_schema.as_ref(),
            &result,
            "workflow result",
        ) {
            let step_id = nodes.last().map(|n| n.id().to_string()).unwrap_or_default();
            return Err(self.fail(record, &step_id, e).await);
        }

        record.status = ExecutionStatus::Completed;
        record.result = Some(result);
        record.ended_at = Some(Utc::now());
        self.persist(&record).await?;

        info!(
            execution_id = %record.execution_id,
            workflow_id = %record.workflow_id,
            steps = record.steps.len(),
            "Execution completed"
        );
        self.event_bus.publish(LifecycleEvent::Completed {
            execution_id: record.execution_id.clone(),
        });
        Ok(record)
    }

    async fn fail(&self, mut record: ExecutionRecord, step_id: &str, e: StepwiseError) -> StepwiseError {
        let message = e.to_string();
        error!(
            execution_id = %record.execution_id,
            step_id,
            error = %message,
            "Step failed"
        );

        record.status = ExecutionStatus::Failed;
        record.error = Some(message.clone());
        record.ended_at = Some(Utc::now());
        if let Err(store_err) = self.store.save(&record).await {
            error!(
                execution_id = %record.execution_id,
                error = %store_err,
                "Failed to persist failed execution"
            );
        }

        self.event_bus.publish(LifecycleEvent::Failed {
            execution_id: record.execution_id.clone(),
            error: message.clone(),
        });

        StepwiseError::ExecutionFailed {
            execution_id: record.execution_id.to_string(),
            step_id: step_id.to_string(),
            message,
        }
    }

    async fn persist(&self, record: &ExecutionRecord) -> Result<()> {
        self.store.save(record).await.map_err(|e| {
            error!(
                execution_id = %record.execution_id,
                error = %e,
                "Failed to persist execution"
            );
            e
        })
    }
}

/// Data handed to the node at `record.cursor` when no resume payload applies.
fn previous_output(nodes: &[StepNode], record: &ExecutionRecord) -> Value {
    match record.cursor {
        0 => record.input.clone(),
        cursor => nodes
            .get(cursor - 1)
            .and_then(|node| node.collect_output(&record.steps))
            .unwrap_or(Value::Null),
    }
}

async fn invoke(step: &Step, ctx: StepContext) -> Result<Value> {
    schema::validate_optional(step.input_schema.as_ref(), ctx.data(), &format!("input of {}", step.id))?;

    let output = AssertUnwindSafe(step.execute(ctx))
        .catch_unwind()
        .await
        .map_err(|_| StepwiseError::step(format!("step {} panicked", step.id)))??;

    schema::validate_optional(
        step.output_schema.as_ref(),
        &output,
        &format!("output of {}", step.id),
    )?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepwise_core::types::ExecutionId;
    use stepwise_test_utils::{FailingExecutionStore, MemoryExecutionStore};
    use tokio::sync::Notify;

    fn runner(store: Arc<dyn ExecutionStore>) -> StepChainRunner {
        StepChainRunner::new(store, Arc::new(EventBus::default()))
    }

    fn run_context(definition: WorkflowDefinition, execution_id: &ExecutionId) -> RunContext {
        RunContext {
            definition: Arc::new(definition),
            controller: Arc::new(SuspendController::new(execution_id.clone())),
            emitter: EventEmitter::detached(),
            channel: None,
        }
    }

    fn research_writing() -> WorkflowDefinition {
        WorkflowDefinition::builder("W")
            .then(Step::new("research", |_ctx: StepContext| async {
                Ok(json!({"text": "a"}))
            }))
            .then(Step::new("writing", |ctx: StepContext| async move {
                let prior = ctx.data()["text"].as_str().unwrap_or_default().to_string();
                Ok(json!({"text": format!("{prior}+b")}))
            }))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_runs_chain_to_completion() {
        let store = Arc::new(MemoryExecutionStore::new());
        let id = ExecutionId::new();
        let ctx = run_context(research_writing(), &id);
        let record = ExecutionRecord::new(id.clone(), "W", json!({"topic": "x"}));

        let done = runner(store.clone()).run(&ctx, record).await.unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.result, Some(json!({"text": "a+b"})));
        assert_eq!(done.steps.step_ids(), vec!["research", "writing"]);
        assert_eq!(done.cursor, 2);
        assert!(done.ended_at.is_some());

        let stored = store.load(&id).await.unwrap().unwrap();
        assert_eq!(stored, done);
    }

    #[tokio::test]
    async fn test_first_step_sees_input() {
        let wf = WorkflowDefinition::builder("W")
            .then(Step::new("echo", |ctx: StepContext| async move {
                Ok(ctx.data().clone())
            }))
            .build()
            .unwrap();
        let id = ExecutionId::new();
        let ctx = run_context(wf, &id);
        let done = runner(Arc::new(MemoryExecutionStore::new()))
            .run(&ctx, ExecutionRecord::new(id, "W", json!({"topic": "x"})))
            .await
            .unwrap();
        assert_eq!(done.result, Some(json!({"topic": "x"})));
    }

    #[tokio::test]
    async fn test_suspend_observed_at_boundary() {
        let wf = WorkflowDefinition::builder("W")
            .then(Step::new("research", |ctx: StepContext| async move {
                ctx.suspend("review research");
                Ok(json!({"text": "a"}))
            }))
            .then(Step::new("writing", |_ctx: StepContext| async {
                Err(StepwiseError::step("writing must not run"))
            }))
            .build()
            .unwrap();
        let store = Arc::new(MemoryExecutionStore::new());
        let id = ExecutionId::new();
        let ctx = run_context(wf, &id);

        let record = runner(store.clone())
            .run(&ctx, ExecutionRecord::new(id.clone(), "W", json!({})))
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Suspended);
        assert_eq!(record.steps.step_ids(), vec!["research"]);
        assert_eq!(record.cursor, 1);
        let suspension = record.suspension.unwrap();
        assert_eq!(suspension.reason.as_deref(), Some("review research"));
        assert_eq!(suspension.step_id.as_deref(), Some("writing"));
        assert_eq!(
            store.load(&id).await.unwrap().unwrap().status,
            ExecutionStatus::Suspended
        );
    }

    #[tokio::test]
    async fn test_suspend_during_last_step_takes_effect() {
        let gate = Arc::new(Notify::new());
        let step_gate = gate.clone();
        let wf = WorkflowDefinition::builder("W")
            .then(Step::new("only", move |_ctx: StepContext| {
                let gate = step_gate.clone();
                async move {
                    gate.notified().await;
                    Ok(json!({"text": "a"}))
                }
            }))
            .build()
            .unwrap();
        let store = Arc::new(MemoryExecutionStore::new());
        let id = ExecutionId::new();
        let ctx = run_context(wf, &id);
        let runner = runner(store.clone());

        let interrupt = async {
            tokio::task::yield_now().await;
            ctx.controller.suspend(Some("late".into()));
            gate.notify_one();
        };
        let (record, _) = tokio::join!(
            runner.run(&ctx, ExecutionRecord::new(id.clone(), "W", json!({}))),
            interrupt
        );
        let record = record.unwrap();

        assert_eq!(record.status, ExecutionStatus::Suspended);
        assert_eq!(record.cursor, 1);
        assert_eq!(record.steps.step_ids(), vec!["only"]);
        assert!(record.result.is_none());
        let suspension = record.suspension.unwrap();
        assert_eq!(suspension.reason.as_deref(), Some("late"));
        assert!(suspension.step_id.is_none());
        assert_eq!(
            store.load(&id).await.unwrap().unwrap().status,
            ExecutionStatus::Suspended
        );

        // Resuming past the end completes from the recorded outputs.
        let suspended = store.load(&id).await.unwrap().unwrap();
        let resume_ctx = RunContext {
            controller: Arc::new(SuspendController::resuming(id.clone(), json!({}))),
            ..ctx.clone()
        };
        let done = runner.run(&resume_ctx, suspended).await.unwrap();
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.result, Some(json!({"text": "a"})));
    }

    #[tokio::test]
    async fn test_resume_injects_data_at_cursor() {
        let wf = WorkflowDefinition::builder("W")
            .then(Step::new("research", |_ctx: StepContext| async {
                Ok(json!({"text": "a"}))
            }))
            .then(Step::new("writing", |ctx: StepContext| async move {
                let research = ctx.get_step_data("research").cloned().unwrap_or_default();
                Ok(json!({"research": research, "data": ctx.data().clone(), "resumed": ctx.resume_data().is_some()}))
            }))
            .build()
            .unwrap();
        let id = ExecutionId::new();
        let mut record = ExecutionRecord::new(id.clone(), "W", json!({}));
        record.steps.record("research", json!({"text": "a"}));
        record.cursor = 1;
        record.status = ExecutionStatus::Suspended;

        let ctx = RunContext {
            controller: Arc::new(SuspendController::resuming(id, json!({"extra": "c"}))),
            ..run_context(wf, &ExecutionId::new())
        };
        let done = runner(Arc::new(MemoryExecutionStore::new()))
            .run(&ctx, record)
            .await
            .unwrap();
        assert_eq!(
            done.result,
            Some(json!({"research": {"text": "a"}, "data": {"extra": "c"}, "resumed": true}))
        );
    }

    #[tokio::test]
    async fn test_step_failure_keeps_partial_ledger() {
        let wf = WorkflowDefinition::builder("W")
            .then(Step::new("research", |_ctx: StepContext| async {
                Ok(json!({"text": "a"}))
            }))
            .then(Step::new("writing", |_ctx: StepContext| async {
                Err(StepwiseError::step("model refused"))
            }))
            .build()
            .unwrap();
        let store = Arc::new(MemoryExecutionStore::new());
        let id = ExecutionId::new();
        let ctx = run_context(wf, &id);

        let err = runner(store.clone())
            .run(&ctx, ExecutionRecord::new(id.clone(), "W", json!({})))
            .await
            .unwrap_err();
        match err {
            StepwiseError::ExecutionFailed { step_id, message, .. } => {
                assert_eq!(step_id, "writing");
                assert!(message.contains("model refused"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let stored = store.load(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failed);
        assert_eq!(stored.steps.step_ids(), vec!["research"]);
        assert!(stored.error.unwrap().contains("model refused"));
    }

    #[tokio::test]
    async fn test_step_panic_fails_execution() {
        let wf = WorkflowDefinition::builder("W")
            .then(Step::new("boom", |_ctx: StepContext| async {
                if true {
                    panic!("bug in step");
                }
                Ok(Value::Null)
            }))
            .build()
            .unwrap();
        let id = ExecutionId::new();
        let ctx = run_context(wf, &id);
        let err = runner(Arc::new(MemoryExecutionStore::new()))
            .run(&ctx, ExecutionRecord::new(id, "W", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, StepwiseError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_output_schema_violation_fails_step() {
        let wf = WorkflowDefinition::builder("W")
            .then(
                Step::new("research", |_ctx: StepContext| async { Ok(json!({"text": 1})) })
                    .with_output_schema(json!({
                        "type": "object",
                        "properties": {"text": {"type": "string"}},
                    })),
            )
            .build()
            .unwrap();
        let id = ExecutionId::new();
        let ctx = run_context(wf, &id);
        let err = runner(Arc::new(MemoryExecutionStore::new()))
            .run(&ctx, ExecutionRecord::new(id, "W", json!({})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("output of research"));
    }

    #[tokio::test]
    async fn test_parallel_group_is_atomic_for_suspension() {
        let gate = Arc::new(Notify::new());
        let slow_gate = gate.clone();
        let wf = WorkflowDefinition::builder("W")
            .and_all(
                "review",
                vec![
                    Step::new("fast", |ctx: StepContext| async move {
                        ctx.suspend("stop after fast");
                        Ok(json!("fast"))
                    }),
                    Step::new("slow", move |_ctx: StepContext| {
                        let gate = slow_gate.clone();
                        async move {
                            gate.notified().await;
                            Ok(json!("slow"))
                        }
                    }),
                ],
            )
            .then(Step::new("publish", |_ctx: StepContext| async {
                Ok(json!("published"))
            }))
            .build()
            .unwrap();
        let id = ExecutionId::new();
        let ctx = run_context(wf, &id);
        let store: Arc<dyn ExecutionStore> = Arc::new(MemoryExecutionStore::new());
        let runner = runner(store);

        let release = async {
            tokio::task::yield_now().await;
            gate.notify_one();
        };
        let (record, _) = tokio::join!(
            runner.run(&ctx, ExecutionRecord::new(id, "W", json!({}))),
            release
        );
        let record = record.unwrap();

        // Both members finished and were recorded before the suspend took effect.
        assert_eq!(record.status, ExecutionStatus::Suspended);
        assert_eq!(record.steps.step_ids(), vec!["fast", "slow"]);
        assert_eq!(
            record.suspension.and_then(|s| s.step_id).as_deref(),
            Some("publish")
        );
    }

    #[tokio::test]
    async fn test_parallel_group_output_feeds_next_step() {
        let wf = WorkflowDefinition::builder("W")
            .and_all(
                "fanout",
                vec![
                    Step::new("a", |ctx: StepContext| async move {
                        Ok(json!(format!("a:{}", ctx.data()["topic"].as_str().unwrap_or_default())))
                    }),
                    Step::new("b", |_ctx: StepContext| async { Ok(json!("b")) }),
                ],
            )
            .then(Step::new("join", |ctx: StepContext| async move {
                Ok(ctx.data().clone())
            }))
            .build()
            .unwrap();
        let id = ExecutionId::new();
        let ctx = run_context(wf, &id);
        let done = runner(Arc::new(MemoryExecutionStore::new()))
            .run(&ctx, ExecutionRecord::new(id, "W", json!({"topic": "x"})))
            .await
            .unwrap();
        assert_eq!(done.result, Some(json!({"a": "a:x", "b": "b"})));
    }

    #[tokio::test]
    async fn test_failed_member_records_nothing_from_group() {
        let wf = WorkflowDefinition::builder("W")
            .and_all(
                "fanout",
                vec![
                    Step::new("ok", |_ctx: StepContext| async { Ok(json!(1)) }),
                    Step::new("bad", |_ctx: StepContext| async {
                        Err(StepwiseError::step("nope"))
                    }),
                ],
            )
            .build()
            .unwrap();
        let store = Arc::new(MemoryExecutionStore::new());
        let id = ExecutionId::new();
        let ctx = run_context(wf, &id);
        let err = runner(store.clone())
            .run(&ctx, ExecutionRecord::new(id.clone(), "W", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, StepwiseError::ExecutionFailed { ref step_id, .. } if step_id == "bad"));
        assert!(store.load(&id).await.unwrap().unwrap().steps.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let id = ExecutionId::new();
        let ctx = run_context(research_writing(), &id);
        let err = runner(Arc::new(FailingExecutionStore))
            .run(&ctx, ExecutionRecord::new(id, "W", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, StepwiseError::Database(_)));
    }

    #[tokio::test]
    async fn test_streamed_run_emits_step_events() {
        let (channel, mut rx) = ExecutionChannel::new(16);
        let id = ExecutionId::new();
        let ctx = RunContext {
            channel: Some(channel.clone()),
            ..run_context(research_writing(), &id)
        };
        runner(Arc::new(MemoryExecutionStore::new()))
            .run(&ctx, ExecutionRecord::new(id, "W", json!({})))
            .await
            .unwrap();
        channel.close();

        let mut tags = Vec::new();
        while let Some(event) = rx.recv().await {
            tags.push(event.event_type().to_string());
        }
        assert_eq!(
            tags,
            vec!["step-start", "step-complete", "step-start", "step-complete"]
        );
    }
}
