use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use stepwise_core::error::Result;
use stepwise_core::stream::StreamEvent;
use stepwise_core::types::{ExecutionId, StepLedger};

use crate::controller::SuspendController;
use crate::stream::{EventEmitter, ForwardOutcome};

/// Body of a step.
pub trait StepExecutor: Send + Sync + 'static {
    fn execute(&self, ctx: StepContext) -> BoxFuture<'static, Result<Value>>;
}

/// Adapter for async closures.
pub struct FnStep<F>(pub F);

impl<F, Fut> StepExecutor for FnStep<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn execute(&self, ctx: StepContext) -> BoxFuture<'static, Result<Value>> {
        Box::pin((self.0)(ctx))
    }
}

/// A single named unit of work.
#[derive(Clone)]
pub struct Step {
    pub id: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub suspend_schema: Option<Value>,
    pub resume_schema: Option<Value>,
    executor: Arc<dyn StepExecutor>,
}

impl Step {
    pub fn new<F, Fut>(id: impl Into<String>, body: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::from_executor(id, Arc::new(FnStep(body)))
    }

    pub fn from_executor(id: impl Into<String>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            id: id.into(),
            description: None,
            input_schema: None,
            output_schema: None,
            suspend_schema: None,
            resume_schema: None,
            executor,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_suspend_schema(mut self, schema: Value) -> Self {
        self.suspend_schema = Some(schema);
        self
    }

    pub fn with_resume_schema(mut self, schema: Value) -> Self {
        self.resume_schema = Some(schema);
        self
    }

    pub fn execute(&self, ctx: StepContext) -> BoxFuture<'static, Result<Value>> {
        self.executor.execute(ctx)
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// One position in a workflow's chain.
#[derive(Debug, Clone)]
pub enum StepNode {
    Sequential(Step),
    /// Members share the upstream input; the group completes as a whole.
    Parallel { id: String, steps: Vec<Step> },
}

impl StepNode {
    pub fn id(&self) -> &str {
        match self {
            Self::Sequential(step) => &step.id,
            Self::Parallel { id, .. } => id,
        }
    }

    pub fn steps(&self) -> &[Step] {
        match self {
            Self::Sequential(step) => std::slice::from_ref(step),
            Self::Parallel { steps, .. } => steps,
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel { .. })
    }

    /// Output this node hands downstream: the step's own output, or an object
    /// keyed by member ID for a group. `None` until the node has completed.
    pub fn collect_output(&self, ledger: &StepLedger) -> Option<Value> {
        match self {
            Self::Sequential(step) => ledger.get(&step.id).cloned(),
            Self::Parallel { steps, .. } => {
                let mut out = Map::new();
                for step in steps {
                    out.insert(step.id.clone(), ledger.get(&step.id)?.clone());
                }
                Some(Value::Object(out))
            }
        }
    }
}

/// Per-invocation context handed to a step body.
#[derive(Clone)]
pub struct StepContext {
    data: Value,
    input: Arc<Value>,
    resume_data: Option<Value>,
    execution_id: ExecutionId,
    workflow_id: String,
    step_id: String,
    ledger: Arc<StepLedger>,
    controller: Arc<SuspendController>,
    emitter: EventEmitter,
}

impl StepContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        data: Value,
        input: Arc<Value>,
        resume_data: Option<Value>,
        workflow_id: String,
        step_id: String,
        ledger: Arc<StepLedger>,
        controller: Arc<SuspendController>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            data,
            input,
            resume_data,
            execution_id: controller.execution_id().clone(),
            workflow_id,
            step_id,
            ledger,
            controller,
            emitter,
        }
    }

    /// Previous node's output, the workflow input for the first node, or the
    /// resume payload for a resumed node.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// The workflow's original input.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Resume payload, set only on the node a resume re-enters.
    pub fn resume_data(&self) -> Option<&Value> {
        self.resume_data.as_ref()
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Output of an earlier step, by ID.
    pub fn get_step_data(&self, step_id: &str) -> Option<&Value> {
        self.ledger.get(step_id)
    }

    /// Ask for this execution to suspend at the next step boundary.
    pub fn suspend(&self, reason: impl Into<String>) {
        self.controller.suspend(Some(reason.into()));
    }

    pub fn is_suspend_requested(&self) -> bool {
        self.controller.is_suspend_requested()
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub async fn emit(&self, event: StreamEvent) -> Option<ForwardOutcome> {
        self.emitter.emit(event).await
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("execution_id", &self.execution_id)
            .field("workflow_id", &self.workflow_id)
            .field("step_id", &self.step_id)
            .finish_non_exhaustive()
    }
}
