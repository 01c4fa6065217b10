use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

use stepwise_core::config::EngineConfig;
use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::event::EventBus;
use stepwise_core::traits::ExecutionStore;
use stepwise_core::types::{
    ExecutionId, ExecutionRecord, ExecutionStatus, LifecycleEvent,
};

use crate::controller::SuspendController;
use crate::execution::{ExecutionChannel, WorkflowStream};
use crate::runner::{RunContext, StepChainRunner};
use crate::schema;
use crate::stream::{EventEmitter, EventForwarder, ForwardOptions};
use crate::workflow::{WorkflowDefinition, WorkflowSummary};

/// Workflow definitions plus the controllers of running executions.
///
/// Constructed once and shared by reference; there is no global instance.
pub struct WorkflowRegistry {
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    active: Mutex<HashMap<ExecutionId, Arc<SuspendController>>>,
    store: Arc<dyn ExecutionStore>,
    event_bus: Arc<EventBus>,
    runner: StepChainRunner,
    config: EngineConfig,
}

/// A run prepared by the registry: controller registered, record persisted.
struct PreparedRun {
    definition: Arc<WorkflowDefinition>,
    controller: Arc<SuspendController>,
    record: ExecutionRecord,
}

impl WorkflowRegistry {
    pub fn new(store: Arc<dyn ExecutionStore>, config: EngineConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_bus_capacity));
        Self {
            definitions: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            runner: StepChainRunner::new(store.clone(), event_bus.clone()),
            store,
            event_bus,
            config,
        }
    }

    /// Register a definition. Re-registering an identical definition is a no-op.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<()> {
        let mut definitions = self
            .definitions
            .write()
            .map_err(|_| StepwiseError::Internal("workflow table lock poisoned".into()))?;

        if let Some(existing) = definitions.get(&definition.id) {
            if existing.signature() == definition.signature() {
                return Ok(());
            }
            return Err(StepwiseError::DuplicateWorkflow(definition.id));
        }

        info!(workflow_id = %definition.id, steps = definition.nodes().len(), "Registered workflow");
        definitions.insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, workflow_id: &str) -> Result<Arc<WorkflowDefinition>> {
        self.definitions
            .read()
            .map_err(|_| StepwiseError::Internal("workflow table lock poisoned".into()))?
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| StepwiseError::WorkflowNotFound(workflow_id.to_string()))
    }

    /// Summaries sorted by workflow ID.
    pub fn list(&self) -> Vec<WorkflowSummary> {
        let definitions = self.definitions.read().unwrap_or_else(|e| e.into_inner());
        let mut summaries: Vec<_> = definitions.values().map(|d| d.summary()).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_bus.subscribe()
    }

    /// Allocate and register a controller for `execution_id`.
    pub fn create_controller(&self, execution_id: &ExecutionId) -> Result<Arc<SuspendController>> {
        self.install(Arc::new(SuspendController::new(execution_id.clone())))
    }

    fn install(&self, controller: Arc<SuspendController>) -> Result<Arc<SuspendController>> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let id = controller.execution_id().clone();
        if active.contains_key(&id) {
            return Err(StepwiseError::ExecutionAlreadyActive(id.to_string()));
        }
        active.insert(id, controller.clone());
        Ok(controller)
    }

    /// Signal suspension and deregister the controller. The runner stops at
    /// its next step boundary.
    pub fn suspend(&self, execution_id: &ExecutionId, reason: Option<String>) -> Result<()> {
        let controller = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(execution_id)
            .ok_or_else(|| StepwiseError::NoActiveExecution(execution_id.to_string()))?;

        info!(execution_id = %execution_id, "Suspend requested");
        controller.suspend(reason);
        Ok(())
    }

    pub fn is_active(&self, execution_id: &ExecutionId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(execution_id)
    }

    /// Remove the controller, unless it has since been replaced.
    fn release(&self, controller: &Arc<SuspendController>) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = active.get(controller.execution_id()) {
            if Arc::ptr_eq(current, controller) {
                active.remove(controller.execution_id());
            }
        }
    }

    async fn prepare_start(&self, workflow_id: &str, input: Value) -> Result<PreparedRun> {
        let definition = self.get(workflow_id)?;
        schema::validate_optional(definition.input_schema.as_ref(), &input, "workflow input")?;

        let execution_id = ExecutionId::new();
        let controller = self.create_controller(&execution_id)?;
        let record = ExecutionRecord::new(execution_id.clone(), workflow_id, input);
        if let Err(e) = self.store.save(&record).await {
            self.release(&controller);
            return Err(e);
        }

        info!(execution_id = %execution_id, workflow_id, "Execution created");
        self.event_bus.publish(LifecycleEvent::ExecutionCreated {
            execution_id,
            workflow_id: workflow_id.to_string(),
        });
        Ok(PreparedRun {
            definition,
            controller,
            record,
        })
    }

    async fn prepare_resume(
        &self,
        workflow_id: &str,
        execution_id: &ExecutionId,
        resume_data: Value,
        from_step_id: Option<&str>,
    ) -> Result<PreparedRun> {
        let definition = self.get(workflow_id)?;
        let mut record = self
            .store
            .load(execution_id)
            .await?
            .filter(|r| r.workflow_id == workflow_id)
            .ok_or_else(|| StepwiseError::ExecutionNotFound(execution_id.to_string()))?;

        if record.status != ExecutionStatus::Suspended {
            return Err(StepwiseError::NotSuspended {
                execution_id: execution_id.to_string(),
                status: record.status.to_string(),
            });
        }

        if let Some(step_id) = from_step_id {
            record.cursor = definition.node_index(step_id).ok_or_else(|| {
                StepwiseError::Validation(format!(
                    "step {step_id} not found in workflow {workflow_id}"
                ))
            })?;
        }

        if let Some(node) = definition.nodes().get(record.cursor) {
            for step in node.steps() {
                schema::validate_optional(
                    step.resume_schema.as_ref(),
                    &resume_data,
                    &format!("resume data of {}", step.id),
                )?;
            }
        }

        let controller = self.install(Arc::new(SuspendController::resuming(
            execution_id.clone(),
            resume_data,
        )))?;

        record.status = ExecutionStatus::Running;
        record.suspension = None;
        if let Err(e) = self.store.save(&record).await {
            self.release(&controller);
            return Err(e);
        }

        let step_id = definition
            .nodes()
            .get(record.cursor)
            .map(|n| n.id().to_string());
        info!(
            execution_id = %execution_id,
            workflow_id,
            step_id = step_id.as_deref().unwrap_or(""),
            "Resuming execution"
        );
        self.event_bus.publish(LifecycleEvent::Resumed {
            execution_id: execution_id.clone(),
            step_id,
        });

        Ok(PreparedRun {
            definition,
            controller,
            record,
        })
    }

    async fn drive(&self, run: PreparedRun, channel: Option<ExecutionChannel>) -> Result<ExecutionRecord> {
        let emitter = match &channel {
            Some(channel) => EventEmitter::new(Arc::new(EventForwarder::new(
                Arc::new(channel.clone()),
                ForwardOptions::from_config(&self.config),
            ))),
            None => EventEmitter::detached(),
        };
        let ctx = RunContext {
            definition: run.definition,
            controller: run.controller.clone(),
            emitter,
            channel: channel.clone(),
        };

        let outcome = self.runner.run(&ctx, run.record).await;
        self.release(&run.controller);
        if let Some(channel) = channel {
            channel.close();
        }
        outcome
    }

    /// Run a workflow to completion, failure, or suspension.
    pub async fn execute(&self, workflow_id: &str, input: Value) -> Result<ExecutionRecord> {
        let run = self.prepare_start(workflow_id, input).await?;
        self.drive(run, None).await
    }

    /// Start a workflow on a background task and return its live event sequence.
    pub async fn stream(self: &Arc<Self>, workflow_id: &str, input: Value) -> Result<WorkflowStream> {
        let run = self.prepare_start(workflow_id, input).await?;
        Ok(self.spawn(run))
    }

    /// Continue a suspended execution. `resume_data` becomes the data of the
    /// node at the saved cursor, or at `from_step_id` when given.
    pub async fn resume(
        &self,
        workflow_id: &str,
        execution_id: &ExecutionId,
        resume_data: Value,
        from_step_id: Option<&str>,
    ) -> Result<ExecutionRecord> {
        let run = self
            .prepare_resume(workflow_id, execution_id, resume_data, from_step_id)
            .await?;
        self.drive(run, None).await
    }

    pub async fn resume_stream(
        self: &Arc<Self>,
        workflow_id: &str,
        execution_id: &ExecutionId,
        resume_data: Value,
        from_step_id: Option<&str>,
    ) -> Result<WorkflowStream> {
        let run = self
            .prepare_resume(workflow_id, execution_id, resume_data, from_step_id)
            .await?;
        Ok(self.spawn(run))
    }

    fn spawn(self: &Arc<Self>, run: PreparedRun) -> WorkflowStream {
        let (channel, events) = ExecutionChannel::new(self.config.stream_buffer);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let execution_id = run.record.execution_id.clone();
        let workflow_id = run.record.workflow_id.clone();

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = registry.drive(run, Some(channel)).await;
            if outcome_tx.send(outcome).is_err() {
                warn!("Stream consumer dropped before the execution finished");
            }
        });

        WorkflowStream::new(execution_id, workflow_id, events, outcome_rx)
    }

    /// Persisted snapshot of an execution of `workflow_id`.
    pub async fn execution_state(
        &self,
        workflow_id: &str,
        execution_id: &ExecutionId,
    ) -> Result<ExecutionRecord> {
        self.get(workflow_id)?;
        self.store
            .load(execution_id)
            .await?
            .filter(|r| r.workflow_id == workflow_id)
            .ok_or_else(|| StepwiseError::ExecutionNotFound(execution_id.to_string()))
    }

    pub async fn list_executions(&self, workflow_id: &str) -> Result<Vec<ExecutionRecord>> {
        self.get(workflow_id)?;
        self.store.list_by_workflow(workflow_id).await
    }
}
