use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique execution identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of one execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed executions never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "suspended" => Some(Self::Suspended),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed step in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepOutput {
    pub step_id: String,
    pub output: serde_json::Value,
    pub completed_at: DateTime<Utc>,
}

/// Ordered stepId -> output map. Insertion order is completion order.
///
/// Entries are never removed or reordered. Re-running a step that already has
/// an entry (resume with an explicit `fromStepId`) replaces its output in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct StepLedger {
    entries: Vec<StepOutput>,
}

impl StepLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step_id: impl Into<String>, output: serde_json::Value) {
        let step_id = step_id.into();
        let completed_at = Utc::now();
        if let Some(existing) = self.entries.iter_mut().find(|e| e.step_id == step_id) {
            existing.output = output;
            existing.completed_at = completed_at;
            return;
        }
        self.entries.push(StepOutput {
            step_id,
            output,
            completed_at,
        });
    }

    pub fn get(&self, step_id: &str) -> Option<&serde_json::Value> {
        self.entries
            .iter()
            .find(|e| e.step_id == step_id)
            .map(|e| &e.output)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.get(step_id).is_some()
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.step_id.as_str()).collect()
    }

    pub fn entries(&self) -> &[StepOutput] {
        &self.entries
    }

    pub fn last(&self) -> Option<&StepOutput> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Why and when an execution was suspended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuspensionInfo {
    pub reason: Option<String>,
    pub suspended_at: DateTime<Utc>,
    /// The step that will run first on resume.
    pub step_id: Option<String>,
}

/// Persistent state of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub execution_id: ExecutionId,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub input: serde_json::Value,
    pub steps: StepLedger,
    /// Index of the next step node to run.
    pub cursor: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspension: Option<SuspensionInfo>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn new(
        execution_id: ExecutionId,
        workflow_id: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            execution_id,
            workflow_id: workflow_id.into(),
            status: ExecutionStatus::Running,
            input,
            steps: StepLedger::new(),
            cursor: 0,
            suspension: None,
            started_at: Utc::now(),
            ended_at: None,
            result: None,
            error: None,
        }
    }
}

/// Lifecycle notification published by the registry.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    ExecutionCreated {
        execution_id: ExecutionId,
        workflow_id: String,
    },
    StepCompleted {
        execution_id: ExecutionId,
        step_id: String,
    },
    Suspended {
        execution_id: ExecutionId,
        reason: Option<String>,
    },
    Resumed {
        execution_id: ExecutionId,
        step_id: Option<String>,
    },
    Completed {
        execution_id: ExecutionId,
    },
    Failed {
        execution_id: ExecutionId,
        error: String,
    },
}

impl LifecycleEvent {
    pub fn execution_id(&self) -> &ExecutionId {
        match self {
            Self::ExecutionCreated { execution_id, .. }
            | Self::StepCompleted { execution_id, .. }
            | Self::Suspended { execution_id, .. }
            | Self::Resumed { execution_id, .. }
            | Self::Completed { execution_id }
            | Self::Failed { execution_id, .. } => execution_id,
        }
    }
}
