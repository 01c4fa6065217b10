use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use stepwise_core::types::ExecutionId;

/// Per-execution suspension handle.
///
/// The runner polls [`is_suspend_requested`](Self::is_suspend_requested) at
/// step boundaries; nothing here interrupts a step that is already running.
pub struct SuspendController {
    execution_id: ExecutionId,
    token: CancellationToken,
    reason: Mutex<Option<String>>,
    resume_data: Mutex<Option<serde_json::Value>>,
}

impl SuspendController {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            token: CancellationToken::new(),
            reason: Mutex::new(None),
            resume_data: Mutex::new(None),
        }
    }

    /// Controller for a resumed execution, carrying the resume payload.
    pub fn resuming(execution_id: ExecutionId, resume_data: serde_json::Value) -> Self {
        let controller = Self::new(execution_id);
        *controller
            .resume_data
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(resume_data);
        controller
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    /// The cancellation signal. Cloned tokens observe the same state.
    pub fn signal(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request suspension. The first reason given wins.
    pub fn suspend(&self, reason: Option<String>) {
        {
            let mut slot = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = reason;
            }
        }
        self.token.cancel();
    }

    pub fn is_suspend_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<String> {
        self.reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Take the resume payload, leaving the slot empty.
    pub fn take_resume_data(&self) -> Option<serde_json::Value> {
        self.resume_data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

impl std::fmt::Debug for SuspendController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspendController")
            .field("execution_id", &self.execution_id)
            .field("suspend_requested", &self.is_suspend_requested())
            .field("reason", &self.reason())
            .finish()
    }
}
