use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::sync::RwLock;

use stepwise_core::error::Result;
use stepwise_core::traits::ExecutionStore;
use stepwise_core::types::{ExecutionId, ExecutionRecord};

/// In-process execution history. Lost on restart.
#[derive(Default)]
pub struct MemoryExecutionStore {
    records: RwLock<HashMap<ExecutionId, ExecutionRecord>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl ExecutionStore for MemoryExecutionStore {
    fn save(&self, record: &ExecutionRecord) -> BoxFuture<'_, Result<()>> {
        let record = record.clone();
        Box::pin(async move {
            self.records
                .write()
                .await
                .insert(record.execution_id.clone(), record);
            Ok(())
        })
    }

    fn load(&self, execution_id: &ExecutionId) -> BoxFuture<'_, Result<Option<ExecutionRecord>>> {
        let execution_id = execution_id.clone();
        Box::pin(async move { Ok(self.records.read().await.get(&execution_id).cloned()) })
    }

    fn list_by_workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<Vec<ExecutionRecord>>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            let mut records: Vec<_> = self
                .records
                .read()
                .await
                .values()
                .filter(|r| r.workflow_id == workflow_id)
                .cloned()
                .collect();
            records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            Ok(records)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_roundtrip_and_listing() {
        let store = MemoryExecutionStore::new();
        assert!(store.is_empty().await);

        let a = ExecutionRecord::new(ExecutionId::new(), "w", json!(1));
        let mut b = ExecutionRecord::new(ExecutionId::new(), "w", json!(2));
        b.started_at = a.started_at + chrono::Duration::seconds(5);
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();
        store
            .save(&ExecutionRecord::new(ExecutionId::new(), "x", json!(3)))
            .await
            .unwrap();

        assert_eq!(store.len().await, 3);
        assert_eq!(store.load(&a.execution_id).await.unwrap(), Some(a.clone()));
        let listed = store.list_by_workflow("w").await.unwrap();
        assert_eq!(listed, vec![b, a]);
    }
}
