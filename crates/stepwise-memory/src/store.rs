use std::path::Path;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use stepwise_core::error::{Result, StepwiseError};
use stepwise_core::traits::ExecutionStore;
use stepwise_core::types::{ExecutionId, ExecutionRecord};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS executions (
        execution_id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        record TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_executions_workflow
        ON executions(workflow_id, started_at);";

/// SQLite-backed execution history. One row per execution, holding the
/// latest snapshot of its record.
pub struct SqliteExecutionStore {
    conn: Mutex<Connection>,
}

impl SqliteExecutionStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StepwiseError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        let store = Self::init(conn)?;

        debug!(path = %path.display(), "Execution store opened");
        Ok(store)
    }

    /// Open an in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored executions.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| StepwiseError::Database(e.to_string()))?;
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM executions", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(n as usize)
    }
}

fn db_err(e: rusqlite::Error) -> StepwiseError {
    StepwiseError::Database(e.to_string())
}

fn decode(json: &str) -> Result<ExecutionRecord> {
    serde_json::from_str(json)
        .map_err(|e| StepwiseError::Database(format!("Corrupt execution record: {}", e)))
}

impl ExecutionStore for SqliteExecutionStore {
    fn save(&self, record: &ExecutionRecord) -> BoxFuture<'_, Result<()>> {
        let execution_id = record.execution_id.to_string();
        let workflow_id = record.workflow_id.clone();
        let status = record.status.as_str();
        let started_at = record.started_at.to_rfc3339_opts(SecondsFormat::Micros, true);
        let json = serde_json::to_string(record);

        Box::pin(async move {
            let json = json?;
            let updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
            let conn = self
                .conn
                .lock()
                .map_err(|e| StepwiseError::Database(e.to_string()))?;
            conn.execute(
                "INSERT INTO executions (execution_id, workflow_id, status, started_at, updated_at, record)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(execution_id) DO UPDATE SET
                    status = excluded.status,
                    updated_at = excluded.updated_at,
                    record = excluded.record",
                params![execution_id, workflow_id, status, started_at, updated_at, json],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn load(&self, execution_id: &ExecutionId) -> BoxFuture<'_, Result<Option<ExecutionRecord>>> {
        let execution_id = execution_id.to_string();
        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| StepwiseError::Database(e.to_string()))?;
            let json: Option<String> = conn
                .query_row(
                    "SELECT record FROM executions WHERE execution_id = ?1",
                    params![execution_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            json.as_deref().map(decode).transpose()
        })
    }

    fn list_by_workflow(&self, workflow_id: &str) -> BoxFuture<'_, Result<Vec<ExecutionRecord>>> {
        let workflow_id = workflow_id.to_string();
        Box::pin(async move {
            let conn = self
                .conn
                .lock()
                .map_err(|e| StepwiseError::Database(e.to_string()))?;
            let mut stmt = conn
                .prepare(
                    "SELECT record FROM executions
                     WHERE workflow_id = ?1
                     ORDER BY started_at DESC, rowid DESC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![workflow_id], |row| row.get::<_, String>(0))
                .map_err(db_err)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(decode(&row.map_err(db_err)?)?);
            }
            Ok(records)
        })
    }
}
