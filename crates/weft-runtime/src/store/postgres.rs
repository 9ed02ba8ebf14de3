use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;
use weft_core::{
    InstanceSnapshot, InstanceStore, Result, StoreFuture, WeftError, WorkflowInstance,
    WorkflowStatus,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS weft_workflow_instances (
    id UUID PRIMARY KEY,
    workflow_name VARCHAR(255) NOT NULL,
    status VARCHAR(32) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    snapshot JSONB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_weft_instances_workflow_name
    ON weft_workflow_instances(workflow_name);
CREATE INDEX IF NOT EXISTS idx_weft_instances_status
    ON weft_workflow_instances(status);
"#;

/// PostgreSQL instance store. One row per instance; the full snapshot lives
/// in a JSONB column next to indexed lookup columns.
#[derive(Clone)]
pub struct PgInstanceStore {
    pool: PgPool,
}

impl PgInstanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, pool_size: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
            .map_err(|e| WeftError::Storage(format!("Failed to connect: {}", e)))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the instance table and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| WeftError::Storage(format!("Migration failed: {}", e)))?;
        }
        tracing::debug!("Instance store schema ready");
        Ok(())
    }
}

fn storage_error(e: sqlx::Error) -> WeftError {
    WeftError::Storage(e.to_string())
}

fn decode_row(row: &PgRow) -> Result<WorkflowInstance> {
    let value: serde_json::Value = row.get("snapshot");
    let snapshot: InstanceSnapshot = serde_json::from_value(value)?;
    WorkflowInstance::from_snapshot(snapshot)
}

fn decode_rows(rows: Vec<PgRow>) -> Result<Vec<WorkflowInstance>> {
    rows.iter().map(decode_row).collect()
}

impl InstanceStore for PgInstanceStore {
    fn save<'a>(&'a self, instance: &'a WorkflowInstance) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let snapshot = serde_json::to_value(instance.to_snapshot())?;

            sqlx::query(
                r#"
                INSERT INTO weft_workflow_instances (
                    id, workflow_name, status, created_at, updated_at, snapshot
                ) VALUES ($1, $2, $3, $4, NOW(), $5)
                ON CONFLICT (id) DO UPDATE SET
                    status = EXCLUDED.status,
                    updated_at = NOW(),
                    snapshot = EXCLUDED.snapshot
                "#,
            )
            .bind(instance.id())
            .bind(instance.workflow_name())
            .bind(instance.status().as_str())
            .bind(instance.created_at())
            .bind(snapshot)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

            Ok(())
        })
    }

    fn find_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<WorkflowInstance>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT snapshot FROM weft_workflow_instances WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;

            row.as_ref().map(decode_row).transpose()
        })
    }

    fn find_by_workflow_name<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Vec<WorkflowInstance>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r#"
                SELECT snapshot FROM weft_workflow_instances
                WHERE workflow_name = $1
                ORDER BY created_at, id
                "#,
            )
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

            decode_rows(rows)
        })
    }

    fn find_by_status(&self, status: WorkflowStatus) -> StoreFuture<'_, Vec<WorkflowInstance>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r#"
                SELECT snapshot FROM weft_workflow_instances
                WHERE status = $1
                ORDER BY created_at, id
                "#,
            )
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

            decode_rows(rows)
        })
    }

    fn delete_by_id(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM weft_workflow_instances WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;

            Ok(result.rows_affected() > 0)
        })
    }

    fn exists_by_id(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT EXISTS(SELECT 1 FROM weft_workflow_instances WHERE id = $1) AS present",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

            Ok(row.get("present"))
        })
    }

    fn count(&self) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let row = sqlx::query("SELECT COUNT(*) AS total FROM weft_workflow_instances")
                .fetch_one(&self.pool)
                .await
                .map_err(storage_error)?;

            let total: i64 = row.get("total");
            Ok(total.max(0) as u64)
        })
    }

    fn count_by_status(&self, status: WorkflowStatus) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT COUNT(*) AS total FROM weft_workflow_instances WHERE status = $1",
            )
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

            let total: i64 = row.get("total");
            Ok(total.max(0) as u64)
        })
    }
}
