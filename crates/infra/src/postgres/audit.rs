use async_trait::async_trait;
use sqlx::PgPool;

use keystone_auth::{AuditError, AuditRecord, AuditSink};

/// Appends audit records to the `audit_logs` table.
#[derive(Debug, Clone)]
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, actor_id, actor_type, action, resource, resource_id, organization_id, before, after, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(record.actor_id.map(|id| *id.as_uuid()))
        .bind(&record.actor_type)
        .bind(&record.action)
        .bind(&record.resource)
        .bind(&record.resource_id)
        .bind(record.organization_id.map(|id| *id.as_uuid()))
        .bind(&record.before)
        .bind(&record.after)
        .bind(record.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::Sink(e.to_string()))?;
        Ok(())
    }
}
