//! Audit trail for access-control mutations.
//!
//! Records are redacted, then handed to a bounded background queue. Emission
//! never blocks or fails the mutation that produced it: a full queue, a closed
//! worker or a failing sink is logged and the record is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use keystone_core::{OrganizationId, UserId};

pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwordhash",
    "token",
    "secret",
    "accesstoken",
    "refreshtoken",
    "idtoken",
];

/// Case-insensitive key match; `_` and `-` separators are ignored.
pub fn is_sensitive_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    SENSITIVE_KEYS.contains(&normalized.as_str())
}

/// Copy of `value` with every sensitive key replaced by [`REDACTED`], at any
/// depth including inside arrays.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_key(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    User(UserId),
    System,
}

impl Actor {
    pub fn actor_type(&self) -> &'static str {
        match self {
            Actor::User(_) => "user",
            Actor::System => "system",
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::User(id) => Some(*id),
            Actor::System => None,
        }
    }
}

/// One append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub actor_id: Option<UserId>,
    pub actor_type: String,
    pub action: String,
    pub resource: String,
    pub resource_id: String,
    pub organization_id: Option<OrganizationId>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        actor: Actor,
        action: impl Into<String>,
        resource: impl Into<String>,
        resource_id: impl ToString,
    ) -> Self {
        Self {
            actor_id: actor.user_id(),
            actor_type: actor.actor_type().to_string(),
            action: action.into(),
            resource: resource.into(),
            resource_id: resource_id.to_string(),
            organization_id: None,
            before: None,
            after: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn in_organization(mut self, organization_id: OrganizationId) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn before<T: Serialize>(mut self, value: &T) -> Self {
        self.before = serde_json::to_value(value).ok();
        self
    }

    pub fn after<T: Serialize>(mut self, value: &T) -> Self {
        self.after = serde_json::to_value(value).ok();
        self
    }

    /// Same record with `before` and `after` redacted.
    pub fn redacted(mut self) -> Self {
        self.before = self.before.as_ref().map(redact);
        self.after = self.after.as_ref().map(redact);
        self
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit sink failed: {0}")]
    Sink(String),
}

/// Where audit records end up (database table, log stream, test buffer).
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// Fire-and-forget handle used by the mutator.
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditRecorder {
    /// Start the background writer. The worker exits once every recorder
    /// clone has been dropped and the queue is drained.
    pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AuditRecord>(capacity.max(1));

        let handle = tokio::spawn(async move {
            info!("audit worker started");
            while let Some(record) = rx.recv().await {
                let action = record.action.clone();
                if let Err(e) = sink.append(record).await {
                    error!(action = %action, error = %e, "audit record lost");
                }
            }
            info!("audit worker stopped");
        });

        (Self { tx }, handle)
    }

    /// Queue a record. Never fails the caller.
    pub fn emit(&self, record: AuditRecord) {
        let record = record.redacted();
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                warn!(action = %record.action, "audit queue full, record dropped");
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                error!(action = %record.action, "audit worker gone, record dropped");
            }
        }
    }
}

/// Sink that writes records as structured log events.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let before = record.before.map(|v| v.to_string()).unwrap_or_default();
        let after = record.after.map(|v| v.to_string()).unwrap_or_default();
        info!(
            target: "audit",
            actor_type = %record.actor_type,
            actor_id = ?record.actor_id,
            action = %record.action,
            resource = %record.resource,
            resource_id = %record.resource_id,
            organization_id = ?record.organization_id,
            before = %before,
            after = %after,
            "audit"
        );
        Ok(())
    }
}

/// Buffering sink for tests and local runs. Can be told to fail.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Sink("memory sink set to fail".into()));
        }
        self.records.lock().await.push(record);
        Ok(())
    }
}
