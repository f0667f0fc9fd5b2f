//! Infrastructure layer: configuration, Postgres persistence, background workers.

pub mod config;
pub mod postgres;
pub mod workers;

pub use config::{AppConfig, ConfigError};
pub use postgres::{PgAccessTx, PostgresAccessStore, PostgresAuditSink, connect};
pub use workers::{RetryPolicy, RoleSeedingWorker, WorkerHandle};
