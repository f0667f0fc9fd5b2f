use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use keystone_api::app::{AppServices, build_app};
use keystone_api::middleware::TokenVerifier;
use keystone_auth::{AccessStore, AuditRecorder, AuditSink, InMemoryAccessStore, TenantContextResolver, TracingAuditSink};
use keystone_infra::{AppConfig, PostgresAccessStore, PostgresAuditSink, RoleSeedingWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keystone_observability::init();

    let config = AppConfig::from_env().context("loading configuration")?;

    match config.database_url.clone() {
        Some(url) => {
            let pool = keystone_infra::connect(&url, config.database_max_connections)
                .await
                .context("connecting to postgres")?;
            let store = PostgresAccessStore::new(pool.clone());
            store.migrate().await.context("applying database schema")?;
            serve(config, Arc::new(store), Arc::new(PostgresAuditSink::new(pool))).await
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store");
            serve(config, Arc::new(InMemoryAccessStore::new()), Arc::new(TracingAuditSink)).await
        }
    }
}

async fn serve<S: AccessStore>(config: AppConfig, store: Arc<S>, sink: Arc<dyn AuditSink>) -> anyhow::Result<()> {
    let (recorder, audit_worker) = AuditRecorder::spawn(sink, config.audit_queue_capacity);
    let services = Arc::new(AppServices::new(store.clone(), recorder));

    let seeding = RoleSeedingWorker::new(TenantContextResolver::new(store), services.members.clone())
        .spawn(&services.events);

    let app = build_app(services, TokenVerifier::hs256(config.jwt_secret.as_bytes()));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    seeding.shutdown().await;
    // The worker drains once every recorder handle is gone.
    if tokio::time::timeout(Duration::from_secs(5), audit_worker).await.is_err() {
        warn!("audit queue did not drain before shutdown");
    }
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
