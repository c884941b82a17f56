use std::sync::Arc;

use airloop_agent::ConversationRuntime;
use airloop_core::audit::{AuditSink, NoopAuditSink, TracingAuditSink};
use airloop_core::config::{AppConfig, ConfigError};
use airloop_core::errors::ApplicationError;
use airloop_db::{
    connect_with_config, migrations, DbPool, SqlBookingRepository, SqlSessionRepository,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: ConversationRuntime,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("conversation runtime could not be assembled: {0}")]
    Runtime(#[source] ApplicationError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        session_id = "unknown",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        session_id = "unknown",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        session_id = "unknown",
        "database migrations applied"
    );

    let runtime = build_runtime(&config, db_pool.clone()).map_err(BootstrapError::Runtime)?;
    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        session_id = "unknown",
        agents = runtime.registry().agents().count(),
        model = %config.agents.model,
        "conversation runtime assembled"
    );

    Ok(Application { config, db_pool, runtime })
}

/// Wires the airline deployment to the SQL stores.
pub fn build_runtime(
    config: &AppConfig,
    db_pool: DbPool,
) -> Result<ConversationRuntime, ApplicationError> {
    let audit: Arc<dyn AuditSink> = if config.observability.audit_enabled {
        Arc::new(TracingAuditSink)
    } else {
        Arc::new(NoopAuditSink)
    };

    ConversationRuntime::airline_default(
        config,
        Arc::new(SqlBookingRepository::new(db_pool.clone())),
        Arc::new(SqlSessionRepository::new(db_pool)),
        audit,
    )
}
