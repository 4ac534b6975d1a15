use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use switchboard_agent::consent::ConsentGate;
use switchboard_agent::{AgentRuntime, Dispatcher};
use switchboard_core::config::{AppConfig, ConfigError, LoadOptions};
use switchboard_core::errors::ApplicationError;
use switchboard_core::feature_flags::FeatureFlagGate;
use switchboard_db::{
    connect_with_config, migrations, DbPool, RepositoryError, RolloutRepository,
    SqlHandoffRepository, SqlRolloutRepository,
};
use thiserror::Error;
use tracing::info;

use crate::api::{self, AppState};
use crate::health::{self, HealthState};
use crate::sessions::SessionRegistry;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

impl Application {
    pub fn router(&self) -> Router {
        let health = HealthState {
            db_pool: self.db_pool.clone(),
            gate: Arc::clone(self.state.dispatcher.gate()),
            sessions: Arc::clone(&self.state.sessions),
        };
        api::router(self.state.clone()).merge(health::router(health))
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("failed to load persisted rollout: {0}")]
    RolloutLoad(#[source] RepositoryError),
    #[error("agent runtime misconfigured: {0}")]
    Runtime(#[source] ApplicationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let rollout_repo = Arc::new(SqlRolloutRepository::new(db_pool.clone()));
    let rollout = rollout_repo
        .load(config.rollout.initial_percentage)
        .await
        .map_err(BootstrapError::RolloutLoad)?;
    info!(
        event_name = "system.bootstrap.rollout_loaded",
        correlation_id = "bootstrap",
        rollout_percentage = rollout.rollout_percentage,
        overrides = rollout.overrides.len(),
        "rollout configuration loaded"
    );

    let runtime = AgentRuntime::builder(config.orchestration.clone())
        .consent(Arc::new(ConsentGate::from_config(&config.consent)))
        .build()
        .map_err(BootstrapError::Runtime)?;
    let dispatcher =
        Dispatcher::with_runtime(Arc::new(FeatureFlagGate::new(rollout)), Arc::new(runtime));

    let state = AppState::new(
        Arc::new(dispatcher),
        Arc::new(SessionRegistry::new(Duration::from_secs(config.server.session_idle_secs))),
        Arc::new(SqlHandoffRepository::new(db_pool.clone())),
        rollout_repo,
        config.admin.api_token.clone(),
    );

    Ok(Application { config, db_pool, state })
}
