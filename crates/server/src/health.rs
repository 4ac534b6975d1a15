use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use switchboard_core::feature_flags::FeatureFlagGate;
use switchboard_db::DbPool;

use crate::sessions::SessionRegistry;

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub gate: Arc<FeatureFlagGate>,
    pub sessions: Arc<SessionRegistry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub rollout: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: format!(
                "switchboard-server tracking {} conversations",
                state.sessions.conversation_count()
            ),
        },
        database,
        rollout: rollout_check(&state.gate),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

/// Informational only: an unreadable gate routes everyone to the fallback
/// but does not make the service unhealthy.
fn rollout_check(gate: &FeatureFlagGate) -> HealthCheck {
    match gate.snapshot() {
        Ok(config) => HealthCheck {
            status: "ready",
            detail: format!(
                "multi-specialist rollout at {}% with {} overrides",
                config.rollout_percentage,
                config.overrides.len()
            ),
        },
        Err(error) => HealthCheck { status: "degraded", detail: error.to_string() },
    }
}
