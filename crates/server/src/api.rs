//! JSON API for chat turns, handoff history and rollout administration.
//!
//! - `POST   /v1/conversations/{id}/turns`            run one user turn
//! - `GET    /v1/conversations/{id}/handoffs`         persisted handoff history
//! - `GET    /v1/analytics/handoffs?since&until`      path counts in a window
//! - `GET    /v1/admin/rollout`                       percentage and overrides
//! - `PUT    /v1/admin/rollout`                       set the percentage
//! - `GET    /v1/admin/rollout/overrides/{user_id}`   read one override
//! - `PUT    /v1/admin/rollout/overrides/{user_id}`   set one override
//! - `DELETE /v1/admin/rollout/overrides/{user_id}`   clear one override
//!
//! Admin routes require `Authorization: Bearer <admin.api_token>` and are
//! disabled when no token is configured.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use switchboard_agent::{Dispatcher, ResponsePath, TurnOutcome};
use switchboard_core::domain::conversation::ConversationId;
use switchboard_core::domain::handoff::HandoffRecord;
use switchboard_core::errors::{ApplicationError, InterfaceError};
use switchboard_core::feature_flags::{validate_percentage, FeatureFlagGate, RolloutError};
use switchboard_db::{HandoffPathCount, HandoffRepository, RepositoryError, RolloutRepository};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::sessions::SessionRegistry;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<SessionRegistry>,
    pub handoffs: Arc<dyn HandoffRepository>,
    pub rollout: Arc<dyn RolloutRepository>,
    pub admin_token: Option<SecretString>,
    /// Held across the store write and the gate swap so concurrent admin
    /// writes land in both places in the same order.
    admin_writes: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sessions: Arc<SessionRegistry>,
        handoffs: Arc<dyn HandoffRepository>,
        rollout: Arc<dyn RolloutRepository>,
        admin_token: Option<SecretString>,
    ) -> Self {
        Self {
            dispatcher,
            sessions,
            handoffs,
            rollout,
            admin_token,
            admin_writes: Arc::new(Mutex::new(())),
        }
    }

    fn gate(&self) -> &Arc<FeatureFlagGate> {
        self.dispatcher.gate()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/conversations/{conversation_id}/turns", post(run_turn))
        .route("/v1/conversations/{conversation_id}/handoffs", get(list_handoffs))
        .route("/v1/analytics/handoffs", get(handoff_analytics))
        .route("/v1/admin/rollout", get(get_rollout).put(set_rollout))
        .route(
            "/v1/admin/rollout/overrides/{user_id}",
            put(set_override).get(get_override).delete(clear_override),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Interface(InterfaceError),
    Unauthorized { message: &'static str, correlation_id: String },
    AdminDisabled { correlation_id: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
    pub correlation_id: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::Interface(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn unavailable(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::Interface(InterfaceError::ServiceUnavailable {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        Self::Interface(error.into_interface(correlation_id))
    }

    fn from_repository(error: RepositoryError, correlation_id: &str) -> Self {
        Self::unavailable(error.to_string(), correlation_id)
    }

    fn from_rollout(error: RolloutError, correlation_id: &str) -> Self {
        match error {
            RolloutError::InvalidPercentage(_) => Self::bad_request(error.to_string(), correlation_id),
            other => Self::Interface(InterfaceError::Internal {
                message: other.to_string(),
                correlation_id: correlation_id.to_string(),
            }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Interface(error) => {
                let status = match &error {
                    InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
                    InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
                    InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let detail = match &error {
                    InterfaceError::BadRequest { message, .. }
                    | InterfaceError::Conflict { message, .. }
                    | InterfaceError::ServiceUnavailable { message, .. }
                    | InterfaceError::Internal { message, .. } => message.clone(),
                };
                let body = ErrorBody {
                    error: error.user_message().to_string(),
                    detail,
                    correlation_id: error.correlation_id().to_string(),
                };
                (status, body)
            }
            Self::Unauthorized { message, correlation_id } => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    error: "Admin credentials are missing or invalid.".to_string(),
                    detail: message.to_string(),
                    correlation_id,
                },
            ),
            Self::AdminDisabled { correlation_id } => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    error: "Rollout administration is disabled.".to_string(),
                    detail: "admin.api_token is not configured".to_string(),
                    correlation_id,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("req-{}", uuid::Uuid::new_v4()))
}

// ---------------------------------------------------------------------------
// Turns
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub user_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TurnResponse {
    pub conversation_id: String,
    pub correlation_id: String,
    pub path: ResponsePath,
    pub handoff_count: usize,
    #[serde(flatten)]
    pub turn: TurnOutcome,
}

async fn run_turn(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let conversation_id = parse_conversation_id(&conversation_id, &correlation_id)?;
    let user_id = request.user_id.as_deref().map(str::trim).filter(|id| !id.is_empty());

    let mut lease = state.sessions.checkout(&conversation_id, user_id).map_err(|busy| {
        warn!(
            event_name = "server.turn.conflict",
            correlation_id = %correlation_id,
            conversation_id = %conversation_id.0,
            "turn rejected while another turn is running"
        );
        ApiError::from_application(ApplicationError::Conflict(busy.to_string()), &correlation_id)
    })?;

    let outcome = state
        .dispatcher
        .handle(user_id, lease.state_mut(), &request.message, &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    state
        .handoffs
        .append_all(&conversation_id, &outcome.turn.accepted_handoffs)
        .await
        .map_err(|error| {
            warn!(
                event_name = "server.turn.persist_failed",
                correlation_id = %correlation_id,
                conversation_id = %conversation_id.0,
                error = %error,
                "handoff records not stored; conversation rolled back"
            );
            ApiError::from_repository(error, &correlation_id)
        })?;
    lease.commit();

    info!(
        event_name = "server.turn.completed",
        correlation_id = %correlation_id,
        conversation_id = %conversation_id.0,
        path = outcome.path.as_str(),
        final_specialist = %outcome.turn.final_specialist,
        handoffs = outcome.turn.accepted_handoffs.len(),
        "turn completed"
    );

    Ok(Json(TurnResponse {
        conversation_id: conversation_id.0,
        correlation_id,
        path: outcome.path,
        handoff_count: outcome.turn.accepted_handoffs.len(),
        turn: outcome.turn,
    }))
}

fn parse_conversation_id(raw: &str, correlation_id: &str) -> Result<ConversationId, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("conversation id must not be empty", correlation_id));
    }
    Ok(ConversationId(trimmed.to_string()))
}

// ---------------------------------------------------------------------------
// Handoff history and analytics
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HandoffListResponse {
    pub conversation_id: String,
    pub handoffs: Vec<HandoffRecord>,
}

async fn list_handoffs(
    Path(conversation_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HandoffListResponse>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let conversation_id = parse_conversation_id(&conversation_id, &correlation_id)?;
    let handoffs = state
        .handoffs
        .list_for_conversation(&conversation_id)
        .await
        .map_err(|error| ApiError::from_repository(error, &correlation_id))?;

    Ok(Json(HandoffListResponse { conversation_id: conversation_id.0, handoffs }))
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub since: Option<String>,
    pub until: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandoffAnalyticsResponse {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub total: u64,
    pub paths: Vec<HandoffPathCount>,
}

async fn handoff_analytics(
    Query(query): Query<WindowQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HandoffAnalyticsResponse>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let (since, until) = analytics_window(&query, Utc::now())
        .map_err(|message| ApiError::bad_request(message, &correlation_id))?;
    let paths = state
        .handoffs
        .path_counts_between(since, until)
        .await
        .map_err(|error| ApiError::from_repository(error, &correlation_id))?;
    let total = paths.iter().map(|path| path.count).sum();

    Ok(Json(HandoffAnalyticsResponse { since, until, total, paths }))
}

/// Half-open `[since, until)`; defaults to the 24 hours before now.
fn analytics_window(
    query: &WindowQuery,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
    let parse = |name: &str, value: &str| {
        DateTime::parse_from_rfc3339(value.trim())
            .map(|at| at.with_timezone(&Utc))
            .map_err(|error| format!("`{name}` must be an RFC 3339 timestamp: {error}"))
    };
    let until = match query.until.as_deref() {
        Some(value) => parse("until", value)?,
        None => now,
    };
    let since = match query.since.as_deref() {
        Some(value) => parse("since", value)?,
        None => until - Duration::hours(24),
    };
    if since >= until {
        return Err("`since` must be earlier than `until`".to_string());
    }
    Ok((since, until))
}

// ---------------------------------------------------------------------------
// Rollout administration
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct RolloutResponse {
    pub rollout_percentage: u8,
    pub overrides: BTreeMap<String, bool>,
}

#[derive(Debug, Deserialize)]
pub struct SetRolloutRequest {
    pub rollout_percentage: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OverrideResponse {
    pub user_id: String,
    #[serde(rename = "override")]
    pub value: Option<bool>,
    pub effective: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetOverrideRequest {
    pub enabled: bool,
}

fn authorize_admin(headers: &HeaderMap, state: &AppState) -> Result<String, ApiError> {
    let correlation_id = correlation_id(headers);
    let Some(expected) = state.admin_token.as_ref() else {
        return Err(ApiError::AdminDisabled { correlation_id });
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    match provided {
        None => Err(ApiError::Unauthorized { message: "missing bearer token", correlation_id }),
        Some(token) if token != expected.expose_secret() => {
            warn!(
                event_name = "server.admin.unauthorized",
                correlation_id = %correlation_id,
                "rejected admin request with invalid token"
            );
            Err(ApiError::Unauthorized { message: "invalid bearer token", correlation_id })
        }
        Some(_) => Ok(correlation_id),
    }
}

async fn get_rollout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RolloutResponse>, ApiError> {
    let correlation_id = authorize_admin(&headers, &state)?;
    let snapshot =
        state.gate().snapshot().map_err(|error| ApiError::from_rollout(error, &correlation_id))?;
    Ok(Json(RolloutResponse {
        rollout_percentage: snapshot.rollout_percentage,
        overrides: snapshot.overrides.clone(),
    }))
}

async fn set_rollout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SetRolloutRequest>,
) -> Result<Json<RolloutResponse>, ApiError> {
    let correlation_id = authorize_admin(&headers, &state)?;
    let percentage = validate_percentage(request.rollout_percentage)
        .map_err(|error| ApiError::from_rollout(error, &correlation_id))?;

    let _write = state.admin_writes.lock().await;
    state
        .rollout
        .save_percentage(percentage)
        .await
        .map_err(|error| ApiError::from_repository(error, &correlation_id))?;
    let snapshot = state
        .gate()
        .set_rollout_percentage(i64::from(percentage))
        .map_err(|error| ApiError::from_rollout(error, &correlation_id))?;

    Ok(Json(RolloutResponse {
        rollout_percentage: snapshot.rollout_percentage,
        overrides: snapshot.overrides.clone(),
    }))
}

async fn get_override(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OverrideResponse>, ApiError> {
    let correlation_id = authorize_admin(&headers, &state)?;
    let user_id = parse_user_id(&user_id, &correlation_id)?;
    let value = state
        .gate()
        .get_override(&user_id)
        .map_err(|error| ApiError::from_rollout(error, &correlation_id))?;
    let effective = state.gate().is_enabled(Some(&user_id));

    Ok(Json(OverrideResponse { user_id, value, effective }))
}

async fn set_override(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SetOverrideRequest>,
) -> Result<Json<OverrideResponse>, ApiError> {
    let correlation_id = authorize_admin(&headers, &state)?;
    let user_id = parse_user_id(&user_id, &correlation_id)?;

    let _write = state.admin_writes.lock().await;
    state
        .rollout
        .save_override(&user_id, request.enabled)
        .await
        .map_err(|error| ApiError::from_repository(error, &correlation_id))?;
    let snapshot = state
        .gate()
        .set_override(&user_id, request.enabled)
        .map_err(|error| ApiError::from_rollout(error, &correlation_id))?;

    Ok(Json(OverrideResponse {
        effective: snapshot.is_enabled(&user_id),
        value: Some(request.enabled),
        user_id,
    }))
}

async fn clear_override(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OverrideResponse>, ApiError> {
    let correlation_id = authorize_admin(&headers, &state)?;
    let user_id = parse_user_id(&user_id, &correlation_id)?;

    let _write = state.admin_writes.lock().await;
    state
        .rollout
        .clear_override(&user_id)
        .await
        .map_err(|error| ApiError::from_repository(error, &correlation_id))?;
    let snapshot = state
        .gate()
        .clear_override(&user_id)
        .map_err(|error| ApiError::from_rollout(error, &correlation_id))?;

    Ok(Json(OverrideResponse { effective: snapshot.is_enabled(&user_id), value: None, user_id }))
}

fn parse_user_id(raw: &str, correlation_id: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request("user id must not be empty", correlation_id));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use secrecy::SecretString;
    use serde::de::DeserializeOwned;
    use switchboard_agent::{AgentRuntime, Dispatcher};
    use switchboard_core::config::OrchestrationConfig;
    use switchboard_core::domain::conversation::ConversationId;
    use switchboard_core::domain::handoff::HandoffRecord;
    use switchboard_core::feature_flags::{FeatureFlagGate, RolloutConfig};
    use switchboard_db::{
        HandoffPathCount, HandoffRepository, InMemoryHandoffRepository,
        InMemoryRolloutRepository, RepositoryError, RolloutRepository, StoredHandoff,
    };
    use tower::ServiceExt;

    use super::{
        analytics_window, router, AppState, ErrorBody, HandoffAnalyticsResponse,
        HandoffListResponse, OverrideResponse, RolloutResponse, TurnResponse, WindowQuery,
    };
    use crate::sessions::SessionRegistry;

    const ADMIN_TOKEN: &str = "admin-test-token";

    struct Harness {
        app: Router,
        state: AppState,
        handoffs: Arc<InMemoryHandoffRepository>,
        rollout: Arc<InMemoryRolloutRepository>,
    }

    fn harness(rollout: RolloutConfig, admin_token: Option<&str>) -> Harness {
        let handoffs = Arc::new(InMemoryHandoffRepository::default());
        let rollout_repo = Arc::new(InMemoryRolloutRepository::default());
        let state = app_state(rollout, admin_token, handoffs.clone(), rollout_repo.clone());
        Harness { app: router(state.clone()), state, handoffs, rollout: rollout_repo }
    }

    fn app_state(
        rollout: RolloutConfig,
        admin_token: Option<&str>,
        handoffs: Arc<dyn HandoffRepository>,
        rollout_repo: Arc<dyn RolloutRepository>,
    ) -> AppState {
        let runtime =
            AgentRuntime::builder(OrchestrationConfig::default()).build().expect("runtime");
        let dispatcher =
            Dispatcher::with_runtime(Arc::new(FeatureFlagGate::new(rollout)), Arc::new(runtime));
        AppState::new(
            Arc::new(dispatcher),
            Arc::new(SessionRegistry::default()),
            handoffs,
            rollout_repo,
            admin_token.map(|token| SecretString::from(token.to_string())),
        )
    }

    /// Rejects every batch while remembering how large each one was.
    #[derive(Default)]
    struct UnwritableHandoffs {
        inner: InMemoryHandoffRepository,
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl HandoffRepository for UnwritableHandoffs {
        async fn append_all(
            &self,
            _conversation_id: &ConversationId,
            records: &[HandoffRecord],
        ) -> Result<(), RepositoryError> {
            self.batches.lock().expect("batches").push(records.len());
            Err(RepositoryError::Decode("database is read-only".to_string()))
        }

        async fn list_for_conversation(
            &self,
            conversation_id: &ConversationId,
        ) -> Result<Vec<HandoffRecord>, RepositoryError> {
            self.inner.list_for_conversation(conversation_id).await
        }

        async fn list_between(
            &self,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<StoredHandoff>, RepositoryError> {
            self.inner.list_between(since, until).await
        }

        async fn path_counts_between(
            &self,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> Result<Vec<HandoffPathCount>, RepositoryError> {
            self.inner.path_counts_between(since, until).await
        }
    }

    /// Stores the given percentage, then lingers before returning.
    #[derive(Default)]
    struct SlowRollout {
        inner: InMemoryRolloutRepository,
    }

    #[async_trait]
    impl RolloutRepository for SlowRollout {
        async fn load(&self, default_percentage: u8) -> Result<RolloutConfig, RepositoryError> {
            self.inner.load(default_percentage).await
        }

        async fn save_percentage(&self, percentage: u8) -> Result<(), RepositoryError> {
            self.inner.save_percentage(percentage).await?;
            if percentage == 10 {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            Ok(())
        }

        async fn save_override(&self, user_id: &str, enabled: bool) -> Result<(), RepositoryError> {
            self.inner.save_override(user_id, enabled).await
        }

        async fn clear_override(&self, user_id: &str) -> Result<(), RepositoryError> {
            self.inner.clear_override(user_id).await
        }
    }

    fn enabled_for_everyone() -> RolloutConfig {
        RolloutConfig::new(100).expect("valid percentage")
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
        token: Option<&str>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, bytes.to_vec())
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
        serde_json::from_slice(bytes).expect("json body")
    }

    #[tokio::test]
    async fn turn_endpoint_runs_multi_specialist_path_and_persists_handoffs() {
        let harness = harness(enabled_for_everyone(), None);

        let (status, body) = send(
            &harness.app,
            Method::POST,
            "/v1/conversations/conv-http-1/turns",
            Some(serde_json::json!({
                "user_id": "user123",
                "message": "Our approval process is unique, so we need to develop a custom solution"
            })),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
        let turn: TurnResponse = decode(&body);
        assert_eq!(turn.conversation_id, "conv-http-1");
        assert_eq!(turn.path, switchboard_agent::ResponsePath::MultiSpecialist);
        assert_eq!(turn.handoff_count, turn.turn.accepted_handoffs.len());

        let persisted = harness
            .handoffs
            .list_for_conversation(&ConversationId("conv-http-1".to_string()))
            .await
            .expect("list");
        assert_eq!(persisted, turn.turn.accepted_handoffs);

        let (status, body) =
            send(&harness.app, Method::GET, "/v1/conversations/conv-http-1/handoffs", None, None)
                .await;
        assert_eq!(status, StatusCode::OK);
        let listed: HandoffListResponse = decode(&body);
        assert_eq!(listed.handoffs, persisted);
    }

    #[tokio::test]
    async fn failed_handoff_write_rolls_the_conversation_back() {
        let handoffs = Arc::new(UnwritableHandoffs::default());
        let state = app_state(
            enabled_for_everyone(),
            None,
            handoffs.clone(),
            Arc::new(InMemoryRolloutRepository::default()),
        );
        let app = router(state.clone());

        let (status, body) = send(
            &app,
            Method::POST,
            "/v1/conversations/conv-http-ro/turns",
            Some(serde_json::json!({
                "user_id": "user123",
                "message": "Our approval process is unique, so we need to develop a custom solution"
            })),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let error: ErrorBody = decode(&body);
        assert!(error.correlation_id.starts_with("req-"));
        assert_eq!(*handoffs.batches.lock().expect("batches"), vec![1]);
        let conversation = ConversationId("conv-http-ro".to_string());
        assert!(handoffs.list_for_conversation(&conversation).await.expect("list").is_empty());
        let kept = state.sessions.get(&conversation).expect("released");
        assert!(kept.handoff_history().is_empty());
        assert!(kept.messages().is_empty());
        assert_eq!(kept.current_specialist(), None);
    }

    #[tokio::test]
    async fn turn_endpoint_uses_fallback_for_anonymous_users() {
        let harness = harness(enabled_for_everyone(), None);

        let (status, body) = send(
            &harness.app,
            Method::POST,
            "/v1/conversations/conv-http-2/turns",
            Some(serde_json::json!({ "message": "How do I reset my password?" })),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let turn: TurnResponse = decode(&body);
        assert_eq!(turn.path, switchboard_agent::ResponsePath::Fallback);
        assert_eq!(turn.handoff_count, 0);
    }

    #[tokio::test]
    async fn empty_message_is_a_bad_request_and_leaves_conversation_untouched() {
        let harness = harness(enabled_for_everyone(), None);

        let (status, body) = send(
            &harness.app,
            Method::POST,
            "/v1/conversations/conv-http-3/turns",
            Some(serde_json::json!({ "user_id": "user123", "message": "   " })),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = decode(&body);
        assert!(error.correlation_id.starts_with("req-"));
        let state = harness
            .state
            .sessions
            .get(&ConversationId("conv-http-3".to_string()))
            .expect("released");
        assert!(state.messages().is_empty());
    }

    #[tokio::test]
    async fn concurrent_turn_on_same_conversation_conflicts() {
        let harness = harness(enabled_for_everyone(), None);
        let _lease = harness
            .state
            .sessions
            .checkout(&ConversationId("conv-busy".to_string()), Some("user123"))
            .expect("lease");

        let (status, body) = send(
            &harness.app,
            Method::POST,
            "/v1/conversations/conv-busy/turns",
            Some(serde_json::json!({ "user_id": "user123", "message": "hello" })),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        let error: ErrorBody = decode(&body);
        assert!(error.detail.contains("conv-busy"));
    }

    #[tokio::test]
    async fn analytics_reports_path_counts_and_rejects_inverted_window() {
        let harness = harness(enabled_for_everyone(), None);
        let (status, body) =
            send(&harness.app, Method::GET, "/v1/analytics/handoffs", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let analytics: HandoffAnalyticsResponse = decode(&body);
        assert_eq!(analytics.total, 0);
        assert_eq!(analytics.until - analytics.since, Duration::hours(24));

        let (status, _) = send(
            &harness.app,
            Method::GET,
            "/v1/analytics/handoffs?since=2026-05-02T00:00:00Z&until=2026-05-01T00:00:00Z",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn analytics_window_defaults_until_to_now() {
        let now = Utc.with_ymd_and_hms(2026, 5, 2, 12, 0, 0).single().expect("timestamp");
        let query = WindowQuery { since: Some("2026-05-02T00:00:00Z".to_string()), until: None };
        let (since, until) = analytics_window(&query, now).expect("window");
        assert_eq!(until, now);
        assert_eq!(until - since, Duration::hours(12));
    }

    #[tokio::test]
    async fn admin_routes_are_disabled_without_token() {
        let harness = harness(RolloutConfig::default(), None);
        let (status, _) =
            send(&harness.app, Method::GET, "/v1/admin/rollout", None, Some(ADMIN_TOKEN)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_routes_require_matching_bearer_token() {
        let harness = harness(RolloutConfig::default(), Some(ADMIN_TOKEN));

        let (missing, _) = send(&harness.app, Method::GET, "/v1/admin/rollout", None, None).await;
        assert_eq!(missing, StatusCode::UNAUTHORIZED);

        let (wrong, _) =
            send(&harness.app, Method::GET, "/v1/admin/rollout", None, Some("nope")).await;
        assert_eq!(wrong, StatusCode::UNAUTHORIZED);

        let (ok, body) =
            send(&harness.app, Method::GET, "/v1/admin/rollout", None, Some(ADMIN_TOKEN)).await;
        assert_eq!(ok, StatusCode::OK);
        let rollout: RolloutResponse = decode(&body);
        assert_eq!(rollout.rollout_percentage, 0);
    }

    #[tokio::test]
    async fn rollout_percentage_updates_gate_and_store() {
        let harness = harness(RolloutConfig::default(), Some(ADMIN_TOKEN));

        let (status, body) = send(
            &harness.app,
            Method::PUT,
            "/v1/admin/rollout",
            Some(serde_json::json!({ "rollout_percentage": 25 })),
            Some(ADMIN_TOKEN),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decode::<RolloutResponse>(&body).rollout_percentage, 25);
        assert_eq!(harness.state.dispatcher.gate().rollout_percentage().expect("read"), 25);
        assert_eq!(harness.rollout.load(0).await.expect("load").rollout_percentage, 25);

        let (status, _) = send(
            &harness.app,
            Method::PUT,
            "/v1/admin/rollout",
            Some(serde_json::json!({ "rollout_percentage": 150 })),
            Some(ADMIN_TOKEN),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(harness.state.dispatcher.gate().rollout_percentage().expect("read"), 25);
    }

    #[tokio::test]
    async fn overlapping_rollout_updates_leave_gate_and_store_in_agreement() {
        let rollout_repo = Arc::new(SlowRollout::default());
        let state = app_state(
            RolloutConfig::default(),
            Some(ADMIN_TOKEN),
            Arc::new(InMemoryHandoffRepository::default()),
            rollout_repo.clone(),
        );
        let app = router(state.clone());

        let first = {
            let app = app.clone();
            tokio::spawn(async move {
                send(
                    &app,
                    Method::PUT,
                    "/v1/admin/rollout",
                    Some(serde_json::json!({ "rollout_percentage": 10 })),
                    Some(ADMIN_TOKEN),
                )
                .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let (second, _) = send(
            &app,
            Method::PUT,
            "/v1/admin/rollout",
            Some(serde_json::json!({ "rollout_percentage": 20 })),
            Some(ADMIN_TOKEN),
        )
        .await;
        let (first, _) = first.await.expect("first update");

        assert_eq!((first, second), (StatusCode::OK, StatusCode::OK));
        let stored = rollout_repo.load(0).await.expect("load").rollout_percentage;
        let live = state.dispatcher.gate().rollout_percentage().expect("read");
        assert_eq!(stored, 20);
        assert_eq!(live, stored);
    }

    #[tokio::test]
    async fn overrides_can_be_set_read_and_cleared() {
        let harness = harness(RolloutConfig::default(), Some(ADMIN_TOKEN));
        let uri = "/v1/admin/rollout/overrides/user123";

        let (status, body) = send(
            &harness.app,
            Method::PUT,
            uri,
            Some(serde_json::json!({ "enabled": true })),
            Some(ADMIN_TOKEN),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let set: OverrideResponse = decode(&body);
        assert_eq!(set.value, Some(true));
        assert!(set.effective);
        assert!(harness.state.dispatcher.gate().is_enabled(Some("user123")));

        let (_, body) = send(&harness.app, Method::GET, uri, None, Some(ADMIN_TOKEN)).await;
        assert_eq!(decode::<OverrideResponse>(&body).value, Some(true));

        let (status, body) = send(&harness.app, Method::DELETE, uri, None, Some(ADMIN_TOKEN)).await;
        assert_eq!(status, StatusCode::OK);
        let cleared: OverrideResponse = decode(&body);
        assert_eq!(cleared.value, None);
        assert!(!cleared.effective);
        assert!(harness.rollout.load(0).await.expect("load").overrides.is_empty());
    }
}
