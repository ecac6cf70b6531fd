//! Inbound HTTP API
//!
//! The thin synchronous surface callers use to drive provisioning:
//! deploy, teardown, and chat relay. Handlers translate the error
//! taxonomy into status codes - the reconciler itself knows nothing
//! about HTTP.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::cluster::ClusterClient;
use crate::reconcile::Reconciler;
use crate::relay::{AgentQuery, AgentRelay};
use crate::session::{SessionStore, Turn, HISTORY_WINDOW};
use crate::workload::{service_url, AgentEnv};
use crate::Error;

/// Shared state behind every handler
pub struct AppState<C> {
    /// The per-tenant workload reconciler
    pub reconciler: Reconciler<C>,
    /// Outbound relay to tenant agents
    pub relay: AgentRelay,
    /// Session state store
    pub sessions: Arc<dyn SessionStore>,
}

/// Deploy request body
#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    /// Tenant to provision for
    pub user_id: String,
    /// Environment variables for the agent container, passed through verbatim
    #[serde(default)]
    pub env: Vec<AgentEnv>,
}

/// Deploy response body
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    /// Pod that is Running and Ready for the new spec
    pub pod_name: String,
    /// Stable in-cluster URL of the tenant's Service
    pub service_url: String,
}

/// Chat request body
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Tenant whose agent should answer
    pub user_id: String,
    /// The user's message
    pub message: String,
}

/// Chat response body
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// The agent's answer
    pub response: String,
}

/// Error wrapper mapping the taxonomy onto status codes
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            Error::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": msg }),
            ),
            Error::PodProvisioningTimeout { workload, .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({
                    "error": self.0.to_string(),
                    "status": "provisioning",
                    "workload": workload,
                }),
            ),
            Error::ClusterRead(_) | Error::ClusterWrite(_) | Error::Relay(_) => {
                error!(error = %self.0, "request failed");
                (StatusCode::BAD_GATEWAY, json!({ "error": self.0.to_string() }))
            }
        };
        (status, Json(body)).into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn deploy_handler<C: ClusterClient>(
    State(state): State<Arc<AppState<C>>>,
    Json(request): Json<DeployRequest>,
) -> Result<Json<DeployResponse>, ApiError> {
    let provisioned = state
        .reconciler
        .deploy(&request.user_id, &request.env)
        .await?;

    state
        .sessions
        .record_workload(
            &request.user_id,
            &provisioned.pod_name,
            &provisioned.service_url,
        )
        .await?;

    Ok(Json(DeployResponse {
        pod_name: provisioned.pod_name,
        service_url: provisioned.service_url,
    }))
}

async fn teardown_handler<C: ClusterClient>(
    State(state): State<Arc<AppState<C>>>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.reconciler.teardown(&user_id).await?;
    state.sessions.clear(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn chat_handler<C: ClusterClient>(
    State(state): State<Arc<AppState<C>>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.user_id.is_empty() {
        return Err(Error::validation("user_id must not be empty").into());
    }

    // The Service URL is deterministic; a recorded session just saves
    // recomputing it.
    let target = state
        .sessions
        .get(&request.user_id)
        .await?
        .and_then(|record| record.service_url)
        .unwrap_or_else(|| service_url(state.reconciler.config(), &request.user_id));

    let history = state
        .sessions
        .recent_turns(&request.user_id, HISTORY_WINDOW)
        .await?;

    let query = AgentQuery {
        text: request.message.clone(),
        user_id: Some(request.user_id.clone()),
        use_conversation_context: !history.is_empty(),
        conversation_history: (!history.is_empty()).then_some(history),
    };

    let reply = state.relay.query(&target, &query).await?;
    let answer = reply.text().to_string();

    state
        .sessions
        .append_turn(
            &request.user_id,
            Turn {
                user: request.message,
                assistant: answer.clone(),
            },
        )
        .await?;

    Ok(Json(ChatResponse { response: answer }))
}

/// Create the API router
///
/// Routes:
/// - `GET /health` - liveness
/// - `POST /deploy` - ensure the tenant's workload and resolve its Pod
/// - `DELETE /deploy/{user_id}` - tear the tenant's workload down
/// - `POST /chat` - relay a message to the tenant's agent
pub fn api_router<C: ClusterClient + 'static>(state: Arc<AppState<C>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/deploy", post(deploy_handler::<C>))
        .route("/deploy/{user_id}", delete(teardown_handler::<C>))
        .route("/chat", post(chat_handler::<C>))
        .with_state(state)
}
