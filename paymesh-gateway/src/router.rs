use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use paymesh::{CallName, PaymeshError, RpcClient};

/// Gateway state containing the bridge client
#[derive(Debug, Clone)]
pub struct GatewayState {
    /// Client for calling services over the broker
    pub client: RpcClient,
    /// Deadline for each forwarded call
    pub call_timeout: Duration,
}

impl GatewayState {
    pub fn new(client: RpcClient, call_timeout: Duration) -> Self {
        Self { client, call_timeout }
    }
}

/// Build the HTTP surface.
///
/// Every route forwards its JSON body to exactly one call:
/// ```text
/// POST /api/v1/users/register  -> register_user
/// POST /api/v1/users/login     -> login_user
/// POST /api/v1/payments        -> initiate_payment
/// GET  /api/v1/payments/{id}   -> polling_transaction
/// ```
pub fn create_router(state: GatewayState) -> Router {
    info!("🌐 Creating gateway router");

    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/users/register", post(register_user))
        .route("/api/v1/users/login", post(login_user))
        .route("/api/v1/payments", post(initiate_payment))
        .route("/api/v1/payments/{id}", get(polling_transaction))
        .with_state(state)
}

async fn register_user(
    State(state): State<GatewayState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), GatewayError> {
    let reply = forward(&state, CallName::RegisterUser, body).await?;
    Ok((StatusCode::CREATED, reply))
}

async fn login_user(
    State(state): State<GatewayState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, GatewayError> {
    forward(&state, CallName::LoginUser, body).await
}

async fn initiate_payment(
    State(state): State<GatewayState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), GatewayError> {
    let reply = forward(&state, CallName::InitiatePayment, body).await?;
    Ok((StatusCode::ACCEPTED, reply))
}

async fn polling_transaction(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let payload = serde_json::json!({ "transaction_id": id });
    forward(&state, CallName::PollingTransaction, payload).await
}

/// Call the owning service and hand back its JSON reply
async fn forward(state: &GatewayState, name: CallName, payload: Value) -> Result<Json<Value>, GatewayError> {
    debug!("🔄 Forwarding {} to {}", name, name.owner());

    let body = state.client.call(name, &payload, state.call_timeout).await?;
    let reply = serde_json::from_slice(&body)
        .map_err(|e| PaymeshError::invalid_message(format!("unexpected reply to {}: {}", name, e)))?;
    Ok(Json(reply))
}

/// Health check for the gateway itself
async fn health_check(State(state): State<GatewayState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "gateway": "paymesh-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "rpc": state.client.get_stats(),
    }))
}

/// A failed call, rendered with the HTTP column of the error taxonomy
#[derive(Debug)]
pub struct GatewayError(pub PaymeshError);

impl From<PaymeshError> for GatewayError {
    fn from(err: PaymeshError) -> Self {
        Self(err)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.0.http_status();
        let domain = self.0.domain_error();

        if status.is_server_error() {
            error!("Gateway error: {}", self.0);
        } else {
            warn!("Call rejected: {}", self.0);
        }

        let body = serde_json::json!({
            "error": domain.message,
            "code": domain.code.as_str(),
        });
        (status, Json(body)).into_response()
    }
}
