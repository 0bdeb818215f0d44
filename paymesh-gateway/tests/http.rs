use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use paymesh::{
    CorrelationRegistry, Delivery, DomainError, Envelope, ErrorEnvelope, OutgoingMessage, Publisher, Result,
    RpcClient,
};
use paymesh_gateway::{create_router, GatewayState};

/// Answers calls in-process by resolving the caller's registry directly.
/// `polling_transaction` never answers.
struct ScriptedServices {
    registry: Arc<CorrelationRegistry>,
}

impl ScriptedServices {
    fn answer(envelope: &Envelope) -> Option<std::result::Result<Value, DomainError>> {
        match envelope.name.as_str() {
            "login_user" if envelope.data["email"] == "a@b.com" => Some(Ok(serde_json::json!({
                "access_token": "t",
                "email": "a@b.com",
            }))),
            "login_user" => Some(Err(DomainError::not_found("user not found"))),
            "register_user" => Some(Err(DomainError::already_exists("user already exists"))),
            "initiate_payment" => Some(Ok(serde_json::json!({ "status": "pending" }))),
            _ => None,
        }
    }
}

#[async_trait]
impl Publisher for ScriptedServices {
    async fn publish(&self, _routing_key: &str, message: OutgoingMessage) -> Result<()> {
        let envelope = Envelope::from_bytes(&message.body)?;
        let body = match Self::answer(&envelope) {
            Some(Ok(value)) => serde_json::to_vec(&value)?,
            Some(Err(err)) => ErrorEnvelope::from(&err).to_bytes()?,
            None => return Ok(()),
        };
        self.registry
            .resolve(&message.correlation_id, Delivery::new(message.correlation_id.clone(), "", body));
        Ok(())
    }
}

fn app() -> Router {
    let registry = Arc::new(CorrelationRegistry::new());
    let services = Arc::new(ScriptedServices {
        registry: registry.clone(),
    });
    let client = RpcClient::new("gateway", services, registry);
    create_router(GatewayState::new(client, Duration::from_millis(50)))
}

async fn send(request: Request<Body>) -> (StatusCode, Value) {
    let response = app().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_login_success() {
    let (status, body) = send(post(
        "/api/v1/users/login",
        serde_json::json!({"email": "a@b.com", "password": "x"}),
    ))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"access_token": "t", "email": "a@b.com"}));
}

#[tokio::test]
async fn test_domain_errors_map_to_http_statuses() {
    let (status, body) = send(post(
        "/api/v1/users/login",
        serde_json::json!({"email": "nobody@b.com", "password": "x"}),
    ))
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["error"], "user not found");

    let (status, body) = send(post(
        "/api/v1/users/register",
        serde_json::json!({"email": "a@b.com", "password": "x"}),
    ))
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_EXISTS");
}

#[tokio::test]
async fn test_payment_accepted() {
    let (status, body) = send(post(
        "/api/v1/payments",
        serde_json::json!({"email": "a@b.com", "amount": 100, "currency": "USD"}),
    ))
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn test_unanswered_call_is_internal_error() {
    let request = Request::builder()
        .uri("/api/v1/payments/0b9c7a1e-1f0e-4c55-9d1b-3f4f6f3b2a10")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "INTERNAL");
}

#[tokio::test]
async fn test_health() {
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["rpc"]["client_name"], "gateway");
    assert_eq!(body["rpc"]["pending_calls"], 0);
}
