//! # Paymesh - RPC over AMQP for payment microservices
//!
//! Paymesh lets the API gateway call the authentication and payment services
//! over RabbitMQ with request/reply semantics. Each call is a JSON envelope
//! published to a topic exchange; replies come back on the caller's reply
//! queue and are matched to the waiting call by correlation id.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use paymesh::{CallName, DomainError, HandlerTable, MicroService, Settings};
//!
//! async fn login_user(data: serde_json::Value) -> Result<serde_json::Value, DomainError> {
//!     let email = data["email"].as_str().unwrap_or_default().to_string();
//!     Ok(serde_json::json!({ "access_token": "t", "email": email }))
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::new()?;
//!     let handlers = HandlerTable::builder()
//!         .function(CallName::LoginUser, login_user)
//!         .build();
//!
//!     let service = MicroService::new(&settings, handlers);
//!     service.start(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod registry;
pub mod retry;
pub mod rpc;
pub mod service;
pub mod services;
pub mod taxonomy;

pub use client::{ClientStats, ReplyRouter, RpcClient};
pub use config::Settings;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionStats, Topology};
pub use error::{PaymeshError, Result};
pub use message::{Acknowledger, CallName, Delivery, Envelope, ErrorEnvelope, OutgoingMessage, Publisher};
pub use registry::{CorrelationRegistry, PendingCallGuard};
pub use retry::{backoff, RetryPolicy};
pub use rpc::{HandlerResult, HandlerTable, RpcHandler};
pub use service::{Dispatcher, DispatcherConfig, MicroService, Outcome, ServiceStats, ServiceStatus};
pub use taxonomy::{DomainError, DomainErrorCode};
