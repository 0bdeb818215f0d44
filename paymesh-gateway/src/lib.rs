//! # PayMesh Gateway
//!
//! HTTP edge for the PayMesh services. The gateway is the only process with
//! an HTTP port; every request becomes a call over the broker.
//!
//! ```text
//! Client -> HTTP -> Gateway -> RabbitMQ -> authentication / payment
//!                      ^                          |
//!                      +---- reply queue <--------+
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use paymesh::{RpcClient, Settings};
//! use paymesh_gateway::{create_router, GatewayState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::new()?;
//!     let (client, _router) = RpcClient::connect(&settings).await?;
//!     let app = create_router(GatewayState::new(client, settings.call_timeout()));
//!
//!     let listener = tokio::net::TcpListener::bind(&settings.gateway.bind_address).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod router;

pub use router::{create_router, GatewayError, GatewayState};
