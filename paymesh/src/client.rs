use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::connection::{ConnectionManager, Topology};
use crate::error::{PaymeshError, Result};
use crate::message::{CallName, Delivery, Envelope, ErrorEnvelope, OutgoingMessage, Publisher};
use crate::registry::{CorrelationRegistry, PendingCallGuard};

/// Turns one-way publishes into blocking calls.
///
/// Every call registers its correlation id with the shared registry, publishes
/// an envelope to the owning service, and waits for the [`ReplyRouter`] to
/// hand it the matching reply.
#[derive(Clone)]
pub struct RpcClient {
    client_name: String,
    publisher: Arc<dyn Publisher>,
    registry: Arc<CorrelationRegistry>,
    default_timeout: Duration,
}

impl RpcClient {
    pub fn new(
        client_name: impl Into<String>,
        publisher: Arc<dyn Publisher>,
        registry: Arc<CorrelationRegistry>,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            publisher,
            registry,
            default_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Connect to the broker, declare this client's reply queue bound to
    /// `<client>.<call>` for every call, and start the reply router.
    pub async fn connect(settings: &Settings) -> Result<(Self, JoinHandle<()>)> {
        let client_name = settings.client.name.clone();
        info!("🔗 Creating RPC client: {}", client_name);

        let connection = Arc::new(ConnectionManager::with_config(settings.connection_config()));
        connection.connect().await?;

        let bindings = CallName::ALL
            .iter()
            .map(|call| call.routing_key(&client_name))
            .collect();
        let topology = Topology::new(settings.client.reply_queue.clone(), bindings);
        connection.declare_topology(&topology).await?;

        let consumer_tag = format!("{}-replies-{}", client_name, Uuid::new_v4());
        let replies = connection.consume(&topology.queue, &consumer_tag).await?;

        let registry = Arc::new(CorrelationRegistry::new());
        let router = ReplyRouter::new(client_name.clone(), registry.clone());
        let router_handle = tokio::spawn(router.run(replies));

        let client = Self::new(client_name.clone(), connection, registry)
            .with_default_timeout(settings.call_timeout());
        info!("✅ RPC client ready: {}", client_name);

        Ok((client, router_handle))
    }

    /// Routing key replies to `name` are published to
    pub fn reply_routing_key(&self, name: CallName) -> String {
        name.routing_key(&self.client_name)
    }

    /// Call with the default timeout
    pub async fn call_default<P>(&self, name: CallName, payload: &P) -> Result<Vec<u8>>
    where
        P: Serialize + ?Sized + Sync,
    {
        self.call(name, payload, self.default_timeout).await
    }

    /// Call a remote handler and return the raw reply body
    pub async fn call<P>(&self, name: CallName, payload: &P, timeout: Duration) -> Result<Vec<u8>>
    where
        P: Serialize + ?Sized + Sync,
    {
        let correlation_id = Uuid::new_v4().to_string();
        self.call_with_id(correlation_id, name, payload, timeout).await
    }

    /// Call with a caller-chosen correlation id
    pub async fn call_with_id<P>(
        &self,
        correlation_id: impl Into<String>,
        name: CallName,
        payload: &P,
        timeout: Duration,
    ) -> Result<Vec<u8>>
    where
        P: Serialize + ?Sized + Sync,
    {
        let correlation_id = correlation_id.into();
        let deadline = Instant::now() + timeout;
        let timed_out = || PaymeshError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        };
        let mut waiter = self.registry.register(correlation_id.clone());
        let _pending = PendingCallGuard::new(&self.registry, correlation_id.clone());

        let body = Envelope::new(name, payload)?.to_bytes()?;
        let message = OutgoingMessage::request(
            correlation_id.clone(),
            self.reply_routing_key(name),
            body,
        );
        // The publish shares the call's deadline
        let work_routing_key = name.work_routing_key();
        let publish = self.publisher.publish(&work_routing_key, message);
        tokio::time::timeout_at(deadline, publish)
            .await
            .map_err(|_| timed_out())??;

        debug!(
            "Sent call {} to {} (correlation_id: {})",
            name,
            name.owner(),
            correlation_id
        );

        match tokio::time::timeout_at(deadline, waiter.recv()).await {
            Ok(Some(delivery)) => decode_reply(delivery),
            Ok(None) => Err(PaymeshError::internal_error("Reply channel closed")),
            Err(_) => {
                debug!("Call {} timed out (correlation_id: {})", name, correlation_id);
                Err(timed_out())
            }
        }
    }

    /// Typed call: serialize the request, deserialize a successful reply
    pub async fn call_json<Req, Resp>(&self, name: CallName, request: &Req, timeout: Duration) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let body = self.call(name, request, timeout).await?;
        serde_json::from_slice(&body)
            .map_err(|e| PaymeshError::invalid_message(format!("unexpected reply to {}: {}", name, e)))
    }

    /// Number of calls still waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &Arc<CorrelationRegistry> {
        &self.registry
    }

    pub fn get_stats(&self) -> ClientStats {
        ClientStats {
            client_name: self.client_name.clone(),
            pending_calls: self.registry.len(),
            oldest_pending_ms: self
                .registry
                .oldest_pending_age()
                .map(|age| age.as_millis() as u64),
            default_timeout_ms: self.default_timeout.as_millis() as u64,
        }
    }
}

fn decode_reply(delivery: Delivery) -> Result<Vec<u8>> {
    let detected = ErrorEnvelope::detect(&delivery.body).map_err(|e| {
        PaymeshError::invalid_message(format!(
            "undecodable reply (correlation_id: {}): {}",
            delivery.correlation_id, e
        ))
    })?;

    match detected {
        Some(envelope) => Err(PaymeshError::Domain(envelope.into_domain_error())),
        None => Ok(delivery.body),
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("client_name", &self.client_name)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

/// Client statistics for monitoring
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClientStats {
    pub client_name: String,
    pub pending_calls: usize,
    pub oldest_pending_ms: Option<u64>,
    pub default_timeout_ms: u64,
}

/// Forwards replies from this process's reply queue to waiting callers
#[derive(Debug)]
pub struct ReplyRouter {
    client_name: String,
    registry: Arc<CorrelationRegistry>,
}

impl ReplyRouter {
    pub fn new(client_name: impl Into<String>, registry: Arc<CorrelationRegistry>) -> Self {
        Self {
            client_name: client_name.into(),
            registry,
        }
    }

    /// Consume replies until the stream ends. A closed stream leaves the
    /// client degraded: every later call times out until the owner restarts
    /// the router on a fresh consumer.
    pub async fn run<S>(self, mut replies: S)
    where
        S: Stream<Item = Result<Delivery>> + Unpin,
    {
        info!("📤 Reply router started for {}", self.client_name);

        while let Some(reply) = replies.next().await {
            match reply {
                Ok(delivery) => {
                    self.route(delivery).await;
                }
                Err(e) => error!("Error receiving reply: {}", e),
            }
        }

        warn!(
            "Reply router stopped for {}; pending and future calls will time out",
            self.client_name
        );
    }

    /// Hand one reply to its waiter. Orphans are acknowledged and dropped.
    pub async fn route(&self, delivery: Delivery) -> bool {
        let correlation_id = delivery.correlation_id.clone();
        let settle = delivery.clone();

        let delivered = self.registry.resolve(&correlation_id, delivery);
        if delivered {
            debug!("Routed reply for correlation_id: {}", correlation_id);
        } else {
            warn!(
                "Dropping reply for unknown or expired correlation_id: {}",
                correlation_id
            );
        }

        if let Err(e) = settle.ack().await {
            error!("Failed to acknowledge reply {}: {}", correlation_id, e);
        }
        delivered
    }
}
