use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::connection::{ConnectionManager, ConnectionStats, Topology};
use crate::error::Result;
use crate::message::{Delivery, Envelope, ErrorEnvelope, OutgoingMessage, Publisher};
use crate::retry::{retry, RetryPolicy};
use crate::rpc::{HandlerResult, HandlerTable};
use crate::taxonomy::DomainError;

/// Configuration for a request dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Service name (used for routing keys)
    pub service_name: String,
    /// Work queue the service consumes
    pub queue: String,
    /// Ceiling on a single handler invocation
    pub handler_timeout: Duration,
    /// Bounded retry for publishing replies
    pub reply_retry: RetryPolicy,
}

impl DispatcherConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        let service_name = service_name.into();
        Self {
            queue: service_name.clone(),
            service_name,
            handler_timeout: Duration::from_secs(5),
            reply_retry: RetryPolicy::new(5, Duration::from_millis(100)),
        }
    }
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Handler ran and the reply was published (or no reply was requested)
    Replied,
    /// Handler ran but the reply could not be published
    ReplyAbandoned,
    /// Envelope could not be decoded; the delivery was negatively acknowledged
    Rejected { requeued: bool },
}

/// Server side of the bridge: decodes calls, runs handlers, publishes replies.
///
/// Deliveries are processed strictly one at a time. Scale out by running more
/// dispatchers against the same queue.
pub struct Dispatcher {
    config: DispatcherConfig,
    handlers: Arc<HandlerTable>,
    publisher: Arc<dyn Publisher>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, handlers: HandlerTable, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            config,
            handlers: Arc::new(handlers),
            publisher,
        }
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// Process deliveries until the stream ends
    pub async fn run<S>(&self, deliveries: S)
    where
        S: Stream<Item = Result<Delivery>> + Unpin,
    {
        self.run_until(deliveries, std::future::pending()).await
    }

    /// Process deliveries until the stream ends or `shutdown` resolves
    pub async fn run_until<S, F>(&self, mut deliveries: S, shutdown: F)
    where
        S: Stream<Item = Result<Delivery>> + Unpin,
        F: Future<Output = ()>,
    {
        info!("📥 Dispatcher started for {}", self.config.service_name);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Dispatcher for {} shutting down", self.config.service_name);
                    return;
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        self.process(delivery).await;
                    }
                    Some(Err(e)) => error!("Error receiving message: {}", e),
                    None => break,
                },
            }
        }

        warn!("Dispatcher stopped for {}: consumer closed", self.config.service_name);
    }

    /// Handle a single delivery end to end. Never fails: every problem is
    /// settled with the broker and logged so the loop can move on.
    pub async fn process(&self, delivery: Delivery) -> Outcome {
        let envelope = match Envelope::from_bytes(&delivery.body) {
            Ok(envelope) => envelope,
            Err(e) => return self.reject(&delivery, e.to_string()).await,
        };

        let start_time = Instant::now();
        debug!(
            "📨 Processing call {} (correlation_id: {})",
            envelope.name, delivery.correlation_id
        );

        let result = self.invoke(&envelope).await;

        if let Err(e) = delivery.ack().await {
            error!("Failed to acknowledge {}: {}", delivery.correlation_id, e);
        }

        let body = match encode_result(&result) {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to encode reply for {}: {}", envelope.name, e);
                return Outcome::ReplyAbandoned;
            }
        };

        debug!(
            "Completed call {} in {}ms",
            envelope.name,
            start_time.elapsed().as_millis()
        );
        self.reply(&delivery, body).await
    }

    async fn invoke(&self, envelope: &Envelope) -> HandlerResult {
        let handler = match self.handlers.lookup(&envelope.name) {
            Ok(handler) => handler,
            Err(e) => {
                warn!("No handler found for call: {}", envelope.name);
                return Err(e);
            }
        };

        match tokio::time::timeout(self.config.handler_timeout, handler.handle(envelope.data.clone())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!("Handler {} failed: {}", envelope.name, e);
                Err(e)
            }
            Err(_) => {
                error!(
                    "Handler {} exceeded {:?}",
                    envelope.name, self.config.handler_timeout
                );
                Err(DomainError::internal(format!(
                    "{} did not complete in time",
                    envelope.name
                )))
            }
        }
    }

    /// Negatively acknowledge an undecodable delivery. The first failure is
    /// requeued; a delivery that already came back is discarded.
    async fn reject(&self, delivery: &Delivery, reason: String) -> Outcome {
        let requeue = !delivery.redelivered;
        error!(
            "Rejecting malformed envelope (correlation_id: {}, requeue: {}): {}",
            delivery.correlation_id, requeue, reason
        );

        if let Err(e) = delivery.nack(requeue).await {
            error!("Failed to reject {}: {}", delivery.correlation_id, e);
        }
        Outcome::Rejected { requeued: requeue }
    }

    async fn reply(&self, delivery: &Delivery, body: Vec<u8>) -> Outcome {
        if delivery.reply_to.is_empty() {
            warn!(
                "Call {} carried no reply-to, dropping reply",
                delivery.correlation_id
            );
            return Outcome::Replied;
        }

        let publisher = &self.publisher;
        let reply_to = delivery.reply_to.as_str();
        let correlation_id = delivery.correlation_id.as_str();
        let body = &body;
        let published = retry(self.config.reply_retry, "Reply publish", move |_| {
            let message = OutgoingMessage::reply(correlation_id, body.clone());
            publisher.publish(reply_to, message)
        })
        .await;

        match published {
            Ok(()) => Outcome::Replied,
            Err(e) => {
                error!(
                    "Abandoning reply to {} (correlation_id: {}): {}",
                    delivery.reply_to, delivery.correlation_id, e
                );
                Outcome::ReplyAbandoned
            }
        }
    }
}

fn encode_result(result: &HandlerResult) -> Result<Vec<u8>> {
    match result {
        Ok(value) => Ok(serde_json::to_vec(value)?),
        Err(e) => ErrorEnvelope::from(e).to_bytes(),
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("handlers", &self.handlers)
            .finish()
    }
}

/// Service operational status
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub enum ServiceStatus {
    Starting,
    Running,
    Stopped,
    Error(String),
}

/// A service process: owns the broker connection and runs one dispatcher
/// against its work queue
#[derive(Debug)]
pub struct MicroService {
    connection: Arc<ConnectionManager>,
    dispatcher: Dispatcher,
    status: Arc<RwLock<ServiceStatus>>,
}

impl MicroService {
    pub fn new(settings: &Settings, handlers: HandlerTable) -> Self {
        let connection = Arc::new(ConnectionManager::with_config(settings.connection_config()));
        let dispatcher = Dispatcher::new(settings.dispatcher_config(), handlers, connection.clone());

        info!("🚀 Creating microservice: {}", settings.service.name);
        Self {
            connection,
            dispatcher,
            status: Arc::new(RwLock::new(ServiceStatus::Starting)),
        }
    }

    /// Routing keys this service's queue is bound to
    pub fn bindings(&self) -> Vec<String> {
        let service_name = &self.dispatcher.config.service_name;
        let mut bindings: Vec<String> = self
            .dispatcher
            .handlers()
            .names()
            .map(|name| name.routing_key(service_name))
            .collect();
        bindings.sort();
        bindings
    }

    /// Connect, declare the work queue, and dispatch until `shutdown` resolves
    /// or the consumer closes
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let config = &self.dispatcher.config;
        info!("🏁 Starting microservice: {}", config.service_name);

        let setup = self.setup().await;
        let deliveries = match setup {
            Ok(deliveries) => deliveries,
            Err(e) => {
                *self.status.write().await = ServiceStatus::Error(e.to_string());
                return Err(e);
            }
        };

        *self.status.write().await = ServiceStatus::Running;
        info!("🎯 Microservice {} is running", config.service_name);

        self.dispatcher.run_until(deliveries, shutdown).await;

        *self.status.write().await = ServiceStatus::Stopped;
        Ok(())
    }

    async fn setup(&self) -> Result<futures_util::stream::BoxStream<'static, Result<Delivery>>> {
        let config = &self.dispatcher.config;
        self.connection.connect().await?;

        let topology = Topology::new(config.queue.clone(), self.bindings());
        self.connection.declare_topology(&topology).await?;

        let consumer_tag = format!("{}-requests-{}", config.service_name, Uuid::new_v4());
        self.connection.consume(&config.queue, &consumer_tag).await
    }

    /// Check if service is healthy
    pub async fn is_healthy(&self) -> bool {
        *self.status.read().await == ServiceStatus::Running && self.connection.is_connected().await
    }

    /// Get service statistics
    pub async fn get_stats(&self) -> ServiceStats {
        ServiceStats {
            service_name: self.dispatcher.config.service_name.clone(),
            status: self.status.read().await.clone(),
            registered_handlers: self.dispatcher.handlers().len(),
            connection_stats: self.connection.get_stats().await,
        }
    }
}

/// Service statistics for monitoring
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceStats {
    pub service_name: String,
    pub status: ServiceStatus,
    pub registered_handlers: usize,
    pub connection_stats: ConnectionStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PaymeshError;
    use crate::message::{Acknowledger, CallName};
    use crate::taxonomy::DomainErrorCode;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, OutgoingMessage)>>,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, routing_key: &str, message: OutgoingMessage) -> Result<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PaymeshError::transport_error("publish nacked"));
            }
            self.published.lock().push((routing_key.to_string(), message));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAcker {
        settled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Acknowledger for RecordingAcker {
        async fn ack(&self) -> Result<()> {
            self.settled.lock().push("ack".to_string());
            Ok(())
        }

        async fn nack(&self, requeue: bool) -> Result<()> {
            self.settled.lock().push(format!("nack(requeue={})", requeue));
            Ok(())
        }
    }

    async fn echo(data: serde_json::Value) -> HandlerResult {
        Ok(data)
    }

    async fn not_found(_data: serde_json::Value) -> HandlerResult {
        Err(DomainError::not_found("user not found"))
    }

    async fn stuck(_data: serde_json::Value) -> HandlerResult {
        std::future::pending().await
    }

    fn dispatcher(publisher: Arc<RecordingPublisher>) -> Dispatcher {
        let handlers = HandlerTable::builder()
            .function(CallName::LoginUser, echo)
            .function(CallName::RegisterUser, not_found)
            .function(CallName::PollingTransaction, stuck)
            .build();
        let mut config = DispatcherConfig::new("authentication");
        config.reply_retry = RetryPolicy::new(5, Duration::from_millis(1));
        Dispatcher::new(config, handlers, publisher)
    }

    fn call(id: &str, name: &str, data: serde_json::Value) -> Delivery {
        let body = serde_json::to_vec(&serde_json::json!({ "name": name, "data": data })).unwrap();
        Delivery::new(id, format!("gateway.{}", name), body)
    }

    #[tokio::test]
    async fn test_success_reply_is_published_to_reply_to() {
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = dispatcher(publisher.clone());
        let acker = Arc::new(RecordingAcker::default());

        let delivery = call("c1", "login_user", serde_json::json!({"email": "a@b.com"})).with_acker(acker.clone());
        assert_eq!(dispatcher.process(delivery).await, Outcome::Replied);

        let published = publisher.published.lock();
        let (routing_key, message) = &published[0];
        assert_eq!(routing_key, "gateway.login_user");
        assert_eq!(message.correlation_id, "c1");
        assert_eq!(message.reply_to, None);
        assert_eq!(message.body, br#"{"email":"a@b.com"}"#);
        assert_eq!(*acker.settled.lock(), vec!["ack"]);
    }

    #[tokio::test]
    async fn test_domain_error_becomes_error_envelope() {
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = dispatcher(publisher.clone());

        dispatcher.process(call("c2", "register_user", serde_json::json!({}))).await;

        let published = publisher.published.lock();
        let envelope: ErrorEnvelope = serde_json::from_slice(&published[0].1.body).unwrap();
        assert_eq!(envelope.status_code, 404);
        assert_eq!(envelope.message, "user not found");
    }

    #[tokio::test]
    async fn test_unknown_call_is_not_implemented() {
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = dispatcher(publisher.clone());
        let acker = Arc::new(RecordingAcker::default());

        let delivery = call("c3", "refund_payment", serde_json::json!({})).with_acker(acker.clone());
        assert_eq!(dispatcher.process(delivery).await, Outcome::Replied);

        let published = publisher.published.lock();
        let envelope: ErrorEnvelope = serde_json::from_slice(&published[0].1.body).unwrap();
        assert_eq!(envelope.status_code, 501);
        assert_eq!(*acker.settled.lock(), vec!["ack"]);
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_rejected() {
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = dispatcher(publisher.clone());
        let acker = Arc::new(RecordingAcker::default());

        let first = Delivery::new("bad", "gateway.login_user", b"{not json".to_vec()).with_acker(acker.clone());
        assert_eq!(dispatcher.process(first).await, Outcome::Rejected { requeued: true });

        let again = Delivery::new("bad", "gateway.login_user", b"{not json".to_vec())
            .with_redelivered(true)
            .with_acker(acker.clone());
        assert_eq!(dispatcher.process(again).await, Outcome::Rejected { requeued: false });

        assert_eq!(
            *acker.settled.lock(),
            vec!["nack(requeue=true)", "nack(requeue=false)"]
        );
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_hits_deadline() {
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = dispatcher(publisher.clone());

        dispatcher.process(call("c4", "polling_transaction", serde_json::json!({}))).await;

        let published = publisher.published.lock();
        let envelope: ErrorEnvelope = serde_json::from_slice(&published[0].1.body).unwrap();
        assert_eq!(
            DomainErrorCode::from_envelope_status(envelope.status_code),
            DomainErrorCode::Internal
        );
    }

    #[tokio::test]
    async fn test_reply_publish_is_retried() {
        let publisher = Arc::new(RecordingPublisher {
            failures_left: AtomicU32::new(2),
            ..Default::default()
        });
        let dispatcher = dispatcher(publisher.clone());

        let outcome = dispatcher.process(call("c5", "login_user", serde_json::json!({}))).await;
        assert_eq!(outcome, Outcome::Replied);
        assert_eq!(publisher.published.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_reply_abandoned_after_retries() {
        let publisher = Arc::new(RecordingPublisher {
            failures_left: AtomicU32::new(100),
            ..Default::default()
        });
        let dispatcher = dispatcher(publisher.clone());

        let outcome = dispatcher.process(call("c6", "login_user", serde_json::json!({}))).await;
        assert_eq!(outcome, Outcome::ReplyAbandoned);
        assert_eq!(publisher.failures_left.load(Ordering::SeqCst), 95);
    }

    #[tokio::test]
    async fn test_missing_reply_to_skips_publish() {
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = dispatcher(publisher.clone());

        let body = Envelope::new(CallName::LoginUser, serde_json::json!({})).unwrap().to_bytes().unwrap();
        let outcome = dispatcher.process(Delivery::new("c7", "", body)).await;
        assert_eq!(outcome, Outcome::Replied);
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_loop_continues_after_malformed_message() {
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = dispatcher(publisher.clone());

        let deliveries = futures_util::stream::iter(vec![
            Ok(call("c1", "login_user", serde_json::json!({"n": 1}))),
            Ok(Delivery::new("bad", "gateway.login_user", b"\x00\x01garbage".to_vec())),
            Err(PaymeshError::transport_error("consumer hiccup")),
            Ok(call("c2", "login_user", serde_json::json!({"n": 2}))),
        ]);
        dispatcher.run(deliveries).await;

        let ids: Vec<String> = publisher
            .published
            .lock()
            .iter()
            .map(|(_, message)| message.correlation_id.clone())
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let publisher = Arc::new(RecordingPublisher::default());
        let dispatcher = dispatcher(publisher.clone());

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let deliveries = futures_util::stream::pending::<Result<Delivery>>();
        tx.send(()).unwrap();

        dispatcher
            .run_until(deliveries, async {
                let _ = rx.await;
            })
            .await;
        assert!(publisher.published.lock().is_empty());
    }

    #[test]
    fn test_service_bindings() {
        let settings: Settings = Settings::defaults()
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let handlers = HandlerTable::builder()
            .function(CallName::LoginUser, echo)
            .function(CallName::RegisterUser, echo)
            .build();

        let service = MicroService::new(&settings, handlers);
        assert_eq!(
            service.bindings(),
            vec!["authentication.login_user", "authentication.register_user"]
        );
    }
}
