use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use lapin::{
    acker::Acker,
    options::*,
    types::FieldTable,
    BasicProperties, Channel, Connection, ExchangeKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{PaymeshError, Result};
use crate::message::{Acknowledger, Delivery, OutgoingMessage, Publisher};
use crate::retry::{retry, RetryPolicy};

const CHANNEL_POOL_LIMIT: usize = 10;

/// Configuration for AMQP connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// AMQP broker URL (e.g., "amqp://localhost:5672")
    pub url: String,
    /// Topic exchange every message is published to
    pub exchange: String,
    /// Heartbeat interval in seconds
    pub heartbeat_seconds: u16,
    /// Dial attempts before giving up
    pub max_connect_attempts: u32,
    /// Backoff unit between dial attempts (`attempt² × base`)
    pub connect_backoff_base: Duration,
    /// Channel prefetch count. Dispatchers rely on 1 for strictly sequential processing
    pub prefetch_count: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
            exchange: "paymesh".to_string(),
            heartbeat_seconds: 60,
            max_connect_attempts: 12,
            connect_backoff_base: Duration::from_secs(1),
            prefetch_count: 1,
        }
    }
}

impl ConnectionConfig {
    fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_connect_attempts, self.connect_backoff_base)
    }
}

/// A queue and the routing-key patterns it is bound to on the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub queue: String,
    pub bindings: Vec<String>,
}

impl Topology {
    pub fn new(queue: impl Into<String>, bindings: Vec<String>) -> Self {
        Self {
            queue: queue.into(),
            bindings,
        }
    }
}

/// Holds the broker connection and a pool of publishing channels.
///
/// lapin channels are not shared between concurrent publishers: every publish
/// borrows a channel from the pool and hands it back afterwards.
pub struct ConnectionManager {
    config: ConnectionConfig,
    connection: Arc<RwLock<Option<Arc<Connection>>>>,
    channels: Arc<Mutex<Vec<Channel>>>,
}

impl ConnectionManager {
    /// Create a new connection manager with default configuration
    pub fn new(url: impl Into<String>) -> Self {
        let config = ConnectionConfig {
            url: url.into(),
            ..ConnectionConfig::default()
        };
        Self::with_config(config)
    }

    /// Create a new connection manager with custom configuration
    pub fn with_config(config: ConnectionConfig) -> Self {
        Self {
            config,
            connection: Arc::new(RwLock::new(None)),
            channels: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Establish connection to RabbitMQ, backing off quadratically between
    /// attempts so a broker that is still booting gets time to come up
    pub async fn connect(&self) -> Result<()> {
        let connection = retry(self.config.connect_policy(), "AMQP connect", |attempt| {
            debug!("Connecting to {} (attempt {})", self.config.url, attempt);
            self.try_connect()
        })
        .await?;

        info!("Successfully connected to RabbitMQ at {}", self.config.url);
        *self.connection.write().await = Some(Arc::new(connection));
        self.channels.lock().await.clear();
        Ok(())
    }

    async fn try_connect(&self) -> Result<Connection> {
        let url = with_heartbeat(&self.config.url, self.config.heartbeat_seconds);
        let connection = Connection::connect(
            &url,
            lapin::ConnectionProperties::default()
                .with_connection_name(format!("paymesh-{}", uuid::Uuid::new_v4()).into()),
        )
        .await?;

        Ok(connection)
    }

    /// Declare the topic exchange, a durable queue, and its bindings.
    /// Safe to repeat; failures are returned, not retried.
    pub async fn declare_topology(&self, topology: &Topology) -> Result<()> {
        let channel = self.get_channel().await?;

        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_declare(
                &topology.queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for routing_key in &topology.bindings {
            channel
                .queue_bind(
                    &topology.queue,
                    &self.config.exchange,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            debug!("Bound {} to {}:{}", topology.queue, self.config.exchange, routing_key);
        }

        self.return_channel(channel).await;
        info!(
            "Declared queue {} with {} binding(s) on exchange {}",
            topology.queue,
            topology.bindings.len(),
            self.config.exchange
        );
        Ok(())
    }

    /// Get or create a channel, redialing once if the connection dropped
    pub async fn get_channel(&self) -> Result<Channel> {
        {
            let mut channels = self.channels.lock().await;
            while let Some(channel) = channels.pop() {
                if channel.status().connected() {
                    return Ok(channel);
                }
            }
        }

        let connection = self.ensure_connected().await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await?;

        debug!("Created new channel");
        Ok(channel)
    }

    /// Return channel to pool for reuse
    pub async fn return_channel(&self, channel: Channel) {
        if channel.status().connected() {
            let mut channels = self.channels.lock().await;
            if channels.len() < CHANNEL_POOL_LIMIT {
                channels.push(channel);
            }
        }
    }

    async fn ensure_connected(&self) -> Result<Arc<Connection>> {
        {
            let connection_guard = self.connection.read().await;
            if let Some(connection) = connection_guard.as_ref() {
                if connection.status().connected() {
                    return Ok(connection.clone());
                }
            }
        }

        // One dial only; the backoff loop belongs to startup `connect()`
        warn!("Connection lost, attempting to reconnect");
        let connection = self.try_connect().await.map_err(|e| {
            PaymeshError::transport_error(format!("broker unavailable at {}: {}", self.config.url, e))
        })?;

        let connection = Arc::new(connection);
        *self.connection.write().await = Some(connection.clone());
        self.channels.lock().await.clear();
        info!("Reconnected to RabbitMQ at {}", self.config.url);
        Ok(connection)
    }

    /// Consume a queue on a dedicated channel
    pub async fn consume(
        &self,
        queue_name: &str,
        consumer_tag: &str,
    ) -> Result<BoxStream<'static, Result<Delivery>>> {
        let channel = self.get_channel().await?;

        let consumer = channel
            .basic_consume(
                queue_name,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        debug!("Created consumer {} for queue: {}", consumer_tag, queue_name);
        Ok(consumer
            .map(|delivery| delivery.map(Delivery::from).map_err(PaymeshError::from))
            .boxed())
    }

    /// Check if connection is healthy
    pub async fn is_connected(&self) -> bool {
        let connection_guard = self.connection.read().await;
        connection_guard
            .as_ref()
            .map(|conn| conn.status().connected())
            .unwrap_or(false)
    }

    /// Get connection statistics for monitoring
    pub async fn get_stats(&self) -> ConnectionStats {
        ConnectionStats {
            is_connected: self.is_connected().await,
            channel_pool_size: self.channels.lock().await.len(),
            url: self.config.url.clone(),
            exchange: self.config.exchange.clone(),
        }
    }
}

#[async_trait]
impl Publisher for ConnectionManager {
    async fn publish(&self, routing_key: &str, message: OutgoingMessage) -> Result<()> {
        let channel = self.get_channel().await?;

        let mut properties = BasicProperties::default()
            .with_content_type(message.content_type.into())
            .with_correlation_id(message.correlation_id.into());
        if let Some(reply_to) = message.reply_to {
            properties = properties.with_reply_to(reply_to.into());
        }

        let published = channel
            .basic_publish(
                &self.config.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await;

        // Return the channel before surfacing errors
        let result = match published {
            Ok(confirm) => confirm.await.map(|_| ()).map_err(PaymeshError::from),
            Err(e) => Err(e.into()),
        };
        self.return_channel(channel).await;

        result?;
        debug!("Published message to {}:{}", self.config.exchange, routing_key);
        Ok(())
    }
}

/// Acknowledges through the channel the delivery arrived on
struct LapinAcker(Acker);

#[async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self) -> Result<()> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await?;
        Ok(())
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        let property = |value: &Option<lapin::types::ShortString>| {
            value.as_ref().map(|s| s.to_string()).unwrap_or_default()
        };
        let correlation_id = property(delivery.properties.correlation_id());
        let reply_to = property(delivery.properties.reply_to());
        let content_type = property(delivery.properties.content_type());

        let mut converted = Delivery::new(correlation_id, reply_to, delivery.data)
            .with_redelivered(delivery.redelivered)
            .with_acker(Arc::new(LapinAcker(delivery.acker)));
        converted.content_type = content_type;
        converted
    }
}

fn with_heartbeat(url: &str, heartbeat_seconds: u16) -> String {
    if url.contains("heartbeat=") {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}heartbeat={}", url, separator, heartbeat_seconds)
}

/// Connection statistics for monitoring
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionStats {
    pub is_connected: bool,
    pub channel_pool_size: usize,
    pub url: String,
    pub exchange: String,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .finish()
    }
}
