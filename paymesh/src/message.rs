use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{PaymeshError, Result};
use crate::taxonomy::DomainError;

/// Content type carried by every PayMesh message
pub const CONTENT_TYPE: &str = "text/plain";

/// Calls known to both ends of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallName {
    RegisterUser,
    LoginUser,
    InitiatePayment,
    PollingTransaction,
}

impl CallName {
    pub const ALL: [CallName; 4] = [
        Self::RegisterUser,
        Self::LoginUser,
        Self::InitiatePayment,
        Self::PollingTransaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegisterUser => "register_user",
            Self::LoginUser => "login_user",
            Self::InitiatePayment => "initiate_payment",
            Self::PollingTransaction => "polling_transaction",
        }
    }

    /// The service whose work queue handles this call
    pub fn owner(&self) -> &'static str {
        match self {
            Self::RegisterUser | Self::LoginUser => "authentication",
            Self::InitiatePayment | Self::PollingTransaction => "payment",
        }
    }

    /// `<service>.<call_name>`, used both for work and reply routing
    pub fn routing_key(&self, service: &str) -> String {
        format!("{}.{}", service, self.as_str())
    }

    /// Routing key of the owning service's work queue
    pub fn work_routing_key(&self) -> String {
        self.routing_key(self.owner())
    }
}

impl fmt::Display for CallName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallName {
    type Err = PaymeshError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| PaymeshError::invalid_message(format!("unknown call name '{}'", s)))
    }
}

/// Wire wrapper for a call: handler name plus handler-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub name: String,
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(name: CallName, data: impl Serialize) -> Result<Self> {
        Ok(Self {
            name: name.as_str().to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Serialize envelope to bytes for transmission
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize envelope from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Deserialize payload to specific type
    pub fn deserialize_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Wire form of a structured failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "statusCode", default)]
    pub status_code: u16,
    #[serde(default)]
    pub message: String,
}

impl ErrorEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Inspect a reply body. Returns `Ok(Some(_))` for an error envelope,
    /// `Ok(None)` for a success body and `Err(_)` when the body is not JSON.
    ///
    /// A body is an error envelope only when it is a JSON object whose
    /// `statusCode` is present and non-zero.
    pub fn detect(body: &[u8]) -> Result<Option<Self>> {
        let value: serde_json::Value = serde_json::from_slice(body)?;
        let status = match value.get("statusCode").and_then(serde_json::Value::as_i64) {
            Some(0) | None => return Ok(None),
            // Out of range statuses still mark a failure; they decode as INTERNAL
            Some(status) => u16::try_from(status).unwrap_or(u16::MAX),
        };

        let message = value
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Some(Self {
            status_code: status,
            message,
        }))
    }

    pub fn into_domain_error(self) -> DomainError {
        DomainError::new(
            crate::taxonomy::DomainErrorCode::from_envelope_status(self.status_code),
            self.message,
        )
    }
}

impl From<&DomainError> for ErrorEnvelope {
    fn from(err: &DomainError) -> Self {
        Self {
            status_code: err.envelope_status(),
            message: err.message.clone(),
        }
    }
}

/// A message ready to be handed to a [`Publisher`]
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub correlation_id: String,
    pub reply_to: Option<String>,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl OutgoingMessage {
    /// A call carrying an envelope and the key replies must be routed to
    pub fn request(correlation_id: impl Into<String>, reply_to: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            reply_to: Some(reply_to.into()),
            content_type: CONTENT_TYPE.to_string(),
            body,
        }
    }

    /// A reply to an earlier call
    pub fn reply(correlation_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            reply_to: None,
            content_type: CONTENT_TYPE.to_string(),
            body,
        }
    }
}

/// Anything that can put a message on the broker
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, routing_key: &str, message: OutgoingMessage) -> Result<()>;
}

/// Settles a delivery with the broker
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// A message received from the broker, consumed exactly once
#[derive(Clone)]
pub struct Delivery {
    pub correlation_id: String,
    pub reply_to: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl Delivery {
    /// A delivery with nothing to acknowledge
    pub fn new(correlation_id: impl Into<String>, reply_to: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            reply_to: reply_to.into(),
            content_type: CONTENT_TYPE.to_string(),
            body,
            redelivered: false,
            acker: None,
        }
    }

    pub fn with_acker(mut self, acker: Arc<dyn Acknowledger>) -> Self {
        self.acker = Some(acker);
        self
    }

    pub fn with_redelivered(mut self, redelivered: bool) -> Self {
        self.redelivered = redelivered;
        self
    }

    pub async fn ack(&self) -> Result<()> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        match &self.acker {
            Some(acker) => acker.nack(requeue).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("correlation_id", &self.correlation_id)
            .field("reply_to", &self.reply_to)
            .field("content_type", &self.content_type)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
