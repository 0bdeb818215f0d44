use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::message::CallName;
use crate::taxonomy::DomainError;

/// What a handler returns: a JSON reply or a domain failure
pub type HandlerResult = std::result::Result<serde_json::Value, DomainError>;

/// Trait for implementing call handlers
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Handle the `data` of an incoming envelope
    async fn handle(&self, data: serde_json::Value) -> HandlerResult;
}

/// Simple function-based handler
pub struct FunctionHandler<F> {
    handler: F,
}

impl<F> FunctionHandler<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> RpcHandler for FunctionHandler<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, data: serde_json::Value) -> HandlerResult {
        (self.handler)(data).await
    }
}

/// Decode handler input, reporting bad input as `INVALID`
pub fn decode_request<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, DomainError> {
    serde_json::from_value(data).map_err(|e| DomainError::invalid(format!("malformed request: {}", e)))
}

/// Encode handler output
pub fn encode_response<T: Serialize>(response: &T) -> HandlerResult {
    serde_json::to_value(response)
        .map_err(|e| DomainError::internal(format!("failed to encode response: {}", e)))
}

/// Handlers of one service, keyed by call name. Built once, read-only afterwards.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<CallName, Arc<dyn RpcHandler>>,
}

impl HandlerTable {
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder::default()
    }

    /// Resolve a wire name to its handler. Unknown or unregistered names are
    /// `NOT_IMPLEMENTED`.
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn RpcHandler>, DomainError> {
        let unknown = || DomainError::not_implemented(format!("call '{}' is not implemented", name));
        let call: CallName = name.parse().map_err(|_| unknown())?;
        self.handlers.get(&call).cloned().ok_or_else(unknown)
    }

    pub fn names(&self) -> impl Iterator<Item = CallName> + '_ {
        self.handlers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

#[derive(Default)]
pub struct HandlerTableBuilder {
    handlers: HashMap<CallName, Arc<dyn RpcHandler>>,
}

impl HandlerTableBuilder {
    /// Register a handler for a call
    pub fn handler<H>(mut self, name: CallName, handler: H) -> Self
    where
        H: RpcHandler + 'static,
    {
        info!("Registered RPC handler for call: {}", name);
        self.handlers.insert(name, Arc::new(handler));
        self
    }

    /// Register a function-based handler
    pub fn function<F, Fut>(self, name: CallName, handler: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler(name, FunctionHandler::new(handler))
    }

    pub fn build(self) -> HandlerTable {
        HandlerTable {
            handlers: self.handlers,
        }
    }
}
