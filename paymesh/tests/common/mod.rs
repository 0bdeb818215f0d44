#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use paymesh::services::{PasswordHasher, StoreError, TokenIssuer, User, UserStore};
use paymesh::{
    Acknowledger, CallName, CorrelationRegistry, Delivery, Dispatcher, DispatcherConfig, DomainError,
    HandlerTable, OutgoingMessage, Publisher, ReplyRouter, Result, RpcClient,
};

pub const CLIENT: &str = "gateway";

pub type DeliveryStream = UnboundedReceiverStream<Result<Delivery>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Ack { queue: String, correlation_id: String },
    Nack { queue: String, correlation_id: String, requeue: bool },
}

/// In-process stand-in for a topic exchange with exact-match bindings.
/// Unroutable messages are dropped, as the broker would.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Result<Delivery>>>>,
    bindings: Mutex<HashMap<String, String>>,
    settlements: Arc<Mutex<Vec<Settlement>>>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn declare(&self, queue: &str, bindings: &[String]) -> DeliveryStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.queues.lock().insert(queue.to_string(), tx);
        let mut routes = self.bindings.lock();
        for key in bindings {
            routes.insert(key.clone(), queue.to_string());
        }
        UnboundedReceiverStream::new(rx)
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.settlements.lock().clone()
    }

    fn enqueue(&self, queue: &str, delivery: Delivery) {
        let sender = match self.queues.lock().get(queue) {
            Some(sender) => sender.clone(),
            None => return,
        };
        deliver(queue, sender, delivery, self.settlements.clone());
    }
}

fn deliver(
    queue: &str,
    sender: mpsc::UnboundedSender<Result<Delivery>>,
    delivery: Delivery,
    settlements: Arc<Mutex<Vec<Settlement>>>,
) {
    let acker = Arc::new(MemoryAcker {
        queue: queue.to_string(),
        sender: sender.clone(),
        original: delivery.clone(),
        settlements,
    });
    let _ = sender.send(Ok(delivery.with_acker(acker)));
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, routing_key: &str, message: OutgoingMessage) -> Result<()> {
        let queue = self.bindings.lock().get(routing_key).cloned();
        if let Some(queue) = queue {
            let delivery = Delivery::new(
                message.correlation_id,
                message.reply_to.unwrap_or_default(),
                message.body,
            );
            self.enqueue(&queue, delivery);
        }
        Ok(())
    }
}

struct MemoryAcker {
    queue: String,
    sender: mpsc::UnboundedSender<Result<Delivery>>,
    original: Delivery,
    settlements: Arc<Mutex<Vec<Settlement>>>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.settlements.lock().push(Settlement::Ack {
            queue: self.queue.clone(),
            correlation_id: self.original.correlation_id.clone(),
        });
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.settlements.lock().push(Settlement::Nack {
            queue: self.queue.clone(),
            correlation_id: self.original.correlation_id.clone(),
            requeue,
        });
        if requeue {
            let again = self.original.clone().with_redelivered(true);
            deliver(&self.queue, self.sender.clone(), again, self.settlements.clone());
        }
        Ok(())
    }
}

/// Declare the work queue of the service owning `handlers`' calls
pub fn service_queue(broker: &MemoryBroker, service: &str, handlers: &HandlerTable) -> DeliveryStream {
    let bindings: Vec<String> = handlers.names().map(|name| name.routing_key(service)).collect();
    broker.declare(service, &bindings)
}

pub fn dispatcher(broker: &Arc<MemoryBroker>, service: &str, handlers: HandlerTable) -> Dispatcher {
    Dispatcher::new(DispatcherConfig::new(service), handlers, broker.clone())
}

/// Bind a service queue and run a dispatcher on it in the background
pub fn spawn_service(broker: &Arc<MemoryBroker>, service: &str, handlers: HandlerTable) -> JoinHandle<()> {
    let stream = service_queue(broker, service, &handlers);
    let dispatcher = dispatcher(broker, service, handlers);
    tokio::spawn(async move { dispatcher.run(stream).await })
}

/// Bind the client's reply queue, start its router, return the client
pub fn connect_client(broker: &Arc<MemoryBroker>, timeout: Duration) -> RpcClient {
    let bindings: Vec<String> = CallName::ALL.iter().map(|call| call.routing_key(CLIENT)).collect();
    let replies = broker.declare("gateway-replies", &bindings);

    let registry = Arc::new(CorrelationRegistry::new());
    tokio::spawn(ReplyRouter::new(CLIENT, registry.clone()).run(replies));

    RpcClient::new(CLIENT, broker.clone(), registry).with_default_timeout(timeout)
}

/// Poll `condition` until it holds or a second passes
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[derive(Default)]
pub struct MemoryUsers(Mutex<HashMap<String, User>>);

impl MemoryUsers {
    pub fn with_user(email: &str, password: &str) -> Self {
        let users = Self::default();
        users.0.lock().insert(
            email.to_string(),
            User {
                id: Uuid::new_v4(),
                email: email.to_string(),
                password_hash: format!("hashed:{}", password),
                created_at: Utc::now(),
            },
        );
        users
    }
}

#[async_trait]
impl UserStore for MemoryUsers {
    async fn create_user(&self, user: User) -> std::result::Result<User, StoreError> {
        let mut users = self.0.lock();
        if users.contains_key(&user.email) {
            return Err(StoreError::AlreadyExists(format!("user {}", user.email)));
        }
        users.insert(user.email.clone(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, email: &str) -> std::result::Result<User, StoreError> {
        self.0
            .lock()
            .get(email)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {}", email)))
    }
}

pub struct PlainHasher;

impl PasswordHasher for PlainHasher {
    fn hash(&self, password: &str) -> std::result::Result<String, DomainError> {
        Ok(format!("hashed:{}", password))
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        hash == format!("hashed:{}", password)
    }
}

pub struct FixedToken(pub &'static str);

impl TokenIssuer for FixedToken {
    fn issue(&self, _user: &User) -> std::result::Result<String, DomainError> {
        Ok(self.0.to_string())
    }
}
