//! Call handlers and the collaborators they depend on.
//!
//! Persistence, token issuance, password hashing and the background payment
//! job queue live outside this crate; handlers only see the traits below.

pub mod authentication;
pub mod payment;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::taxonomy::DomainError;

pub use authentication::AuthenticationHandlers;
pub use payment::PaymentHandlers;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Payment,
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub email: String,
    /// Minor currency units
    pub amount: u64,
    pub currency: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Failures reported by the persistence layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("storage failure: {0}")]
    Backend(String),
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => DomainError::not_found(err.to_string()),
            StoreError::AlreadyExists(_) => DomainError::already_exists(err.to_string()),
            StoreError::Backend(_) => DomainError::internal(err.to_string()),
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: User) -> Result<User, StoreError>;
    async fn get_user(&self, email: &str) -> Result<User, StoreError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn create_transaction(&self, transaction: Transaction) -> Result<Transaction, StoreError>;
    /// Current state of a transaction, as seen by a polling client
    async fn polling_transaction(&self, id: Uuid) -> Result<Transaction, StoreError>;
    async fn update_transaction(&self, id: Uuid, status: TransactionStatus) -> Result<Transaction, StoreError>;
}

/// One-way submission to the background job system that talks to the
/// payment provider. Jobs carry their own retry policy.
#[async_trait]
pub trait TaskDistributor: Send + Sync {
    async fn distribute_send_payment_request_task(&self, transaction: &Transaction) -> anyhow::Result<()>;
    async fn distribute_send_withdrawal_request_task(&self, transaction: &Transaction) -> anyhow::Result<()>;
}

pub trait TokenIssuer: Send + Sync {
    fn issue(&self, user: &User) -> Result<String, DomainError>;
}

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, DomainError>;
    fn verify(&self, password: &str, hash: &str) -> bool;
}
