use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::{TaskDistributor, Transaction, TransactionKind, TransactionStatus, TransactionStore};
use crate::message::CallName;
use crate::rpc::{decode_request, encode_response, HandlerResult, HandlerTable};
use crate::taxonomy::DomainError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiatePaymentRequest {
    pub email: String,
    pub amount: u64,
    pub currency: String,
    #[serde(default = "default_kind")]
    pub kind: TransactionKind,
}

fn default_kind() -> TransactionKind {
    TransactionKind::Payment
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingTransactionRequest {
    pub transaction_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub kind: TransactionKind,
    pub amount: u64,
    pub currency: String,
}

impl From<Transaction> for TransactionResponse {
    fn from(transaction: Transaction) -> Self {
        Self {
            transaction_id: transaction.id,
            status: transaction.status,
            kind: transaction.kind,
            amount: transaction.amount,
            currency: transaction.currency,
        }
    }
}

/// `initiate_payment` and `polling_transaction`, served by the payment service
pub struct PaymentHandlers {
    transactions: Arc<dyn TransactionStore>,
    tasks: Arc<dyn TaskDistributor>,
}

impl PaymentHandlers {
    pub fn new(transactions: Arc<dyn TransactionStore>, tasks: Arc<dyn TaskDistributor>) -> Self {
        Self { transactions, tasks }
    }

    pub fn into_table(self) -> HandlerTable {
        let handlers = Arc::new(self);
        let initiate = handlers.clone();
        let polling = handlers;

        HandlerTable::builder()
            .function(CallName::InitiatePayment, move |data| {
                let handlers = initiate.clone();
                async move { handlers.handle_initiate(data).await }
            })
            .function(CallName::PollingTransaction, move |data| {
                let handlers = polling.clone();
                async move { handlers.handle_polling(data).await }
            })
            .build()
    }

    async fn handle_initiate(&self, data: serde_json::Value) -> HandlerResult {
        let response = self.initiate_payment(decode_request(data)?).await?;
        encode_response(&response)
    }

    async fn handle_polling(&self, data: serde_json::Value) -> HandlerResult {
        let response = self.polling_transaction(decode_request(data)?).await?;
        encode_response(&response)
    }

    /// Record a pending transaction and hand it to the background job system.
    /// The provider call happens later; clients poll for the outcome.
    pub async fn initiate_payment(&self, request: InitiatePaymentRequest) -> Result<TransactionResponse, DomainError> {
        if request.amount == 0 {
            return Err(DomainError::invalid("amount must be positive"));
        }
        if request.currency.len() != 3 || !request.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::invalid("currency must be a three-letter ISO code"));
        }
        if request.email.trim().is_empty() {
            return Err(DomainError::invalid("email is required"));
        }

        let now = Utc::now();
        let transaction = Transaction {
            id: Uuid::new_v4(),
            email: request.email.trim().to_lowercase(),
            amount: request.amount,
            currency: request.currency.to_uppercase(),
            kind: request.kind,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let transaction = self.transactions.create_transaction(transaction).await?;

        let distributed = match transaction.kind {
            TransactionKind::Payment => self.tasks.distribute_send_payment_request_task(&transaction).await,
            TransactionKind::Withdrawal => self.tasks.distribute_send_withdrawal_request_task(&transaction).await,
        };

        if let Err(e) = distributed {
            error!("Failed to queue provider request for {}: {:#}", transaction.id, e);
            self.transactions
                .update_transaction(transaction.id, TransactionStatus::Failed)
                .await?;
            return Err(DomainError::internal("payment could not be queued"));
        }

        info!("Queued {:?} {} for {}", transaction.kind, transaction.id, transaction.email);
        Ok(transaction.into())
    }

    pub async fn polling_transaction(&self, request: PollingTransactionRequest) -> Result<TransactionResponse, DomainError> {
        let transaction = self.transactions.polling_transaction(request.transaction_id).await?;
        Ok(transaction.into())
    }
}
