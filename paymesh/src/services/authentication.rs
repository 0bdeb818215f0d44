use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{PasswordHasher, TokenIssuer, User, UserStore};
use crate::message::CallName;
use crate::rpc::{decode_request, encode_response, HandlerResult, HandlerTable};
use crate::taxonomy::DomainError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterUserResponse {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginUserRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginUserResponse {
    pub access_token: String,
    pub email: String,
}

/// `register_user` and `login_user`, served by the authentication service
pub struct AuthenticationHandlers {
    users: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenIssuer>,
}

impl AuthenticationHandlers {
    pub fn new(users: Arc<dyn UserStore>, hasher: Arc<dyn PasswordHasher>, tokens: Arc<dyn TokenIssuer>) -> Self {
        Self { users, hasher, tokens }
    }

    pub fn into_table(self) -> HandlerTable {
        let handlers = Arc::new(self);
        let register = handlers.clone();
        let login = handlers;

        HandlerTable::builder()
            .function(CallName::RegisterUser, move |data| {
                let handlers = register.clone();
                async move { handlers.handle_register(data).await }
            })
            .function(CallName::LoginUser, move |data| {
                let handlers = login.clone();
                async move { handlers.handle_login(data).await }
            })
            .build()
    }

    async fn handle_register(&self, data: serde_json::Value) -> HandlerResult {
        let response = self.register_user(decode_request(data)?).await?;
        encode_response(&response)
    }

    async fn handle_login(&self, data: serde_json::Value) -> HandlerResult {
        let response = self.login_user(decode_request(data)?).await?;
        encode_response(&response)
    }

    pub async fn register_user(&self, request: RegisterUserRequest) -> Result<RegisterUserResponse, DomainError> {
        validate_credentials(&request.email, &request.password)?;

        let user = User {
            id: Uuid::new_v4(),
            email: request.email.trim().to_lowercase(),
            password_hash: self.hasher.hash(&request.password)?,
            created_at: Utc::now(),
        };
        let user = self.users.create_user(user).await?;

        info!("Registered user {}", user.email);
        Ok(RegisterUserResponse {
            id: user.id,
            email: user.email,
        })
    }

    pub async fn login_user(&self, request: LoginUserRequest) -> Result<LoginUserResponse, DomainError> {
        validate_credentials(&request.email, &request.password)?;

        let user = self.users.get_user(&request.email.trim().to_lowercase()).await?;
        if !self.hasher.verify(&request.password, &user.password_hash) {
            debug!("Rejected login for {}", user.email);
            return Err(DomainError::authentication("invalid email or password"));
        }

        Ok(LoginUserResponse {
            access_token: self.tokens.issue(&user)?,
            email: user.email,
        })
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<(), DomainError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
        _ => return Err(DomainError::invalid("email address is invalid")),
    }
    if password.is_empty() {
        return Err(DomainError::invalid("password is required"));
    }
    Ok(())
}
