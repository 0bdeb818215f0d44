//! Domain error codes and their translation to every transport PayMesh speaks.
//!
//! Handlers fail with a [`DomainError`]. Before the failure leaves the process it
//! is rendered as an HTTP status (gateway), a gRPC status (RPC front-ends) or the
//! `statusCode` of an [`ErrorEnvelope`](crate::message::ErrorEnvelope) on the
//! broker. All translations are total: anything unknown becomes `INTERNAL`/500.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tonic::Code;

/// Business-level failure categories shared across transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainErrorCode {
    AlreadyExists,
    Internal,
    Invalid,
    NotFound,
    NotImplemented,
    Authentication,
    /// A code this build does not know about
    #[serde(other)]
    Unrecognized,
}

impl DomainErrorCode {
    pub const ALL: [DomainErrorCode; 7] = [
        Self::AlreadyExists,
        Self::Internal,
        Self::Invalid,
        Self::NotFound,
        Self::NotImplemented,
        Self::Authentication,
        Self::Unrecognized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Internal => "INTERNAL",
            Self::Invalid => "INVALID",
            Self::NotFound => "NOT_FOUND",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::Authentication => "AUTHENTICATION",
            Self::Unrecognized => "UNRECOGNIZED",
        }
    }

    /// HTTP status used by the gateway
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::AlreadyExists => StatusCode::CONFLICT,
            Self::Invalid => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Internal | Self::Unrecognized => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// gRPC status code used by RPC front-ends
    pub fn rpc_code(&self) -> Code {
        match self {
            Self::AlreadyExists => Code::AlreadyExists,
            Self::Invalid => Code::InvalidArgument,
            Self::NotFound => Code::NotFound,
            Self::NotImplemented => Code::Unimplemented,
            Self::Authentication => Code::Unauthenticated,
            Self::Internal | Self::Unrecognized => Code::Internal,
        }
    }

    /// `statusCode` carried in an error envelope. Mirrors the HTTP column.
    pub fn envelope_status(&self) -> u16 {
        self.http_status().as_u16()
    }

    /// Recover a code from an envelope status. 403 is accepted as
    /// `ALREADY_EXISTS` for peers that still send it.
    pub fn from_envelope_status(status: u16) -> Self {
        match status {
            409 | 403 => Self::AlreadyExists,
            400 => Self::Invalid,
            404 => Self::NotFound,
            501 => Self::NotImplemented,
            401 => Self::Authentication,
            _ => Self::Internal,
        }
    }
}

impl fmt::Display for DomainErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainErrorCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = match s {
            "ALREADY_EXISTS" => Self::AlreadyExists,
            "INTERNAL" => Self::Internal,
            "INVALID" => Self::Invalid,
            "NOT_FOUND" => Self::NotFound,
            "NOT_IMPLEMENTED" => Self::NotImplemented,
            "AUTHENTICATION" => Self::Authentication,
            _ => Self::Unrecognized,
        };
        Ok(code)
    }
}

/// An expected business failure, carried end to end as data
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct DomainError {
    pub code: DomainErrorCode,
    pub message: String,
}

impl DomainError {
    pub fn new(code: DomainErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(DomainErrorCode::AlreadyExists, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(DomainErrorCode::Internal, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(DomainErrorCode::Invalid, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(DomainErrorCode::NotFound, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(DomainErrorCode::NotImplemented, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(DomainErrorCode::Authentication, message)
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn rpc_code(&self) -> Code {
        self.code.rpc_code()
    }

    pub fn envelope_status(&self) -> u16 {
        self.code.envelope_status()
    }
}

impl From<DomainError> for tonic::Status {
    fn from(err: DomainError) -> Self {
        tonic::Status::new(err.code.rpc_code(), err.message)
    }
}
