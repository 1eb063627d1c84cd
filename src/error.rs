use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use tracing::error;

use crate::store::models::CreditStatus;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Credit error: {0}")]
    Credit(#[from] CreditError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded")]
    RateLimited,
}

/// Failures talking to the external ledger.
///
/// `ConfirmationTimeout` is deliberately distinct from `SubmissionFailed`:
/// the transaction was accepted and may still be included later.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger submission {operation} failed: {message}")]
    SubmissionFailed { operation: String, message: String },

    #[error("Transaction {tx_hash} was included but reverted")]
    Reverted { tx_hash: String },

    #[error("Transaction {tx_hash} not confirmed within {waited_ms}ms")]
    ConfirmationTimeout { tx_hash: String, waited_ms: u64 },

    #[error("Ledger read {query} failed: {message}")]
    ReadFailed { query: String, message: String },

    #[error("Could not decode {query} result: {message}")]
    DecodeFailure { query: String, message: String },
}

/// Credit workflow errors
#[derive(Error, Debug)]
pub enum CreditError {
    #[error("Credit record not found: {0}")]
    NotFound(i64),

    #[error("Credit {id} already processed (status: {status})")]
    AlreadyProcessed { id: i64, status: CreditStatus },

    #[error("Credit {0} has no ledger credit id and cannot be approved")]
    MissingLedgerId(i64),

    #[error("Ledger reported no new credit after transaction {tx_hash}")]
    NoLedgerCredits { tx_hash: String },

    #[error(
        "Ledger transaction {tx_hash} succeeded but local persistence failed \
         (ledger credit id {ledger_credit_id:?}): {message}"
    )]
    LocalPersistenceFailed {
        tx_hash: String,
        ledger_credit_id: Option<u64>,
        message: String,
    },
}

impl AppError {
    /// True when the ledger and the local store may now disagree.
    pub fn is_inconsistency(&self) -> bool {
        matches!(self, AppError::Credit(CreditError::LocalPersistenceFailed { .. }))
    }

    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            AppError::InvalidAddress(_) => (StatusCode::BAD_REQUEST, "INVALID_ADDRESS"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Config(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            AppError::Ledger(e) => match e {
                LedgerError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "LEDGER_UNAVAILABLE"),
                LedgerError::SubmissionFailed { .. } => {
                    (StatusCode::BAD_GATEWAY, "LEDGER_SUBMISSION_FAILED")
                }
                LedgerError::Reverted { .. } => (StatusCode::BAD_GATEWAY, "LEDGER_REVERTED"),
                LedgerError::ConfirmationTimeout { .. } => {
                    (StatusCode::ACCEPTED, "CONFIRMATION_TIMEOUT")
                }
                LedgerError::ReadFailed { .. } | LedgerError::DecodeFailure { .. } => {
                    (StatusCode::BAD_GATEWAY, "LEDGER_READ_FAILED")
                }
            },
            AppError::Credit(e) => match e {
                CreditError::NotFound(_) => (StatusCode::NOT_FOUND, "CREDIT_NOT_FOUND"),
                CreditError::AlreadyProcessed { .. } => (StatusCode::CONFLICT, "ALREADY_PROCESSED"),
                CreditError::MissingLedgerId(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "MISSING_LEDGER_ID")
                }
                CreditError::NoLedgerCredits { .. } => {
                    (StatusCode::BAD_GATEWAY, "LEDGER_READ_FAILED")
                }
                CreditError::LocalPersistenceFailed { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "LOCAL_PERSISTENCE_FAILED")
                }
            },
        }
    }

    /// Stable machine-readable code for the error.
    pub fn error_code(&self) -> &'static str {
        self.parts().1
    }

    pub fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    pub fn severity(&self) -> &'static str {
        if self.is_inconsistency() {
            "critical"
        } else {
            "error"
        }
    }

    /// Message safe to show to the caller.
    fn public_message(&self) -> String {
        match self {
            AppError::Database(_) => "A database error occurred".to_string(),
            AppError::Config(_) | AppError::Internal(_) => "An internal error occurred".to_string(),
            AppError::Ledger(LedgerError::ConfirmationTimeout { tx_hash, .. }) => format!(
                "Transaction {} was submitted but is not confirmed yet; \
                 it may still land, check the credit list later",
                tx_hash
            ),
            other => other.to_string(),
        }
    }
}

/// Payload carried in `data` of a failed envelope
#[derive(Serialize)]
pub struct ErrorDetails {
    pub error_code: String,
    pub severity: String,
}

/// Same shape as the success envelope in `api::models::ApiResponse`
#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
    pub data: ErrorDetails,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(error = %self, severity = self.severity(), "request failed");
        }

        let body = Json(ErrorResponse {
            code: status.as_u16(),
            message: self.public_message(),
            data: ErrorDetails {
                error_code: self.error_code().to_string(),
                severity: self.severity().to_string(),
            },
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
