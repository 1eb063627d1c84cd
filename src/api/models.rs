use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::roles::RoleSource;
use crate::store::models::{Role, User};

/// Uniform response envelope; failures use the same shape (see `error::ErrorResponse`)
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            code: 200,
            message: message.into(),
            data: Some(data),
        })
    }
}

// ========== REQUESTS ==========

#[derive(Debug, Deserialize, Validate)]
pub struct RecordCreditRequest {
    /// Student identifier as stored on the ledger (usually a wallet address)
    #[validate(length(min = 1, max = 128, message = "must be 1-128 characters"))]
    pub student_address: String,
    #[validate(length(min = 1, max = 128, message = "must be 1-128 characters"))]
    pub course_name: String,
    /// Range is enforced by the credit service
    #[serde(with = "rust_decimal::serde::float")]
    pub score: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewCreditRequest {
    #[validate(range(min = 1, message = "must be a positive credit id"))]
    pub credit_id: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignRoleRequest {
    #[validate(length(equal = 42, message = "must be a 0x-prefixed 20-byte address"))]
    pub user_address: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct RoleQuery {
    pub user_address: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct WalletLoginRequest {
    #[validate(length(equal = 42, message = "must be a 0x-prefixed 20-byte address"))]
    pub address: String,
}

// ========== RESPONSES ==========

#[derive(Debug, Serialize)]
pub struct AssignRoleResponse {
    pub tx_hash: String,
    pub user_address: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct RoleResponse {
    pub user_address: String,
    pub role: Role,
    pub source: RoleSource,
}

#[derive(Debug, Serialize)]
pub struct WalletLoginResponse {
    pub user: User,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub ledger_reachable: bool,
    pub role_cache_entries: usize,
}
