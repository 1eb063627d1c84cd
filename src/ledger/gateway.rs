use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, AppResult};
use crate::store::models::Role;

/// Longest student identifier / course name accepted for submission
pub const MAX_TEXT_ARG_LEN: usize = 128;

/// Opaque reference to a submitted ledger transaction.
///
/// Only identity matters; it is dropped once confirmation is observed or the wait times out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHandle {
    pub hash: String,
}

impl TxHandle {
    pub fn new(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hash)
    }
}

/// State-changing contract calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOperation {
    AssignRole { address: String, role: Role },
    RecordCredit {
        student_id: String,
        course_name: String,
        score: u8,
    },
    ApproveCredit { credit_id: u64 },
}

impl LedgerOperation {
    /// Contract method the operation maps to
    pub fn method(&self) -> &'static str {
        match self {
            LedgerOperation::AssignRole { .. } => "assignRole",
            LedgerOperation::RecordCredit { .. } => "recordCredit",
            LedgerOperation::ApproveCredit { .. } => "approveCredit",
        }
    }

    /// Argument checks that need no network round-trip
    pub fn validate(&self) -> AppResult<()> {
        match self {
            LedgerOperation::AssignRole { address, .. } => validate_address(address),
            LedgerOperation::RecordCredit {
                student_id,
                course_name,
                score,
            } => {
                validate_text_arg("student_id", student_id)?;
                validate_text_arg("course_name", course_name)?;
                if *score > 100 {
                    return Err(AppError::InvalidInput(format!(
                        "score {} is outside 0-100",
                        score
                    )));
                }
                Ok(())
            }
            LedgerOperation::ApproveCredit { credit_id } => {
                if *credit_id == 0 {
                    return Err(AppError::InvalidInput(
                        "ledger credit id must be non-zero".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// A credit as reported by `getStudentCredits`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCredit {
    pub id: u64,
    pub student_id: String,
    pub course_name: String,
    pub score: u8,
    pub teacher: Option<String>,
    pub is_approved: bool,
}

/// Result of one inclusion poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclusionStatus {
    Pending,
    Included { block_number: u64 },
    Reverted { block_number: u64 },
}

/// Submit/read primitives against the external ledger
///
/// Implementations must resolve transaction parameters (nonce, gas, chain id)
/// fresh on every `submit` and must never retry on their own.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Submit a state-changing operation. Arguments are validated before any network call.
    async fn submit(&self, operation: &LedgerOperation) -> AppResult<TxHandle>;

    /// Role string stored on the ledger; `None` when the ledger has no role for `address`
    async fn get_role(&self, address: &str) -> AppResult<Option<String>>;

    async fn student_credits(&self, student_id: &str) -> AppResult<Vec<LedgerCredit>>;

    /// Identifier the next recorded credit will receive
    async fn next_credit_id(&self) -> AppResult<u64>;

    async fn inclusion_status(&self, tx: &TxHandle) -> AppResult<InclusionStatus>;
}

/// `0x` followed by exactly 40 hex digits
pub fn validate_address(address: &str) -> AppResult<()> {
    let hex_part = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| AppError::InvalidAddress(format!("{:?} is missing the 0x prefix", address)))?;

    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::InvalidAddress(format!(
            "{:?} is not a 20-byte hex address",
            address
        )));
    }
    Ok(())
}

/// Canonical form used for cache keys and comparisons
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

fn validate_text_arg(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{} must not be empty", field)));
    }
    if value.chars().count() > MAX_TEXT_ARG_LEN {
        return Err(AppError::InvalidInput(format!(
            "{} exceeds {} characters",
            field, MAX_TEXT_ARG_LEN
        )));
    }
    Ok(())
}
