use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, CreditError, LedgerError};

/// Credit review status
///
/// Only `Pending -> Approved` and `Pending -> Rejected` exist; both targets are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "credit_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CreditStatus {
    Pending,
    Approved,
    Rejected,
}

impl CreditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditStatus::Pending => "pending",
            CreditStatus::Approved => "approved",
            CreditStatus::Rejected => "rejected",
        }
    }

    pub fn can_transition_to(&self, to: CreditStatus) -> bool {
        matches!(
            (self, to),
            (CreditStatus::Pending, CreditStatus::Approved)
                | (CreditStatus::Pending, CreditStatus::Rejected)
        )
    }
}

impl fmt::Display for CreditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Participant role, as stored on the ledger and mirrored in `users.role`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(AppError::InvalidInput(format!("Unknown role: {:?}", other))),
        }
    }
}

/// Local mirror row of a ledger credit
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CreditRecord {
    pub id: i64,
    /// Set once at creation from the confirmed ledger state, never updated
    pub ledger_credit_id: Option<i64>,
    pub student_address: String,
    pub teacher_address: String,
    pub course_name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub score: Decimal,
    pub status: CreditStatus,
    pub tx_hash: Option<String>,
    pub audit_admin: Option<String>,
    pub audit_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditRecord {
    /// Ledger id if one was recorded and it is non-zero
    pub fn ledger_id(&self) -> Option<u64> {
        self.ledger_credit_id
            .filter(|id| *id > 0)
            .map(|id| id as u64)
    }

    /// Guard for approval: status must be exactly pending and a ledger id must exist.
    /// Returns the ledger id to approve.
    pub fn approvable_ledger_id(&self) -> Result<u64, CreditError> {
        if self.status != CreditStatus::Pending {
            return Err(CreditError::AlreadyProcessed {
                id: self.id,
                status: self.status,
            });
        }
        self.ledger_id().ok_or(CreditError::MissingLedgerId(self.id))
    }
}

/// Values for a freshly reconciled credit row
#[derive(Debug, Clone)]
pub struct NewCredit {
    pub ledger_credit_id: u64,
    pub student_address: String,
    pub teacher_address: String,
    pub course_name: String,
    pub score: Decimal,
    pub tx_hash: String,
}

impl NewCredit {
    /// Column value for `ledger_credit_id`: id 0 is stored as NULL so the row
    /// exists but stays unapprovable; ids beyond the BIGINT range are refused.
    pub fn stored_ledger_id(&self) -> Result<Option<i64>, LedgerError> {
        if self.ledger_credit_id == 0 {
            return Ok(None);
        }
        i64::try_from(self.ledger_credit_id)
            .map(Some)
            .map_err(|_| LedgerError::DecodeFailure {
                query: "getStudentCredits".to_string(),
                message: format!(
                    "credit id {} exceeds the local id range",
                    self.ledger_credit_id
                ),
            })
    }
}

/// Application user
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub address: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
