use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::locks::StudentLocks;
use crate::error::{AppError, AppResult, CreditError};
use crate::ledger::{
    normalize_address, validate_address, ConfirmationWaiter, LedgerCredit, LedgerGateway,
    LedgerOperation, TxHandle,
};
use crate::store::models::{CreditRecord, CreditStatus, NewCredit, Role};
use crate::store::repository::CreditStore;

/// A teacher's credit submission
#[derive(Debug, Clone)]
pub struct CreditSubmission {
    /// Free-form student identifier as stored on the ledger
    pub student_id: String,
    pub course_name: String,
    pub score: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedCredit {
    pub credit: CreditRecord,
    pub tx_hash: String,
    pub ledger_credit_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewedCredit {
    pub credit: CreditRecord,
    /// Approval transaction; `None` for rejections
    pub tx_hash: Option<String>,
}

/// Reconciles credit writes between the ledger and the local mirror.
///
/// Every write goes to the ledger first and is mirrored locally only after the
/// transaction is confirmed. Nothing here retries.
pub struct CreditService {
    pub(super) ledger: Arc<dyn LedgerGateway>,
    pub(super) store: Arc<dyn CreditStore>,
    waiter: ConfirmationWaiter,
    locks: StudentLocks,
}

impl CreditService {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        store: Arc<dyn CreditStore>,
        waiter: ConfirmationWaiter,
    ) -> Self {
        Self {
            ledger,
            store,
            waiter,
            locks: StudentLocks::new(),
        }
    }

    /// Record a credit on the ledger and mirror it as a `pending` row.
    ///
    /// The row is created only after confirmation and read-back. A confirmation
    /// timeout leaves no row: the caller must check back later, not resubmit.
    #[instrument(skip(self, submission), fields(student = %submission.student_id, course = %submission.course_name))]
    pub async fn submit_credit(
        &self,
        teacher_address: &str,
        submission: CreditSubmission,
    ) -> AppResult<SubmittedCredit> {
        validate_address(teacher_address)?;
        let ledger_score = ledger_score(submission.score)?;
        let student_id = canonical_student_id(&submission.student_id);
        let course_name = submission.course_name.trim().to_string();

        let operation = LedgerOperation::RecordCredit {
            student_id: student_id.clone(),
            course_name: course_name.clone(),
            score: ledger_score,
        };
        operation.validate()?;

        let _guard = self.locks.acquire(&student_id).await;

        // Lower bound for the id this submission will receive
        let floor = match self.ledger.next_credit_id().await {
            Ok(next) => Some(next),
            Err(e) => {
                warn!(error = %e, "nextCreditId unavailable, deriving credit id without lower bound");
                None
            }
        };

        let tx = self.ledger.submit(&operation).await?;
        info!(tx_hash = %tx, "recordCredit submitted, waiting for confirmation");

        if let Err(e) = self.waiter.wait_for_inclusion(self.ledger.as_ref(), &tx).await {
            warn!(tx_hash = %tx, error = %e, "recordCredit not confirmed, no local row created");
            return Err(e);
        }

        let ledger_credits = self.ledger.student_credits(&student_id).await?;
        let ledger_credit_id = derive_ledger_credit_id(&ledger_credits, floor).ok_or_else(|| {
            warn!(tx_hash = %tx, seen = ledger_credits.len(), ?floor, "new credit not visible on ledger");
            CreditError::NoLedgerCredits {
                tx_hash: tx.hash.clone(),
            }
        })?;

        if ledger_credit_id == 0 {
            warn!(tx_hash = %tx, "ledger assigned credit id 0; mirrored without a ledger id, approval is blocked");
        }

        let new_credit = NewCredit {
            ledger_credit_id,
            student_address: student_id,
            teacher_address: normalize_address(teacher_address),
            course_name,
            score: submission.score.round_dp(2),
            tx_hash: tx.hash.clone(),
        };

        let credit = self
            .store
            .create_credit(&new_credit)
            .await
            .map_err(|e| persistence_failure(&tx, Some(ledger_credit_id), e))?;

        info!(
            tx_hash = %tx,
            ledger_credit_id,
            credit_id = credit.id,
            "✅ Credit recorded and mirrored"
        );

        Ok(SubmittedCredit {
            credit,
            tx_hash: tx.hash,
            ledger_credit_id,
        })
    }

    /// Approve a pending credit on the ledger, then mark the local row approved.
    ///
    /// Guards (row pending, ledger id present) are checked before any ledger call.
    #[instrument(skip(self))]
    pub async fn approve_credit(&self, credit_id: i64, auditor: &str) -> AppResult<ReviewedCredit> {
        validate_address(auditor)?;

        let record = self
            .store
            .get_credit(credit_id)
            .await?
            .ok_or(CreditError::NotFound(credit_id))?;
        let ledger_credit_id = record.approvable_ledger_id()?;

        let tx = self
            .ledger
            .submit(&LedgerOperation::ApproveCredit {
                credit_id: ledger_credit_id,
            })
            .await?;

        // On timeout the row stays pending; sync_pending picks it up once included
        self.waiter
            .wait_for_inclusion(self.ledger.as_ref(), &tx)
            .await?;

        let credit = self
            .store
            .update_status(credit_id, CreditStatus::Approved, &normalize_address(auditor))
            .await
            .map_err(|e| persistence_failure(&tx, Some(ledger_credit_id), e))?;

        info!(tx_hash = %tx, credit_id, ledger_credit_id, "✅ Credit approved");
        Ok(ReviewedCredit {
            credit,
            tx_hash: Some(tx.hash),
        })
    }

    /// Reject a pending credit. Local only; the ledger has no rejection call.
    #[instrument(skip(self))]
    pub async fn reject_credit(&self, credit_id: i64, auditor: &str) -> AppResult<ReviewedCredit> {
        validate_address(auditor)?;

        let record = self
            .store
            .get_credit(credit_id)
            .await?
            .ok_or(CreditError::NotFound(credit_id))?;
        if !record.status.can_transition_to(CreditStatus::Rejected) {
            return Err(CreditError::AlreadyProcessed {
                id: credit_id,
                status: record.status,
            }
            .into());
        }

        let credit = self
            .store
            .update_status(credit_id, CreditStatus::Rejected, &normalize_address(auditor))
            .await?;

        info!(credit_id, "Credit rejected");
        Ok(ReviewedCredit {
            credit,
            tx_hash: None,
        })
    }

    /// Students see their own credits, teachers what they recorded, admins everything
    pub async fn list_for(&self, address: &str, role: Role) -> AppResult<Vec<CreditRecord>> {
        let address = normalize_address(address);
        match role {
            Role::Student => self.store.credits_by_student(&address).await,
            Role::Teacher => self.store.credits_by_teacher(&address).await,
            Role::Admin => self.store.all_credits().await,
        }
    }

    pub async fn pending_credits(&self) -> AppResult<Vec<CreditRecord>> {
        self.store.pending_credits().await
    }

    pub async fn get_credit(&self, credit_id: i64) -> AppResult<CreditRecord> {
        Ok(self
            .store
            .get_credit(credit_id)
            .await?
            .ok_or(CreditError::NotFound(credit_id))?)
    }
}

/// Ledger scores are whole numbers in 0-100; fractional input is truncated
fn ledger_score(score: Decimal) -> AppResult<u8> {
    if score < Decimal::ZERO || score > Decimal::ONE_HUNDRED {
        return Err(AppError::InvalidInput(format!(
            "score {} is outside 0-100",
            score
        )));
    }
    score
        .trunc()
        .to_u8()
        .ok_or_else(|| AppError::InvalidInput(format!("score {} is not representable", score)))
}

/// Full hex addresses are lowercased so ledger keys and listings agree;
/// any other identifier is kept as given (trimmed)
fn canonical_student_id(student_id: &str) -> String {
    let trimmed = student_id.trim();
    if validate_address(trimmed).is_ok() {
        normalize_address(trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Highest ledger id for the student, provided it is not below `floor`
/// (the `nextCreditId` value read before submitting).
pub fn derive_ledger_credit_id(credits: &[LedgerCredit], floor: Option<u64>) -> Option<u64> {
    let max = credits.iter().map(|c| c.id).max()?;
    match floor {
        Some(floor) if max < floor => None,
        _ => Some(max),
    }
}

fn persistence_failure(tx: &TxHandle, ledger_credit_id: Option<u64>, err: AppError) -> AppError {
    error!(
        tx_hash = %tx,
        ledger_credit_id = ?ledger_credit_id,
        error = %err,
        inconsistency = true,
        "❌ Ledger write succeeded but local persistence failed; ledger and local store disagree"
    );
    CreditError::LocalPersistenceFailed {
        tx_hash: tx.hash.clone(),
        ledger_credit_id,
        message: err.to_string(),
    }
    .into()
}
