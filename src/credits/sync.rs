use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument, warn};

use super::service::CreditService;
use crate::error::{AppError, AppResult, CreditError};
use crate::store::models::{CreditRecord, CreditStatus};

/// Auditor recorded on rows approved by the sweep rather than by an admin request
pub const LEDGER_SYNC_AUDITOR: &str = "ledger-sync";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub checked: usize,
    pub approved: usize,
    /// Pending rows whose ledger id the ledger does not report for that student
    pub missing: usize,
    pub failed: usize,
}

impl CreditService {
    /// Bring pending rows up to date with ledger approval state.
    ///
    /// Repairs approvals that landed on the ledger after the request gave up
    /// (confirmation timeout, local write failure). Per-student ledger read
    /// failures are counted, never fatal. Rows missing locally are not backfilled.
    #[instrument(skip(self))]
    pub async fn sync_pending(&self) -> AppResult<SyncReport> {
        let pending = self.store.pending_credits().await?;
        let mut report = SyncReport::default();

        let mut by_student: BTreeMap<String, Vec<CreditRecord>> = BTreeMap::new();
        for row in pending {
            by_student
                .entry(row.student_address.clone())
                .or_default()
                .push(row);
        }

        for (student, rows) in by_student {
            report.checked += rows.len();

            let ledger_credits = match self.ledger.student_credits(&student).await {
                Ok(credits) => credits,
                Err(e) => {
                    warn!(student = %student, error = %e, "Skipping student, ledger read failed");
                    report.failed += rows.len();
                    continue;
                }
            };
            let approved_on_ledger: HashMap<u64, bool> = ledger_credits
                .iter()
                .map(|c| (c.id, c.is_approved))
                .collect();

            for row in rows {
                let Some(ledger_id) = row.ledger_id() else {
                    continue;
                };

                match approved_on_ledger.get(&ledger_id) {
                    None => {
                        warn!(credit_id = row.id, ledger_id, student = %student, "Ledger does not report credit");
                        report.missing += 1;
                    }
                    Some(false) => {}
                    Some(true) => {
                        match self
                            .store
                            .update_status(row.id, CreditStatus::Approved, LEDGER_SYNC_AUDITOR)
                            .await
                        {
                            Ok(_) => report.approved += 1,
                            // Reviewed concurrently; nothing to repair
                            Err(AppError::Credit(CreditError::AlreadyProcessed { .. })) => {}
                            Err(e) => {
                                warn!(credit_id = row.id, error = %e, "Failed to mark credit approved");
                                report.failed += 1;
                            }
                        }
                    }
                }
            }
        }

        info!(
            checked = report.checked,
            approved = report.approved,
            missing = report.missing,
            failed = report.failed,
            "Pending credit sync finished"
        );
        Ok(report)
    }
}
