use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::gateway::{InclusionStatus, LedgerGateway, TxHandle};
use crate::error::{AppResult, LedgerError};

#[derive(Debug, Clone, Copy)]
pub struct ConfirmationConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Observed inclusion of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: String,
    pub block_number: u64,
    pub polls: u32,
}

/// Blocks until a submitted transaction is included, or the deadline passes.
///
/// A timeout is reported as `LedgerError::ConfirmationTimeout`, never as a
/// submission failure: the transaction may still be included afterwards.
#[derive(Debug, Clone)]
pub struct ConfirmationWaiter {
    config: ConfirmationConfig,
}

impl ConfirmationWaiter {
    pub fn new(config: ConfirmationConfig) -> Self {
        let poll_interval = config.poll_interval.max(Duration::from_millis(1));
        Self {
            config: ConfirmationConfig {
                poll_interval,
                ..config
            },
        }
    }

    #[cfg(test)]
    pub fn config(&self) -> ConfirmationConfig {
        self.config
    }

    pub async fn wait_for_inclusion(
        &self,
        ledger: &dyn LedgerGateway,
        tx: &TxHandle,
    ) -> AppResult<Confirmation> {
        let start = Instant::now();

        let poll = async {
            let mut ticker = time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut polls: u32 = 0;

            loop {
                ticker.tick().await;
                polls += 1;

                match ledger.inclusion_status(tx).await {
                    Ok(InclusionStatus::Included { block_number }) => {
                        return Ok(Confirmation {
                            tx_hash: tx.hash.clone(),
                            block_number,
                            polls,
                        });
                    }
                    Ok(InclusionStatus::Reverted { block_number }) => {
                        debug!(tx_hash = %tx, block_number, "transaction reverted");
                        return Err(LedgerError::Reverted {
                            tx_hash: tx.hash.clone(),
                        }
                        .into());
                    }
                    Ok(InclusionStatus::Pending) => {
                        debug!(tx_hash = %tx, polls, "not yet included");
                    }
                    // Transient read errors do not end the wait; the deadline does
                    Err(e) => {
                        debug!(tx_hash = %tx, polls, error = %e, "inclusion poll failed");
                    }
                }
            }
        };

        match time::timeout(self.config.timeout, poll).await {
            Ok(result) => {
                if let Ok(confirmation) = &result {
                    info!(
                        tx_hash = %tx,
                        block_number = confirmation.block_number,
                        polls = confirmation.polls,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "✅ Transaction confirmed"
                    );
                }
                result
            }
            Err(_) => Err(LedgerError::ConfirmationTimeout {
                tx_hash: tx.hash.clone(),
                waited_ms: start.elapsed().as_millis() as u64,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::ledger::mock::MockLedger;

    fn waiter(timeout_ms: u64) -> ConfirmationWaiter {
        ConfirmationWaiter::new(ConfirmationConfig {
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[tokio::test]
    async fn test_confirms_after_pending_polls() {
        let ledger = MockLedger::new();
        ledger.set_pending_polls(3);
        let tx = TxHandle::new("0x01");

        let confirmation = waiter(1_000).wait_for_inclusion(&ledger, &tx).await.unwrap();
        assert_eq!(confirmation.tx_hash, "0x01");
        assert_eq!(confirmation.polls, 4);
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_error() {
        let ledger = MockLedger::new();
        ledger.set_never_confirm(true);
        let tx = TxHandle::new("0x02");

        let result = waiter(40).wait_for_inclusion(&ledger, &tx).await;
        match result {
            Err(AppError::Ledger(LedgerError::ConfirmationTimeout { tx_hash, waited_ms })) => {
                assert_eq!(tx_hash, "0x02");
                assert!(waited_ms >= 40);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        // Bounded interval: a 40ms wait at 5ms spacing cannot poll hundreds of times
        assert!(ledger.poll_count() < 20);
    }

    #[tokio::test]
    async fn test_reverted_transaction() {
        let ledger = MockLedger::new();
        ledger.set_revert(true);

        let result = waiter(1_000)
            .wait_for_inclusion(&ledger, &TxHandle::new("0x03"))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Ledger(LedgerError::Reverted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_read_errors_keep_polling_until_deadline() {
        let ledger = MockLedger::new();
        ledger.set_fail_polls(true);

        let result = waiter(30)
            .wait_for_inclusion(&ledger, &TxHandle::new("0x04"))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Ledger(LedgerError::ConfirmationTimeout { .. }))
        ));
        assert!(ledger.poll_count() > 1);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let waiter = ConfirmationWaiter::new(ConfirmationConfig {
            poll_interval: Duration::ZERO,
            timeout: Duration::from_secs(1),
        });
        assert!(waiter.config().poll_interval > Duration::ZERO);
    }
}
