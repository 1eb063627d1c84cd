//! Scriptable in-process ledger for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::gateway::*;
use crate::error::{AppError, AppResult, LedgerError};

pub const MOCK_SENDER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

#[derive(Default)]
struct MockState {
    next_credit_id: u64,
    credits: HashMap<String, Vec<LedgerCredit>>,
    roles: HashMap<String, String>,
    submitted: Vec<LedgerOperation>,
    pending_polls: u32,
    fail_submit: bool,
    fail_reads: bool,
    fail_next_credit_id: bool,
    fail_polls: bool,
    never_confirm: bool,
    revert: bool,
    hide_recorded: bool,
}

pub struct MockLedger {
    state: Mutex<MockState>,
    submits: AtomicUsize,
    reads: AtomicUsize,
    polls: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_credit_id: 1,
                ..Default::default()
            }),
            submits: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn set_next_credit_id(&self, id: u64) {
        self.state.lock().next_credit_id = id;
    }

    /// Put a credit on the ledger without going through `submit`
    pub fn seed_credit(&self, credit: LedgerCredit) {
        let mut state = self.state.lock();
        state.next_credit_id = state.next_credit_id.max(credit.id + 1);
        state
            .credits
            .entry(credit.student_id.clone())
            .or_default()
            .push(credit);
    }

    pub fn set_ledger_role(&self, address: &str, role: &str) {
        self.state
            .lock()
            .roles
            .insert(normalize_address(address), role.to_string());
    }

    pub fn set_pending_polls(&self, polls: u32) {
        self.state.lock().pending_polls = polls;
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.state.lock().fail_submit = fail;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    pub fn set_fail_next_credit_id(&self, fail: bool) {
        self.state.lock().fail_next_credit_id = fail;
    }

    pub fn set_fail_polls(&self, fail: bool) {
        self.state.lock().fail_polls = fail;
    }

    pub fn set_never_confirm(&self, never: bool) {
        self.state.lock().never_confirm = never;
    }

    pub fn set_revert(&self, revert: bool) {
        self.state.lock().revert = revert;
    }

    /// Recorded credits get an id but do not show up in `student_credits`
    pub fn set_hide_recorded(&self, hide: bool) {
        self.state.lock().hide_recorded = hide;
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<LedgerOperation> {
        self.state.lock().submitted.clone()
    }

    pub fn ledger_credits(&self, student_id: &str) -> Vec<LedgerCredit> {
        self.state
            .lock()
            .credits
            .get(student_id)
            .cloned()
            .unwrap_or_default()
    }

    fn read_guard(&self, query: &str) -> AppResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.state.lock().fail_reads {
            return Err(LedgerError::ReadFailed {
                query: query.to_string(),
                message: "connection refused".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerGateway for MockLedger {
    async fn submit(&self, operation: &LedgerOperation) -> AppResult<TxHandle> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        operation.validate()?;

        let mut state = self.state.lock();
        if state.fail_submit {
            return Err(LedgerError::SubmissionFailed {
                operation: operation.method().to_string(),
                message: "nonce too low".to_string(),
            }
            .into());
        }

        match operation {
            LedgerOperation::AssignRole { address, role } => {
                strict_address(address)?;
                state
                    .roles
                    .insert(normalize_address(address), role.as_str().to_string());
            }
            LedgerOperation::RecordCredit {
                student_id,
                course_name,
                score,
            } => {
                let id = state.next_credit_id;
                state.next_credit_id += 1;
                if !state.hide_recorded {
                    state
                        .credits
                        .entry(student_id.clone())
                        .or_default()
                        .push(LedgerCredit {
                            id,
                            student_id: student_id.clone(),
                            course_name: course_name.clone(),
                            score: *score,
                            teacher: Some(MOCK_SENDER.to_string()),
                            is_approved: false,
                        });
                }
            }
            LedgerOperation::ApproveCredit { credit_id } => {
                for credit in state.credits.values_mut().flatten() {
                    if credit.id == *credit_id {
                        credit.is_approved = true;
                    }
                }
            }
        }

        state.submitted.push(operation.clone());
        Ok(TxHandle::new(format!("0x{:064x}", n)))
    }

    async fn get_role(&self, address: &str) -> AppResult<Option<String>> {
        self.read_guard("getRole")?;
        strict_address(address)?;
        Ok(self
            .state
            .lock()
            .roles
            .get(&normalize_address(address))
            .cloned())
    }

    async fn student_credits(&self, student_id: &str) -> AppResult<Vec<LedgerCredit>> {
        self.read_guard("getStudentCredits")?;
        Ok(self.ledger_credits(student_id))
    }

    async fn next_credit_id(&self) -> AppResult<u64> {
        self.read_guard("nextCreditId")?;
        let state = self.state.lock();
        if state.fail_next_credit_id {
            return Err(LedgerError::ReadFailed {
                query: "nextCreditId".to_string(),
                message: "execution reverted".to_string(),
            }
            .into());
        }
        Ok(state.next_credit_id)
    }

    async fn inclusion_status(&self, _tx: &TxHandle) -> AppResult<InclusionStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();

        if state.fail_polls {
            return Err(LedgerError::ReadFailed {
                query: "eth_getTransactionReceipt".to_string(),
                message: "connection refused".to_string(),
            }
            .into());
        }
        if state.never_confirm {
            return Ok(InclusionStatus::Pending);
        }
        if state.pending_polls > 0 {
            state.pending_polls -= 1;
            return Ok(InclusionStatus::Pending);
        }
        if state.revert {
            return Ok(InclusionStatus::Reverted { block_number: 1 });
        }
        Ok(InclusionStatus::Included { block_number: 1 })
    }
}

/// Same parse the RPC client applies: lowercase `0x` prefix only
fn strict_address(address: &str) -> AppResult<()> {
    address
        .parse::<ethers::types::Address>()
        .map(|_| ())
        .map_err(|_| AppError::InvalidAddress(address.to_string()))
}
