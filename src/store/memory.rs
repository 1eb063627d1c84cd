use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use super::models::*;
use super::repository::{wallet_username, CreditStore};
use crate::error::{AppError, AppResult, CreditError};

/// Process-local credit store.
///
/// Mirrors `PgCreditStore` semantics (pending-only updates, unique ledger ids,
/// newest-first listings). Used by tests and by `STORE_BACKEND=memory`.
pub struct InMemoryCreditStore {
    credits: tokio::sync::RwLock<HashMap<i64, CreditRecord>>,
    users: tokio::sync::RwLock<Vec<User>>,
    next_credit_id: AtomicI64,
    next_user_id: AtomicI64,
    fail_writes: AtomicBool,
}

impl InMemoryCreditStore {
    pub fn new() -> Self {
        Self {
            credits: tokio::sync::RwLock::new(HashMap::new()),
            users: tokio::sync::RwLock::new(Vec::new()),
            next_credit_id: AtomicI64::new(1),
            next_user_id: AtomicI64::new(1),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail (simulates a lost database)
    #[cfg(test)]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.credits.read().await.len()
    }

    /// Insert a row as-is, bypassing reconciliation (seeding legacy rows)
    #[cfg(test)]
    pub async fn insert_raw(&self, mut record: CreditRecord) -> CreditRecord {
        record.id = self.next_credit_id.fetch_add(1, Ordering::SeqCst);
        self.credits.write().await.insert(record.id, record.clone());
        record
    }

    fn check_writable(&self) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn newest_first(mut records: Vec<CreditRecord>) -> Vec<CreditRecord> {
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records
    }

    async fn filtered<F>(&self, predicate: F) -> Vec<CreditRecord>
    where
        F: Fn(&CreditRecord) -> bool,
    {
        let credits = self.credits.read().await;
        Self::newest_first(credits.values().filter(|c| predicate(c)).cloned().collect())
    }
}

impl Default for InMemoryCreditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CreditStore for InMemoryCreditStore {
    async fn create_credit(&self, credit: &NewCredit) -> AppResult<CreditRecord> {
        self.check_writable()?;

        let mut credits = self.credits.write().await;
        let ledger_id = credit.stored_ledger_id()?;
        if let Some(id) = ledger_id {
            if credits.values().any(|c| c.ledger_credit_id == Some(id)) {
                return Err(AppError::InvalidInput(format!(
                    "ledger_credit_id {} already mirrored",
                    id
                )));
            }
        }

        let now = Utc::now();
        let record = CreditRecord {
            id: self.next_credit_id.fetch_add(1, Ordering::SeqCst),
            ledger_credit_id: ledger_id,
            student_address: credit.student_address.clone(),
            teacher_address: credit.teacher_address.clone(),
            course_name: credit.course_name.clone(),
            score: credit.score,
            status: CreditStatus::Pending,
            tx_hash: Some(credit.tx_hash.clone()),
            audit_admin: None,
            audit_time: None,
            created_at: now,
            updated_at: now,
        };
        credits.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_credit(&self, id: i64) -> AppResult<Option<CreditRecord>> {
        Ok(self.credits.read().await.get(&id).cloned())
    }

    async fn credits_by_student(&self, student_address: &str) -> AppResult<Vec<CreditRecord>> {
        Ok(self.filtered(|c| c.student_address == student_address).await)
    }

    async fn credits_by_teacher(&self, teacher_address: &str) -> AppResult<Vec<CreditRecord>> {
        Ok(self.filtered(|c| c.teacher_address == teacher_address).await)
    }

    async fn all_credits(&self) -> AppResult<Vec<CreditRecord>> {
        Ok(self.filtered(|_| true).await)
    }

    async fn pending_credits(&self) -> AppResult<Vec<CreditRecord>> {
        Ok(self
            .filtered(|c| c.status == CreditStatus::Pending && c.ledger_id().is_some())
            .await)
    }

    async fn update_status(
        &self,
        id: i64,
        status: CreditStatus,
        audit_admin: &str,
    ) -> AppResult<CreditRecord> {
        self.check_writable()?;

        let mut credits = self.credits.write().await;
        let record = credits.get_mut(&id).ok_or(CreditError::NotFound(id))?;

        if record.status != CreditStatus::Pending {
            return Err(CreditError::AlreadyProcessed {
                id,
                status: record.status,
            }
            .into());
        }

        let now = Utc::now();
        record.status = status;
        record.audit_admin = Some(audit_admin.to_string());
        record.audit_time = Some(now);
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn get_user_by_address(&self, address: &str) -> AppResult<Option<User>> {
        let wanted = address.trim().to_lowercase();
        let users = self.users.read().await;
        let mut matching: Vec<&User> = users
            .iter()
            .filter(|u| {
                u.address
                    .as_deref()
                    .map(|a| a.trim().to_lowercase() == wanted)
                    .unwrap_or(false)
            })
            .collect();
        matching.sort_by_key(|u| match u.role {
            Role::Admin => 1,
            Role::Teacher => 2,
            Role::Student => 3,
        });
        Ok(matching.first().map(|u| (*u).clone()))
    }

    async fn create_wallet_user(&self, address: &str, role: Role) -> AppResult<(User, bool)> {
        self.check_writable()?;

        let username = wallet_username(address);
        let mut users = self.users.write().await;
        if let Some(existing) = users.iter().find(|u| u.username == username) {
            return Ok((existing.clone(), false));
        }

        let now = Utc::now();
        let user = User {
            id: self.next_user_id.fetch_add(1, Ordering::SeqCst),
            username,
            address: Some(address.to_string()),
            role,
            created_at: now,
            updated_at: now,
        };
        users.push(user.clone());
        Ok((user, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_credit(ledger_credit_id: u64, student: &str) -> NewCredit {
        NewCredit {
            ledger_credit_id,
            student_address: student.to_string(),
            teacher_address: "0x1111111111111111111111111111111111111111".to_string(),
            course_name: "Algorithms".to_string(),
            score: dec!(95),
            tx_hash: format!("0x{:064x}", ledger_credit_id),
        }
    }

    #[tokio::test]
    async fn test_create_and_fetch() {
        let store = InMemoryCreditStore::new();
        let created = store.create_credit(&new_credit(7, "0xABC")).await.unwrap();

        assert_eq!(created.status, CreditStatus::Pending);
        assert_eq!(created.ledger_credit_id, Some(7));

        let fetched = store.get_credit(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.course_name, "Algorithms");
        assert_eq!(store.credits_by_student("0xABC").await.unwrap().len(), 1);
        assert!(store.credits_by_student("0xDEF").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_ledger_id_rejected() {
        let store = InMemoryCreditStore::new();
        store.create_credit(&new_credit(7, "0xABC")).await.unwrap();
        assert!(store.create_credit(&new_credit(7, "0xABC")).await.is_err());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_zero_ledger_id_stored_as_null() {
        let store = InMemoryCreditStore::new();
        let first = store.create_credit(&new_credit(0, "0xABC")).await.unwrap();
        let second = store.create_credit(&new_credit(0, "0xDEF")).await.unwrap();

        assert_eq!(first.ledger_credit_id, None);
        assert_eq!(second.ledger_credit_id, None);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_ledger_id_beyond_bigint_rejected() {
        let store = InMemoryCreditStore::new();
        let result = store
            .create_credit(&new_credit(i64::MAX as u64 + 1, "0xABC"))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Ledger(crate::error::LedgerError::DecodeFailure { .. }))
        ));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_wallet_user_creation_yields_one_user() {
        let store = std::sync::Arc::new(InMemoryCreditStore::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.create_wallet_user("0xabc", Role::Student).await })
            })
            .collect();

        let mut inserted = 0;
        let mut ids = Vec::new();
        for task in tasks {
            let (user, created) = task.await.unwrap().unwrap();
            inserted += created as usize;
            ids.push(user.id);
        }
        assert_eq!(inserted, 1);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.users.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_status_only_from_pending() {
        let store = InMemoryCreditStore::new();
        let created = store.create_credit(&new_credit(3, "0xABC")).await.unwrap();

        let approved = store
            .update_status(created.id, CreditStatus::Approved, "0xadmin")
            .await
            .unwrap();
        assert_eq!(approved.status, CreditStatus::Approved);
        assert!(approved.audit_time.is_some());

        let again = store
            .update_status(created.id, CreditStatus::Rejected, "0xadmin")
            .await;
        assert!(matches!(
            again,
            Err(AppError::Credit(CreditError::AlreadyProcessed { .. }))
        ));

        let missing = store.update_status(999, CreditStatus::Approved, "0xadmin").await;
        assert!(matches!(missing, Err(AppError::Credit(CreditError::NotFound(999)))));
    }

    #[tokio::test]
    async fn test_user_lookup_prefers_admin() {
        let store = InMemoryCreditStore::new();
        store.create_wallet_user("0xAbC", Role::Student).await.unwrap();
        store.create_wallet_user("0xabc", Role::Admin).await.unwrap();

        let user = store.get_user_by_address(" 0xABC ").await.unwrap().unwrap();
        assert_eq!(user.role, Role::Admin);
        assert!(store.get_user_by_address("0xdef").await.unwrap().is_none());
    }
}
