use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::models::*;
use crate::error::{AppResult, CreditError};

/// Local mirror persistence
///
/// Plain CRUD. Transition legality is decided by `CreditService`; the only
/// row-level rule here is that a status update applies to pending rows only.
#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn create_credit(&self, credit: &NewCredit) -> AppResult<CreditRecord>;

    async fn get_credit(&self, id: i64) -> AppResult<Option<CreditRecord>>;

    async fn credits_by_student(&self, student_address: &str) -> AppResult<Vec<CreditRecord>>;

    async fn credits_by_teacher(&self, teacher_address: &str) -> AppResult<Vec<CreditRecord>>;

    async fn all_credits(&self) -> AppResult<Vec<CreditRecord>>;

    /// Pending rows that carry a non-zero ledger credit id
    async fn pending_credits(&self) -> AppResult<Vec<CreditRecord>>;

    /// Move a pending row to `status`, stamping auditor and audit time.
    /// Fails with `AlreadyProcessed` when the row is no longer pending.
    async fn update_status(
        &self,
        id: i64,
        status: CreditStatus,
        audit_admin: &str,
    ) -> AppResult<CreditRecord>;

    /// Highest-privilege user bound to `address` (admin > teacher > student)
    async fn get_user_by_address(&self, address: &str) -> AppResult<Option<User>>;

    /// Insert the `wallet_` user for `address`, or return the one a concurrent
    /// login already created. The flag is true only when this call inserted it.
    async fn create_wallet_user(&self, address: &str, role: Role) -> AppResult<(User, bool)>;
}

/// Username given to users created through wallet login
pub fn wallet_username(address: &str) -> String {
    let mut username = format!("wallet_{}", address);
    username.truncate(50);
    username
}

const CREDIT_COLUMNS: &str = r#"
    id, ledger_credit_id, student_address, teacher_address, course_name, score,
    status, tx_hash, audit_admin, audit_time, created_at, updated_at
"#;

/// Postgres-backed credit store
pub struct PgCreditStore {
    pub pool: PgPool,
}

impl PgCreditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, clause: &str, bind: Option<&str>) -> AppResult<Vec<CreditRecord>> {
        let sql = format!(
            "SELECT {} FROM credits {} ORDER BY created_at DESC, id DESC",
            CREDIT_COLUMNS, clause
        );
        let mut query = sqlx::query_as::<_, CreditRecord>(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl CreditStore for PgCreditStore {
    // ========== CREDIT OPERATIONS ==========

    async fn create_credit(&self, credit: &NewCredit) -> AppResult<CreditRecord> {
        let sql = format!(
            r#"
            INSERT INTO credits (
                ledger_credit_id, student_address, teacher_address, course_name, score, status, tx_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            CREDIT_COLUMNS
        );

        let ledger_id = credit.stored_ledger_id()?;
        let record = sqlx::query_as::<_, CreditRecord>(&sql)
            .bind(ledger_id)
            .bind(&credit.student_address)
            .bind(&credit.teacher_address)
            .bind(&credit.course_name)
            .bind(credit.score)
            .bind(CreditStatus::Pending)
            .bind(&credit.tx_hash)
            .fetch_one(&self.pool)
            .await?;

        debug!(id = record.id, ledger_credit_id = credit.ledger_credit_id, "credit row inserted");
        Ok(record)
    }

    async fn get_credit(&self, id: i64) -> AppResult<Option<CreditRecord>> {
        let sql = format!("SELECT {} FROM credits WHERE id = $1", CREDIT_COLUMNS);
        let record = sqlx::query_as::<_, CreditRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn credits_by_student(&self, student_address: &str) -> AppResult<Vec<CreditRecord>> {
        self.fetch_where("WHERE student_address = $1", Some(student_address))
            .await
    }

    async fn credits_by_teacher(&self, teacher_address: &str) -> AppResult<Vec<CreditRecord>> {
        self.fetch_where("WHERE teacher_address = $1", Some(teacher_address))
            .await
    }

    async fn all_credits(&self) -> AppResult<Vec<CreditRecord>> {
        self.fetch_where("", None).await
    }

    async fn pending_credits(&self) -> AppResult<Vec<CreditRecord>> {
        self.fetch_where(
            "WHERE status = 'pending' AND ledger_credit_id > 0",
            None,
        )
        .await
    }

    async fn update_status(
        &self,
        id: i64,
        status: CreditStatus,
        audit_admin: &str,
    ) -> AppResult<CreditRecord> {
        let sql = format!(
            r#"
            UPDATE credits
            SET status = $2, audit_admin = $3, audit_time = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            CREDIT_COLUMNS
        );

        let updated = sqlx::query_as::<_, CreditRecord>(&sql)
            .bind(id)
            .bind(status)
            .bind(audit_admin)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(record) => Ok(record),
            None => match self.get_credit(id).await? {
                Some(current) => Err(CreditError::AlreadyProcessed {
                    id,
                    status: current.status,
                }
                .into()),
                None => Err(CreditError::NotFound(id).into()),
            },
        }
    }

    // ========== USER OPERATIONS ==========

    async fn get_user_by_address(&self, address: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, address, role, created_at, updated_at
            FROM users
            WHERE LOWER(TRIM(address)) = LOWER(TRIM($1))
            ORDER BY CASE role::text WHEN 'admin' THEN 1 WHEN 'teacher' THEN 2 ELSE 3 END
            LIMIT 1
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create_wallet_user(&self, address: &str, role: Role) -> AppResult<(User, bool)> {
        let username = wallet_username(address);

        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, address, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (username) DO NOTHING
            RETURNING id, username, address, role, created_at, updated_at
            "#,
        )
        .bind(&username)
        .bind(address)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(user) = inserted {
            return Ok((user, true));
        }

        let existing = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, address, role, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(&username)
        .fetch_one(&self.pool)
        .await?;

        debug!(username = %existing.username, "wallet user already created by a concurrent login");
        Ok((existing, false))
    }
}
