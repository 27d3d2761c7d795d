use crate::models::users::{Contact, User};

use anyhow::bail;
use async_trait::async_trait;
use sqlx::PgPool;

/// Outcome of attempting to assign a referral code to a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodeAssignment {
    Assigned(String),
    AlreadySet(String),
    /// Another user already owns this code; the caller should retry with a
    /// fresh one.
    Taken,
}

/// Durable record of users, their credit balance and trial usage. Every
/// balance mutation is a single conditional statement so that logically
/// concurrent requests cannot interleave a read-then-write pair.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Create-on-first-contact. An existing row only has its profile fields
    /// refreshed; `referred_by` is resolved from the contact's referral code
    /// at creation and never afterwards.
    async fn ensure_user(&self, user_id: i64, contact: &Contact) -> Result<User, anyhow::Error>;

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, anyhow::Error>;

    /// Decrements `credits` by `cost` only if the current balance covers it.
    /// Returns the new balance, or `None` when the condition failed at
    /// commit time.
    async fn charge_credits(&self, user_id: i64, cost: i32)
        -> Result<Option<i32>, anyhow::Error>;

    /// Unconditional addition. Returns the new balance.
    async fn credit_user(&self, user_id: i64, amount: i32) -> Result<i32, anyhow::Error>;

    /// Flips `first_service_used` false -> true. Returns whether this call
    /// performed the flip; concurrent duplicates observe `false`.
    async fn consume_free_trial(&self, user_id: i64) -> Result<bool, anyhow::Error>;

    async fn accept_terms(&self, user_id: i64) -> Result<(), anyhow::Error>;

    async fn set_referral_code(
        &self,
        user_id: i64,
        code: &str,
    ) -> Result<CodeAssignment, anyhow::Error>;

    async fn find_referrer_by_code(&self, code: &str) -> Result<Option<i64>, anyhow::Error>;

    /// Back-references are derived, never stored: counts users whose
    /// `referred_by` equals this id.
    async fn invited_count(&self, user_id: i64) -> Result<i64, anyhow::Error>;

    /// Atomically claims the one-time referral bonus gate for a referred
    /// user. Returns the referrer id exactly once; later calls get `None`.
    async fn claim_referral_bonus(&self, user_id: i64) -> Result<Option<i64>, anyhow::Error>;
}

#[derive(Clone)]
pub struct PgLedgerStore {
    conn: PgPool,
}

impl PgLedgerStore {
    pub fn new(conn: PgPool) -> Self {
        PgLedgerStore { conn }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn ensure_user(&self, user_id: i64, contact: &Contact) -> Result<User, anyhow::Error> {
        let referred_by = match &contact.referral_code {
            Some(code) => self
                .find_referrer_by_code(code)
                .await?
                .filter(|referrer| *referrer != user_id),
            None => None,
        };

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, first_name, referred_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET username = EXCLUDED.username,
                first_name = EXCLUDED.first_name,
                updated_at = CURRENT_TIMESTAMP
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&contact.username)
        .bind(&contact.first_name)
        .bind(referred_by)
        .fetch_one(&self.conn)
        .await?;

        Ok(user)
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(user)
    }

    async fn charge_credits(
        &self,
        user_id: i64,
        cost: i32,
    ) -> Result<Option<i32>, anyhow::Error> {
        let balance: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET credits = credits - $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND credits >= $2
            RETURNING credits
            "#,
        )
        .bind(user_id)
        .bind(cost)
        .fetch_optional(&self.conn)
        .await?;

        Ok(balance)
    }

    async fn credit_user(&self, user_id: i64, amount: i32) -> Result<i32, anyhow::Error> {
        let balance: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET credits = credits + $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING credits
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.conn)
        .await?;

        match balance {
            Some(balance) => Ok(balance),
            None => bail!("User not found: {}", user_id),
        }
    }

    async fn consume_free_trial(&self, user_id: i64) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET first_service_used = TRUE, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND first_service_used = FALSE
            "#,
        )
        .bind(user_id)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn accept_terms(&self, user_id: i64) -> Result<(), anyhow::Error> {
        let result = sqlx::query(
            "UPDATE users SET accepted_terms = TRUE, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 0 {
            bail!("User not found: {}", user_id)
        }

        Ok(())
    }

    async fn set_referral_code(
        &self,
        user_id: i64,
        code: &str,
    ) -> Result<CodeAssignment, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET referral_code = $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND referral_code IS NULL
            "#,
        )
        .bind(user_id)
        .bind(code)
        .execute(&self.conn)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(CodeAssignment::Assigned(code.to_string())),
            Ok(_) => {
                let existing: Option<Option<String>> =
                    sqlx::query_scalar("SELECT referral_code FROM users WHERE id = $1")
                        .bind(user_id)
                        .fetch_optional(&self.conn)
                        .await?;

                match existing {
                    Some(Some(code)) => Ok(CodeAssignment::AlreadySet(code)),
                    Some(None) => bail!("Referral code assignment raced for user {}", user_id),
                    None => bail!("User not found: {}", user_id),
                }
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(CodeAssignment::Taken),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_referrer_by_code(&self, code: &str) -> Result<Option<i64>, anyhow::Error> {
        let referrer: Option<i64> =
            sqlx::query_scalar("SELECT id FROM users WHERE referral_code = $1")
                .bind(code)
                .fetch_optional(&self.conn)
                .await?;

        Ok(referrer)
    }

    async fn invited_count(&self, user_id: i64) -> Result<i64, anyhow::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE referred_by = $1")
            .bind(user_id)
            .fetch_one(&self.conn)
            .await?;

        Ok(count)
    }

    async fn claim_referral_bonus(&self, user_id: i64) -> Result<Option<i64>, anyhow::Error> {
        let referrer: Option<Option<i64>> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET referral_bonus_awarded = TRUE, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND referral_bonus_awarded = FALSE AND referred_by IS NOT NULL
            RETURNING referred_by
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(referrer.flatten())
    }
}
