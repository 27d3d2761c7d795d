use crate::models::payments::{Payment, PaymentStatus};

use anyhow::bail;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

pub mod yookassa;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
    #[error("Payment gateway rate limited")]
    RateLimited,
    #[error("Payment gateway rejected the request: {0}")]
    BadRequest(String),
    #[error("Payment gateway credentials rejected")]
    Unauthorized,
    #[error("Payment not found at gateway")]
    NotFound,
}

#[derive(Clone, Debug)]
pub struct CreatePayment {
    pub amount_in_minor_units: i32,
    pub currency: String,
    pub description: String,
    pub user_id: i64,
    pub credits: i32,
    pub option_key: String,
}

/// A payment as the gateway reports it.
#[derive(Clone, Debug)]
pub struct GatewayPayment {
    pub id: String,
    pub status: String,
    pub confirmation_url: Option<String>,
}

/// Outbound contract with the payment gateway. Creation must use a fresh
/// idempotency key per attempt so the gateway can deduplicate retries.
#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    async fn create_payment(&self, request: &CreatePayment) -> Result<GatewayPayment, GatewayError>;

    async fn find_payment(&self, gateway_payment_id: &str) -> Result<GatewayPayment, GatewayError>;
}

#[derive(Clone, Debug)]
pub struct NewPayment {
    pub user_id: i64,
    pub gateway_payment_id: String,
    pub amount_in_minor_units: i32,
    pub currency: String,
    pub credits_purchased: i32,
    pub description: Option<String>,
}

/// Durable record of purchase attempts. `status` and `credits_awarded` are
/// mutated only through this store, and `credits_awarded` only via the
/// conditional [`PaymentStore::mark_credits_awarded`].
#[async_trait]
pub trait PaymentStore: Send + Sync + 'static {
    async fn insert_pending(&self, new: NewPayment) -> Result<Payment, anyhow::Error>;

    async fn get_by_gateway_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Payment>, anyhow::Error>;

    async fn update_status(
        &self,
        gateway_payment_id: &str,
        status: PaymentStatus,
    ) -> Result<(), anyhow::Error>;

    /// Flips `credits_awarded` false -> true, only while the payment is
    /// succeeded. Returns whether this call performed the flip.
    async fn mark_credits_awarded(&self, gateway_payment_id: &str) -> Result<bool, anyhow::Error>;

    /// Non-terminal payments created before the cutoff, for the periodic
    /// reconciliation sweep.
    async fn list_unsettled_before(
        &self,
        cutoff: chrono::NaiveDateTime,
    ) -> Result<Vec<Payment>, anyhow::Error>;
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: String,
    user_id: i64,
    gateway_payment_id: String,
    amount_in_minor_units: i32,
    currency: String,
    credits_purchased: i32,
    status: String,
    credits_awarded: bool,
    description: Option<String>,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Payment {
            id: row.id,
            user_id: row.user_id,
            gateway_payment_id: row.gateway_payment_id,
            amount_in_minor_units: row.amount_in_minor_units,
            currency: row.currency,
            credits_purchased: row.credits_purchased,
            status: PaymentStatus::from_gateway(&row.status),
            credits_awarded: row.credits_awarded,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PgPaymentStore {
    conn: PgPool,
}

impl PgPaymentStore {
    pub fn new(conn: PgPool) -> Self {
        PgPaymentStore { conn }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert_pending(&self, new: NewPayment) -> Result<Payment, anyhow::Error> {
        let payment_id = Uuid::new_v4().hyphenated().to_string();

        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            INSERT INTO payments
            (id, user_id, gateway_payment_id, amount_in_minor_units, currency,
             credits_purchased, status, description)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7)
            RETURNING *
            "#,
        )
        .bind(&payment_id)
        .bind(new.user_id)
        .bind(&new.gateway_payment_id)
        .bind(new.amount_in_minor_units)
        .bind(&new.currency)
        .bind(new.credits_purchased)
        .bind(&new.description)
        .fetch_one(&self.conn)
        .await?;

        Ok(row.into())
    }

    async fn get_by_gateway_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Payment>, anyhow::Error> {
        let row = sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE gateway_payment_id = $1",
        )
        .bind(gateway_payment_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn update_status(
        &self,
        gateway_payment_id: &str,
        status: PaymentStatus,
    ) -> Result<(), anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $1, updated_at = CURRENT_TIMESTAMP
            WHERE gateway_payment_id = $2
            "#,
        )
        .bind(status.as_str())
        .bind(gateway_payment_id)
        .execute(&self.conn)
        .await?;

        if result.rows_affected() == 0 {
            bail!("Payment not found: {}", gateway_payment_id)
        }

        Ok(())
    }

    async fn mark_credits_awarded(&self, gateway_payment_id: &str) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET credits_awarded = TRUE, updated_at = CURRENT_TIMESTAMP
            WHERE gateway_payment_id = $1
              AND credits_awarded = FALSE
              AND status = 'succeeded'
            "#,
        )
        .bind(gateway_payment_id)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_unsettled_before(
        &self,
        cutoff: chrono::NaiveDateTime,
    ) -> Result<Vec<Payment>, anyhow::Error> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT * FROM payments
            WHERE status IN ('pending', 'waiting_for_capture') AND created_at < $1
            ORDER BY created_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.conn)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
