//! In-memory store implementations backed by dashmap. Used by the test
//! suite and for running the service without Postgres; conditional-update
//! semantics mirror the SQL stores exactly.

use crate::models::payments::{Payment, PaymentStatus};
use crate::models::users::{Contact, User};

use super::ledger::{CodeAssignment, LedgerStore};
use super::payments::{NewPayment, PaymentStore};

use anyhow::bail;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

fn now() -> chrono::NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    users: Arc<DashMap<i64, User>>,
    codes: Arc<DashMap<String, i64>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn ensure_user(&self, user_id: i64, contact: &Contact) -> Result<User, anyhow::Error> {
        let referred_by = match &contact.referral_code {
            Some(code) => self
                .codes
                .get(code)
                .map(|r| *r.value())
                .filter(|referrer| *referrer != user_id),
            None => None,
        };

        let mut entry = self.users.entry(user_id).or_insert_with(|| User {
            id: user_id,
            username: None,
            first_name: None,
            credits: 0,
            first_service_used: false,
            accepted_terms: false,
            referral_code: None,
            referred_by,
            referral_bonus_awarded: false,
            created_at: now(),
            updated_at: now(),
        });

        entry.username = contact.username.clone();
        entry.first_name = contact.first_name.clone();
        entry.updated_at = now();

        Ok(entry.clone())
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>, anyhow::Error> {
        Ok(self.users.get(&user_id).map(|u| u.value().clone()))
    }

    async fn charge_credits(
        &self,
        user_id: i64,
        cost: i32,
    ) -> Result<Option<i32>, anyhow::Error> {
        match self.users.get_mut(&user_id) {
            Some(mut user) if user.credits >= cost => {
                user.credits -= cost;
                user.updated_at = now();
                Ok(Some(user.credits))
            }
            _ => Ok(None),
        }
    }

    async fn credit_user(&self, user_id: i64, amount: i32) -> Result<i32, anyhow::Error> {
        match self.users.get_mut(&user_id) {
            Some(mut user) => {
                user.credits += amount;
                user.updated_at = now();
                Ok(user.credits)
            }
            None => bail!("User not found: {}", user_id),
        }
    }

    async fn consume_free_trial(&self, user_id: i64) -> Result<bool, anyhow::Error> {
        match self.users.get_mut(&user_id) {
            Some(mut user) if !user.first_service_used => {
                user.first_service_used = true;
                user.updated_at = now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn accept_terms(&self, user_id: i64) -> Result<(), anyhow::Error> {
        match self.users.get_mut(&user_id) {
            Some(mut user) => {
                user.accepted_terms = true;
                user.updated_at = now();
                Ok(())
            }
            None => bail!("User not found: {}", user_id),
        }
    }

    async fn set_referral_code(
        &self,
        user_id: i64,
        code: &str,
    ) -> Result<CodeAssignment, anyhow::Error> {
        {
            let Some(user) = self.users.get(&user_id) else {
                bail!("User not found: {}", user_id)
            };
            if let Some(existing) = &user.referral_code {
                return Ok(CodeAssignment::AlreadySet(existing.clone()));
            }
        }

        match self.codes.entry(code.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(CodeAssignment::Taken),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(user_id);
                if let Some(mut user) = self.users.get_mut(&user_id) {
                    user.referral_code = Some(code.to_string());
                    user.updated_at = now();
                }
                Ok(CodeAssignment::Assigned(code.to_string()))
            }
        }
    }

    async fn find_referrer_by_code(&self, code: &str) -> Result<Option<i64>, anyhow::Error> {
        Ok(self.codes.get(code).map(|r| *r.value()))
    }

    async fn invited_count(&self, user_id: i64) -> Result<i64, anyhow::Error> {
        let count = self
            .users
            .iter()
            .filter(|u| u.referred_by == Some(user_id))
            .count();

        Ok(count as i64)
    }

    async fn claim_referral_bonus(&self, user_id: i64) -> Result<Option<i64>, anyhow::Error> {
        match self.users.get_mut(&user_id) {
            Some(mut user) if !user.referral_bonus_awarded && user.referred_by.is_some() => {
                user.referral_bonus_awarded = true;
                user.updated_at = now();
                Ok(user.referred_by)
            }
            _ => Ok(None),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryPaymentStore {
    payments: Arc<DashMap<String, Payment>>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn insert_pending(&self, new: NewPayment) -> Result<Payment, anyhow::Error> {
        let payment = Payment {
            id: Uuid::new_v4().hyphenated().to_string(),
            user_id: new.user_id,
            gateway_payment_id: new.gateway_payment_id.clone(),
            amount_in_minor_units: new.amount_in_minor_units,
            currency: new.currency,
            credits_purchased: new.credits_purchased,
            status: PaymentStatus::Pending,
            credits_awarded: false,
            description: new.description,
            created_at: now(),
            updated_at: now(),
        };

        match self.payments.entry(new.gateway_payment_id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                bail!("Duplicate gateway payment id: {}", existing.key())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(payment.clone());
                Ok(payment)
            }
        }
    }

    async fn get_by_gateway_id(
        &self,
        gateway_payment_id: &str,
    ) -> Result<Option<Payment>, anyhow::Error> {
        Ok(self.payments.get(gateway_payment_id).map(|p| p.value().clone()))
    }

    async fn update_status(
        &self,
        gateway_payment_id: &str,
        status: PaymentStatus,
    ) -> Result<(), anyhow::Error> {
        match self.payments.get_mut(gateway_payment_id) {
            Some(mut payment) => {
                payment.status = status;
                payment.updated_at = now();
                Ok(())
            }
            None => bail!("Payment not found: {}", gateway_payment_id),
        }
    }

    async fn mark_credits_awarded(&self, gateway_payment_id: &str) -> Result<bool, anyhow::Error> {
        match self.payments.get_mut(gateway_payment_id) {
            Some(mut payment)
                if !payment.credits_awarded && payment.status == PaymentStatus::Succeeded =>
            {
                payment.credits_awarded = true;
                payment.updated_at = now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_unsettled_before(
        &self,
        cutoff: chrono::NaiveDateTime,
    ) -> Result<Vec<Payment>, anyhow::Error> {
        let mut unsettled: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| !p.status.is_terminal() && p.created_at < cutoff)
            .map(|p| p.value().clone())
            .collect();

        unsettled.sort_by_key(|p| p.created_at);
        Ok(unsettled)
    }
}
