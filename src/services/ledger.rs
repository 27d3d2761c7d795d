use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::audit::{self, AuditEntry, AuditRequest};
use super::entitlement::{self, ServicePolicy};
use super::referrals::ReferralRequest;
use super::{RequestHandler, Service, ServiceError};
use crate::models::entitlement::{Availability, ChargeOutcome};
use crate::models::users::{Contact, ReferralStats, User};
use crate::repositories::ledger::{CodeAssignment, LedgerStore};

const CODE_GENERATION_ATTEMPTS: u32 = 10;

pub enum LedgerRequest {
    EnsureUser {
        user_id: i64,
        contact: Contact,
        response: oneshot::Sender<Result<User, ServiceError>>,
    },
    CheckAvailability {
        user_id: i64,
        response: oneshot::Sender<Result<Availability, ServiceError>>,
    },
    CommitCharge {
        user_id: i64,
        uses_free_trial: bool,
        response: oneshot::Sender<Result<ChargeOutcome, ServiceError>>,
    },
    CreditUser {
        user_id: i64,
        credits: i32,
        response: oneshot::Sender<Result<i32, ServiceError>>,
    },
    AcceptTerms {
        user_id: i64,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    ReferralStats {
        user_id: i64,
        response: oneshot::Sender<Result<ReferralStats, ServiceError>>,
    },
    ClaimReferralBonus {
        user_id: i64,
        response: oneshot::Sender<Result<Option<i64>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct LedgerRequestHandler<S: LedgerStore + Clone> {
    store: S,
    policy: ServicePolicy,
    referral_channel: mpsc::Sender<ReferralRequest>,
    audit_channel: mpsc::Sender<AuditRequest>,
}

impl<S: LedgerStore + Clone> LedgerRequestHandler<S> {
    pub fn new(
        store: S,
        policy: ServicePolicy,
        referral_channel: mpsc::Sender<ReferralRequest>,
        audit_channel: mpsc::Sender<AuditRequest>,
    ) -> Self {
        LedgerRequestHandler {
            store,
            policy,
            referral_channel,
            audit_channel,
        }
    }

    async fn ensure_user(&self, user_id: i64, contact: &Contact) -> Result<User, ServiceError> {
        self.store
            .ensure_user(user_id, contact)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))
    }

    async fn check_availability(&self, user_id: i64) -> Result<Availability, ServiceError> {
        let user = self
            .store
            .get_user(user_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        match user {
            Some(user) => Ok(entitlement::evaluate(&user, &self.policy)),
            None => Ok(Availability {
                allowed: false,
                balance: 0,
                uses_free_trial: false,
                message: "Profile not found. Please start over.".to_string(),
            }),
        }
    }

    /// Commits the charge decided at evaluation time. Both paths re-validate
    /// atomically in the store; a stale verdict fails closed here rather than
    /// corrupting the ledger.
    async fn commit_charge(
        &self,
        user_id: i64,
        uses_free_trial: bool,
    ) -> Result<ChargeOutcome, ServiceError> {
        if uses_free_trial {
            let consumed = self
                .store
                .consume_free_trial(user_id)
                .await
                .map_err(|e| ServiceError::Database(e.to_string()))?;

            if !consumed {
                // Trial raced away since evaluation; the free verdict implies
                // the balance did not cover a paid charge.
                return Err(self.insufficient(user_id).await);
            }

            let balance = self.current_balance(user_id).await;
            audit::record(
                &self.audit_channel,
                AuditEntry::info("Free trial consumed")
                    .user(user_id)
                    .context("ledger"),
            );

            // The trial flip above is the at-most-once gate for the bonus;
            // the awarder itself re-checks its own idempotency flag.
            let referral_channel = self.referral_channel.clone();
            tokio::spawn(async move {
                let _ = referral_channel
                    .send(ReferralRequest::MaybeAwardBonus {
                        referred_user_id: user_id,
                    })
                    .await;
            });

            return Ok(ChargeOutcome {
                success: true,
                new_balance: balance,
                used_free_trial: true,
            });
        }

        let cost = self.policy.service_cost;
        let new_balance = self
            .store
            .charge_credits(user_id, cost)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        match new_balance {
            Some(new_balance) => {
                audit::record(
                    &self.audit_channel,
                    AuditEntry::info(format!(
                        "Charged {} credit(s), balance {}",
                        cost, new_balance
                    ))
                    .user(user_id)
                    .context("ledger"),
                );

                Ok(ChargeOutcome {
                    success: true,
                    new_balance,
                    used_free_trial: false,
                })
            }
            None => Err(self.insufficient(user_id).await),
        }
    }

    async fn credit_user(&self, user_id: i64, credits: i32) -> Result<i32, ServiceError> {
        let new_balance = self
            .store
            .credit_user(user_id, credits)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        Ok(new_balance)
    }

    async fn accept_terms(&self, user_id: i64) -> Result<(), ServiceError> {
        self.store
            .accept_terms(user_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))
    }

    async fn referral_stats(&self, user_id: i64) -> Result<ReferralStats, ServiceError> {
        let code = self.ensure_referral_code(user_id).await?;
        let invited_count = self
            .store
            .invited_count(user_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        Ok(ReferralStats {
            referral_code: code,
            invited_count,
        })
    }

    /// Lazily assigns a unique referral code, retrying on collisions.
    async fn ensure_referral_code(&self, user_id: i64) -> Result<String, ServiceError> {
        for _ in 0..CODE_GENERATION_ATTEMPTS {
            let candidate = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
            let assignment = self
                .store
                .set_referral_code(user_id, &candidate)
                .await
                .map_err(|e| ServiceError::Database(e.to_string()))?;

            match assignment {
                CodeAssignment::Assigned(code) | CodeAssignment::AlreadySet(code) => {
                    return Ok(code)
                }
                CodeAssignment::Taken => continue,
            }
        }

        Err(ServiceError::Internal(format!(
            "Could not generate a unique referral code for user {}",
            user_id
        )))
    }

    async fn claim_referral_bonus(&self, user_id: i64) -> Result<Option<i64>, ServiceError> {
        self.store
            .claim_referral_bonus(user_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))
    }

    async fn current_balance(&self, user_id: i64) -> i32 {
        match self.store.get_user(user_id).await {
            Ok(Some(user)) => user.credits,
            _ => 0,
        }
    }

    async fn insufficient(&self, user_id: i64) -> ServiceError {
        ServiceError::InsufficientBalance {
            balance: self.current_balance(user_id).await,
            required: self.policy.service_cost,
        }
    }
}

#[async_trait]
impl<S: LedgerStore + Clone> RequestHandler<LedgerRequest> for LedgerRequestHandler<S> {
    async fn handle_request(&self, request: LedgerRequest) {
        match request {
            LedgerRequest::EnsureUser {
                user_id,
                contact,
                response,
            } => {
                let result = self.ensure_user(user_id, &contact).await;
                let _ = response.send(result);
            }
            LedgerRequest::CheckAvailability { user_id, response } => {
                let result = self.check_availability(user_id).await;
                let _ = response.send(result);
            }
            LedgerRequest::CommitCharge {
                user_id,
                uses_free_trial,
                response,
            } => {
                let result = self.commit_charge(user_id, uses_free_trial).await;
                let _ = response.send(result);
            }
            LedgerRequest::CreditUser {
                user_id,
                credits,
                response,
            } => {
                let result = self.credit_user(user_id, credits).await;
                let _ = response.send(result);
            }
            LedgerRequest::AcceptTerms { user_id, response } => {
                let result = self.accept_terms(user_id).await;
                let _ = response.send(result);
            }
            LedgerRequest::ReferralStats { user_id, response } => {
                let result = self.referral_stats(user_id).await;
                let _ = response.send(result);
            }
            LedgerRequest::ClaimReferralBonus { user_id, response } => {
                let result = self.claim_referral_bonus(user_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct LedgerService;

impl LedgerService {
    pub fn new() -> Self {
        LedgerService {}
    }
}

#[async_trait]
impl<S: LedgerStore + Clone> Service<LedgerRequest, LedgerRequestHandler<S>> for LedgerService {}

/// Convenience wrapper used by collaborating services to add credits through
/// the ledger channel.
pub async fn credit_via_channel(
    channel: &mpsc::Sender<LedgerRequest>,
    user_id: i64,
    credits: i32,
) -> Result<i32, ServiceError> {
    let (tx, rx) = oneshot::channel();

    channel
        .send(LedgerRequest::CreditUser {
            user_id,
            credits,
            response: tx,
        })
        .await
        .map_err(|e| ServiceError::Communication("Ledger".to_string(), e.to_string()))?;

    rx.await
        .map_err(|e| ServiceError::Communication("Ledger".to_string(), e.to_string()))?
}
