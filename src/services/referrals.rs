use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::audit::{self, AuditEntry, AuditRequest};
use super::ledger::{self, LedgerRequest};
use super::{RequestHandler, Service, ServiceError};
use crate::repositories::notifier::Notifier;

pub enum ReferralRequest {
    /// Fired after a successful free-trial consumption. Safe to deliver more
    /// than once: the per-user bonus gate in the ledger admits one claim.
    MaybeAwardBonus { referred_user_id: i64 },
}

#[derive(Clone)]
pub struct ReferralRequestHandler {
    ledger_channel: mpsc::Sender<LedgerRequest>,
    notifier: Arc<dyn Notifier>,
    bonus_credits: i32,
    audit_channel: mpsc::Sender<AuditRequest>,
}

impl ReferralRequestHandler {
    pub fn new(
        ledger_channel: mpsc::Sender<LedgerRequest>,
        notifier: Arc<dyn Notifier>,
        bonus_credits: i32,
        audit_channel: mpsc::Sender<AuditRequest>,
    ) -> Self {
        ReferralRequestHandler {
            ledger_channel,
            notifier,
            bonus_credits,
            audit_channel,
        }
    }

    async fn maybe_award_bonus(&self, referred_user_id: i64) -> Result<(), ServiceError> {
        let (claim_tx, claim_rx) = oneshot::channel();

        self.ledger_channel
            .send(LedgerRequest::ClaimReferralBonus {
                user_id: referred_user_id,
                response: claim_tx,
            })
            .await
            .map_err(|e| ServiceError::Communication("Referral".to_string(), e.to_string()))?;

        let referrer_id = claim_rx
            .await
            .map_err(|e| ServiceError::Communication("Referral".to_string(), e.to_string()))??;

        let Some(referrer_id) = referrer_id else {
            // No referrer, or the bonus was already claimed.
            log::debug!("No referral bonus due for user {}", referred_user_id);
            return Ok(());
        };

        let credited =
            ledger::credit_via_channel(&self.ledger_channel, referrer_id, self.bonus_credits)
                .await;

        let new_balance = match credited {
            Ok(balance) => balance,
            Err(e) => {
                // The gate is already claimed and will not reopen; leave a
                // repair trail for operators.
                audit::record(
                    &self.audit_channel,
                    AuditEntry::error(format!(
                        "Referral bonus of {} credit(s) for inviting user {} claimed but not credited: {}",
                        self.bonus_credits, referred_user_id, e
                    ))
                    .user(referrer_id)
                    .context("referrals"),
                );
                return Err(e);
            }
        };

        audit::record(
            &self.audit_channel,
            AuditEntry::info(format!(
                "Referral bonus of {} credit(s) for inviting user {}, balance {}",
                self.bonus_credits, referred_user_id, new_balance
            ))
            .user(referrer_id)
            .context("referrals"),
        );

        let notifier = self.notifier.clone();
        let bonus = self.bonus_credits;
        tokio::spawn(async move {
            let text = format!(
                "Your friend just used their first free reading. You earned {} bonus credit(s)!",
                bonus
            );
            if let Err(e) = notifier.notify(referrer_id, &text).await {
                log::warn!("Could not notify referrer {}: {}", referrer_id, e);
            }
        });

        Ok(())
    }
}

#[async_trait]
impl RequestHandler<ReferralRequest> for ReferralRequestHandler {
    async fn handle_request(&self, request: ReferralRequest) {
        match request {
            ReferralRequest::MaybeAwardBonus { referred_user_id } => {
                if let Err(e) = self.maybe_award_bonus(referred_user_id).await {
                    log::error!(
                        "Referral bonus processing failed for user {}: {}",
                        referred_user_id,
                        e
                    );
                }
            }
        }
    }
}

pub struct ReferralService;

impl ReferralService {
    pub fn new() -> Self {
        ReferralService {}
    }
}

#[async_trait]
impl Service<ReferralRequest, ReferralRequestHandler> for ReferralService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::notifier::NoopNotifier;

    #[tokio::test]
    async fn credit_failure_after_claim_leaves_a_repair_trail() {
        let (ledger_tx, mut ledger_rx) = mpsc::channel(8);
        let (audit_tx, mut audit_rx) = mpsc::channel(8);

        // Ledger that admits the claim, then fails the credit.
        tokio::spawn(async move {
            while let Some(request) = ledger_rx.recv().await {
                match request {
                    LedgerRequest::ClaimReferralBonus { response, .. } => {
                        let _ = response.send(Ok(Some(10)));
                    }
                    LedgerRequest::CreditUser { response, .. } => {
                        let _ = response
                            .send(Err(ServiceError::Database("connection reset".to_string())));
                    }
                    _ => {}
                }
            }
        });

        let handler =
            ReferralRequestHandler::new(ledger_tx, Arc::new(NoopNotifier), 1, audit_tx);
        let result = handler.maybe_award_bonus(11).await;
        assert!(result.is_err());

        let AuditRequest::Record { entry } = audit_rx.recv().await.unwrap();
        assert_eq!(entry.level, "ERROR");
        assert_eq!(entry.user_id, Some(10));
        assert!(entry.message.contains("claimed but not credited"));
    }
}
