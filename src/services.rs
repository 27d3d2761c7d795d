use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::repositories::audit::AuditRepository;
use crate::repositories::ledger::PgLedgerStore;
use crate::repositories::notifier::TelegramNotifier;
use crate::repositories::payments::yookassa::YookassaApi;
use crate::repositories::payments::PgPaymentStore;
use crate::settings::Settings;

pub mod audit;
pub mod entitlement;
pub mod http;
pub mod ledger;
pub mod payments;
pub mod referrals;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Repository error: {0}: {1}")]
    Repository(String, String),
    #[error("Communication error: {0}: {1}")]
    Communication(String, String),
    #[error("External service error: {0} -> {1} => {2}")]
    ExternalService(String, String, String),
    #[error("Not enough credits: balance {balance}, required {required}")]
    InsufficientBalance { balance: i32, required: i32 },
    #[error("Bad request: {0}")]
    BadRequest(String),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

pub async fn start_services(pool: PgPool, settings: Settings) -> Result<(), anyhow::Error> {
    let (ledger_tx, mut ledger_rx) = mpsc::channel(512);
    let (payment_tx, mut payment_rx) = mpsc::channel(512);
    let (referral_tx, mut referral_rx) = mpsc::channel(512);
    let (audit_tx, mut audit_rx) = mpsc::channel(1024);

    let mut ledger_service = ledger::LedgerService::new();
    let mut payment_service = payments::PaymentService::new();
    let mut referral_service = referrals::ReferralService::new();
    let mut audit_service = audit::AuditService::new();

    let notifier = Arc::new(TelegramNotifier::new(
        settings.telegram.api_url.clone(),
        settings.telegram.bot_token.clone(),
    ));

    log::info!("Starting audit service.");
    let audit_pool = pool.clone();
    tokio::spawn(async move {
        audit_service
            .run(
                audit::AuditRequestHandler::new(AuditRepository::new(audit_pool)),
                &mut audit_rx,
            )
            .await;
    });

    log::info!("Starting ledger service.");
    let ledger_pool = pool.clone();
    let ledger_referral_tx = referral_tx.clone();
    let ledger_audit_tx = audit_tx.clone();
    let policy = entitlement::ServicePolicy::from(&settings.credits);
    tokio::spawn(async move {
        ledger_service
            .run(
                ledger::LedgerRequestHandler::new(
                    PgLedgerStore::new(ledger_pool),
                    policy,
                    ledger_referral_tx,
                    ledger_audit_tx,
                ),
                &mut ledger_rx,
            )
            .await;
    });

    log::info!("Starting referral service.");
    let referral_ledger_tx = ledger_tx.clone();
    let referral_audit_tx = audit_tx.clone();
    let referral_notifier = notifier.clone();
    let referral_bonus = settings.credits.referral_bonus;
    tokio::spawn(async move {
        referral_service
            .run(
                referrals::ReferralRequestHandler::new(
                    referral_ledger_tx,
                    referral_notifier,
                    referral_bonus,
                    referral_audit_tx,
                ),
                &mut referral_rx,
            )
            .await;
    });

    log::info!("Starting payment service.");
    let payment_pool = pool.clone();
    let payment_ledger_tx = ledger_tx.clone();
    let payment_audit_tx = audit_tx.clone();
    let payment_notifier = notifier.clone();
    let sweep_min_age = settings.sweeper.min_age_secs;
    let gateway = Arc::new(YookassaApi::new(
        settings.yookassa.url.clone(),
        settings.yookassa.shop_id.clone(),
        settings.yookassa.secret_key.clone(),
        settings.yookassa.return_url.clone(),
    ));
    tokio::spawn(async move {
        payment_service
            .run(
                payments::PaymentRequestHandler::new(
                    PgPaymentStore::new(payment_pool),
                    gateway,
                    payment_ledger_tx,
                    payment_notifier,
                    payment_audit_tx,
                    sweep_min_age,
                ),
                &mut payment_rx,
            )
            .await;
    });

    // Periodic reconciliation sweep, owned here by the composition root.
    let sweep_tx = payment_tx.clone();
    let sweep_interval = settings.sweeper.interval_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(sweep_interval));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if sweep_tx
                .send(payments::PaymentServiceRequest::SweepPending)
                .await
                .is_err()
            {
                break;
            }
        }
    });

    log::info!("Starting HTTP server on {}.", settings.http.listen_addr);
    http::start_http_server(&settings.http.listen_addr, ledger_tx, payment_tx).await
}
