#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use astro_dealer::models::entitlement::{Availability, ChargeOutcome};
use astro_dealer::models::payments::{
    Checkout, GatewayNotification, NotificationObject, PaymentStatus,
};
use astro_dealer::models::users::Contact;
use astro_dealer::repositories::memory::{MemoryLedgerStore, MemoryPaymentStore};
use astro_dealer::repositories::notifier::NoopNotifier;
use astro_dealer::repositories::payments::{
    CreatePayment, GatewayError, GatewayPayment, PaymentGateway,
};
use astro_dealer::services::entitlement::ServicePolicy;
use astro_dealer::services::ledger::{LedgerRequest, LedgerRequestHandler, LedgerService};
use astro_dealer::services::payments::{
    PaymentRequestHandler, PaymentService, PaymentServiceRequest,
};
use astro_dealer::services::referrals::{ReferralRequest, ReferralRequestHandler, ReferralService};
use astro_dealer::services::{Service, ServiceError};

/// Scripted stand-in for the payment gateway.
pub struct MockGateway {
    statuses: DashMap<String, String>,
    fail_create: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        MockGateway {
            statuses: DashMap::new(),
            fail_create: AtomicBool::new(false),
        }
    }

    pub fn set_status(&self, gateway_payment_id: &str, status: &str) {
        self.statuses
            .insert(gateway_payment_id.to_string(), status.to_string());
    }

    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn forget(&self, gateway_payment_id: &str) {
        self.statuses.remove(gateway_payment_id);
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment(
        &self,
        _request: &CreatePayment,
    ) -> Result<GatewayPayment, GatewayError> {
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("scripted outage".to_string()));
        }

        let id = Uuid::new_v4().hyphenated().to_string();
        self.statuses.insert(id.clone(), "pending".to_string());

        Ok(GatewayPayment {
            id: id.clone(),
            status: "pending".to_string(),
            confirmation_url: Some(format!("https://pay.test/{}", id)),
        })
    }

    async fn find_payment(&self, gateway_payment_id: &str) -> Result<GatewayPayment, GatewayError> {
        match self.statuses.get(gateway_payment_id) {
            Some(status) => Ok(GatewayPayment {
                id: gateway_payment_id.to_string(),
                status: status.value().clone(),
                confirmation_url: None,
            }),
            None => Err(GatewayError::NotFound),
        }
    }
}

/// The full service mesh over in-memory stores, wired the same way as the
/// production composition root.
pub struct TestApp {
    pub ledger_tx: mpsc::Sender<LedgerRequest>,
    pub payment_tx: mpsc::Sender<PaymentServiceRequest>,
    pub referral_tx: mpsc::Sender<ReferralRequest>,
    pub ledger_store: MemoryLedgerStore,
    pub payment_store: MemoryPaymentStore,
    pub gateway: Arc<MockGateway>,
}

pub async fn spawn_app() -> TestApp {
    let (ledger_tx, mut ledger_rx) = mpsc::channel(512);
    let (payment_tx, mut payment_rx) = mpsc::channel(512);
    let (referral_tx, mut referral_rx) = mpsc::channel(512);
    let (audit_tx, mut audit_rx) = mpsc::channel(1024);

    // Audit entries are irrelevant here; drain them.
    tokio::spawn(async move { while audit_rx.recv().await.is_some() {} });

    let ledger_store = MemoryLedgerStore::new();
    let payment_store = MemoryPaymentStore::new();
    let gateway = Arc::new(MockGateway::new());
    let notifier = Arc::new(NoopNotifier);
    let policy = ServicePolicy {
        service_cost: 1,
        first_service_free: true,
    };

    let mut ledger_service = LedgerService::new();
    let ledger_handler = LedgerRequestHandler::new(
        ledger_store.clone(),
        policy,
        referral_tx.clone(),
        audit_tx.clone(),
    );
    tokio::spawn(async move {
        ledger_service.run(ledger_handler, &mut ledger_rx).await;
    });

    let mut referral_service = ReferralService::new();
    let referral_handler =
        ReferralRequestHandler::new(ledger_tx.clone(), notifier.clone(), 1, audit_tx.clone());
    tokio::spawn(async move {
        referral_service.run(referral_handler, &mut referral_rx).await;
    });

    let mut payment_service = PaymentService::new();
    let payment_handler = PaymentRequestHandler::new(
        payment_store.clone(),
        gateway.clone(),
        ledger_tx.clone(),
        notifier,
        audit_tx,
        0,
    );
    tokio::spawn(async move {
        payment_service.run(payment_handler, &mut payment_rx).await;
    });

    TestApp {
        ledger_tx,
        payment_tx,
        referral_tx,
        ledger_store,
        payment_store,
        gateway,
    }
}

impl TestApp {
    pub async fn register(&self, user_id: i64, referral_code: Option<&str>) {
        let (tx, rx) = oneshot::channel();
        self.ledger_tx
            .send(LedgerRequest::EnsureUser {
                user_id,
                contact: Contact {
                    username: Some(format!("user{}", user_id)),
                    first_name: None,
                    referral_code: referral_code.map(str::to_string),
                },
                response: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();
    }

    pub async fn availability(&self, user_id: i64) -> Availability {
        let (tx, rx) = oneshot::channel();
        self.ledger_tx
            .send(LedgerRequest::CheckAvailability {
                user_id,
                response: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap()
    }

    pub async fn commit_charge(
        &self,
        user_id: i64,
        uses_free_trial: bool,
    ) -> Result<ChargeOutcome, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.ledger_tx
            .send(LedgerRequest::CommitCharge {
                user_id,
                uses_free_trial,
                response: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    pub async fn credit(&self, user_id: i64, credits: i32) -> i32 {
        let (tx, rx) = oneshot::channel();
        self.ledger_tx
            .send(LedgerRequest::CreditUser {
                user_id,
                credits,
                response: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap()
    }

    pub async fn referral_code(&self, user_id: i64) -> String {
        let (tx, rx) = oneshot::channel();
        self.ledger_tx
            .send(LedgerRequest::ReferralStats {
                user_id,
                response: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap().referral_code
    }

    pub async fn purchase(
        &self,
        user_id: i64,
        option_key: &str,
        amount: i32,
        credits: i32,
    ) -> Result<Checkout, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.payment_tx
            .send(PaymentServiceRequest::StartPurchase {
                user_id,
                amount_in_minor_units: amount,
                credits,
                option_key: option_key.to_string(),
                response: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    /// Delivers a webhook notification and returns the acknowledgement.
    pub async fn notify(&self, gateway_payment_id: &str, status: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        self.payment_tx
            .send(PaymentServiceRequest::GatewayNotification {
                payload: GatewayNotification {
                    event: format!("payment.{}", status),
                    object: NotificationObject {
                        id: gateway_payment_id.to_string(),
                        status: status.to_string(),
                        object_type: "payment".to_string(),
                    },
                },
                response: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    pub async fn lookup(&self, gateway_payment_id: &str) -> Result<PaymentStatus, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.payment_tx
            .send(PaymentServiceRequest::LookupStatus {
                gateway_payment_id: gateway_payment_id.to_string(),
                response: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    pub async fn balance(&self, user_id: i64) -> i32 {
        use astro_dealer::repositories::ledger::LedgerStore;
        self.ledger_store
            .get_user(user_id)
            .await
            .unwrap()
            .map(|u| u.credits)
            .unwrap_or(0)
    }

    /// Polls until the balance reaches `expected` or a short deadline passes;
    /// covers the fire-and-forget award paths.
    pub async fn wait_for_balance(&self, user_id: i64, expected: i32) -> bool {
        for _ in 0..100 {
            if self.balance(user_id).await == expected {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }
}
