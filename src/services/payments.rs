use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::audit::{self, AuditEntry, AuditRequest};
use super::ledger::{self, LedgerRequest};
use super::{RequestHandler, Service, ServiceError};
use crate::models::payments::{Checkout, GatewayNotification, PaymentOption, PaymentStatus};
use crate::repositories::notifier::Notifier;
use crate::repositories::payments::{
    CreatePayment, GatewayError, NewPayment, PaymentGateway, PaymentStore,
};

pub enum PaymentServiceRequest {
    StartPurchase {
        user_id: i64,
        amount_in_minor_units: i32,
        credits: i32,
        option_key: String,
        response: oneshot::Sender<Result<Checkout, ServiceError>>,
    },
    /// Inbound webhook push. The boolean acknowledgement decides whether the
    /// gateway should retry delivery.
    GatewayNotification {
        payload: GatewayNotification,
        response: oneshot::Sender<bool>,
    },
    /// Pull-based verification; shares the reconciliation path with webhook
    /// delivery.
    LookupStatus {
        gateway_payment_id: String,
        response: oneshot::Sender<Result<PaymentStatus, ServiceError>>,
    },
    SweepPending,
}

pub struct PaymentRequestHandler<P: PaymentStore + Clone, G: PaymentGateway> {
    store: P,
    gateway: Arc<G>,
    ledger_channel: mpsc::Sender<LedgerRequest>,
    notifier: Arc<dyn Notifier>,
    audit_channel: mpsc::Sender<AuditRequest>,
    sweep_min_age_secs: i64,
}

impl<P: PaymentStore + Clone, G: PaymentGateway> Clone for PaymentRequestHandler<P, G> {
    fn clone(&self) -> Self {
        PaymentRequestHandler {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            ledger_channel: self.ledger_channel.clone(),
            notifier: self.notifier.clone(),
            audit_channel: self.audit_channel.clone(),
            sweep_min_age_secs: self.sweep_min_age_secs,
        }
    }
}

impl<P: PaymentStore + Clone, G: PaymentGateway> PaymentRequestHandler<P, G> {
    pub fn new(
        store: P,
        gateway: Arc<G>,
        ledger_channel: mpsc::Sender<LedgerRequest>,
        notifier: Arc<dyn Notifier>,
        audit_channel: mpsc::Sender<AuditRequest>,
        sweep_min_age_secs: i64,
    ) -> Self {
        PaymentRequestHandler {
            store,
            gateway,
            ledger_channel,
            notifier,
            audit_channel,
            sweep_min_age_secs,
        }
    }

    async fn start_purchase(
        &self,
        user_id: i64,
        amount_in_minor_units: i32,
        credits: i32,
        option_key: &str,
    ) -> Result<Checkout, ServiceError> {
        let option = PaymentOption::by_key(option_key)
            .ok_or_else(|| ServiceError::BadRequest(format!("Unknown option: {}", option_key)))?;

        if option.amount_in_minor_units != amount_in_minor_units || option.credits != credits {
            return Err(ServiceError::BadRequest(format!(
                "Price mismatch for option {}",
                option_key
            )));
        }

        let request = CreatePayment {
            amount_in_minor_units,
            currency: "RUB".to_string(),
            description: format!("{} credit(s), {}", credits, option.description),
            user_id,
            credits,
            option_key: option_key.to_string(),
        };

        let gateway_payment = self
            .gateway
            .create_payment(&request)
            .await
            .map_err(map_gateway_error)?;

        let redirect_url = gateway_payment.confirmation_url.clone().ok_or_else(|| {
            ServiceError::ExternalService(
                "Payments".to_string(),
                "Gateway".to_string(),
                format!("No confirmation URL for payment {}", gateway_payment.id),
            )
        })?;

        // The row must exist before the user ever sees the link; a payment we
        // cannot reconcile later must not be handed out.
        let payment = self
            .store
            .insert_pending(NewPayment {
                user_id,
                gateway_payment_id: gateway_payment.id.clone(),
                amount_in_minor_units,
                currency: request.currency.clone(),
                credits_purchased: credits,
                description: Some(request.description.clone()),
            })
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        audit::record(
            &self.audit_channel,
            AuditEntry::info(format!(
                "Payment {} opened for {} credit(s)",
                gateway_payment.id, credits
            ))
            .user(user_id)
            .context("payments"),
        );

        Ok(Checkout {
            payment_id: payment.id,
            gateway_payment_id: gateway_payment.id,
            redirect_url,
        })
    }

    /// Aligns the local record with a gateway-reported status and awards
    /// purchased credits at most once. Returns `None` when the payment is
    /// unknown locally, which callers acknowledge without retrying.
    async fn reconcile(
        &self,
        gateway_payment_id: &str,
        reported_status: &str,
    ) -> Result<Option<PaymentStatus>, ServiceError> {
        let payment = self
            .store
            .get_by_gateway_id(gateway_payment_id)
            .await
            .map_err(|e| ServiceError::Database(e.to_string()))?;

        let Some(payment) = payment else {
            // Possibly a different deployment's payment; nothing to reconcile
            // against, and failing would make the gateway retry forever.
            log::warn!("Notification for unknown payment {}", gateway_payment_id);
            return Ok(None);
        };

        let mapped = PaymentStatus::from_gateway(reported_status);
        // The pre-call flag decides the award; status alone may already have
        // been advanced by an out-of-order delivery before crediting ran.
        let already_awarded = payment.credits_awarded;

        if mapped != payment.status {
            self.store
                .update_status(gateway_payment_id, mapped)
                .await
                .map_err(|e| ServiceError::Database(e.to_string()))?;
            log::info!("Payment {} -> {}", gateway_payment_id, mapped.as_str());
        }

        if mapped == PaymentStatus::Succeeded && !already_awarded {
            let new_balance = ledger::credit_via_channel(
                &self.ledger_channel,
                payment.user_id,
                payment.credits_purchased,
            )
            .await?;

            let marked = self
                .store
                .mark_credits_awarded(gateway_payment_id)
                .await
                .map_err(|e| ServiceError::Database(e.to_string()))?;
            if !marked {
                log::warn!(
                    "Payment {} credited but award flag was already set",
                    gateway_payment_id
                );
            }

            audit::record(
                &self.audit_channel,
                AuditEntry::info(format!(
                    "Awarded {} credit(s) for payment {}, balance {}",
                    payment.credits_purchased, gateway_payment_id, new_balance
                ))
                .user(payment.user_id)
                .context("payments"),
            );

            let notifier = self.notifier.clone();
            let user_id = payment.user_id;
            let credits = payment.credits_purchased;
            tokio::spawn(async move {
                let text = format!(
                    "Thanks for your purchase! {} credit(s) have been added to your balance.",
                    credits
                );
                if let Err(e) = notifier.notify(user_id, &text).await {
                    log::warn!("Could not notify user {} about payment: {}", user_id, e);
                }
            });
        } else if mapped == PaymentStatus::Succeeded {
            log::debug!("Payment {} already awarded", gateway_payment_id);
        } else if mapped == PaymentStatus::Canceled {
            log::info!("Payment {} canceled", gateway_payment_id);
        }

        Ok(Some(mapped))
    }

    async fn handle_notification(&self, payload: &GatewayNotification) -> bool {
        if payload.object.object_type != "payment" {
            log::warn!("Ignoring notification for object type {}", payload.object.object_type);
            return true;
        }

        log::info!(
            "Notification {} for payment {} ({})",
            payload.event,
            payload.object.id,
            payload.object.status
        );

        match self.reconcile(&payload.object.id, &payload.object.status).await {
            Ok(_) => true,
            Err(e) => {
                // Not acknowledged; the gateway is expected to retry.
                log::error!("Reconciliation failed for {}: {}", payload.object.id, e);
                false
            }
        }
    }

    async fn lookup_status(&self, gateway_payment_id: &str) -> Result<PaymentStatus, ServiceError> {
        match self.gateway.find_payment(gateway_payment_id).await {
            Ok(gateway_payment) => {
                let local = self
                    .reconcile(gateway_payment_id, &gateway_payment.status)
                    .await?;

                Ok(local.unwrap_or_else(|| PaymentStatus::from_gateway(&gateway_payment.status)))
            }
            Err(GatewayError::NotFound) => {
                // The gateway has no trace of it; close the local record.
                self.reconcile(gateway_payment_id, "canceled").await?;
                Ok(PaymentStatus::Canceled)
            }
            Err(e) => Err(map_gateway_error(e)),
        }
    }

    async fn sweep_pending(&self) {
        let cutoff =
            chrono::Utc::now().naive_utc() - chrono::Duration::seconds(self.sweep_min_age_secs);

        let unsettled = match self.store.list_unsettled_before(cutoff).await {
            Ok(unsettled) => unsettled,
            Err(e) => {
                log::error!("Sweep could not list pending payments: {}", e);
                return;
            }
        };

        if unsettled.is_empty() {
            return;
        }

        log::info!("Sweeping {} unsettled payment(s)", unsettled.len());
        for payment in unsettled {
            if let Err(e) = self.lookup_status(&payment.gateway_payment_id).await {
                log::warn!("Sweep lookup failed for {}: {}", payment.gateway_payment_id, e);
            }
        }
    }
}

fn map_gateway_error(error: GatewayError) -> ServiceError {
    match error {
        GatewayError::BadRequest(detail) => ServiceError::BadRequest(detail),
        other => ServiceError::ExternalService(
            "Payments".to_string(),
            "Gateway".to_string(),
            other.to_string(),
        ),
    }
}

#[async_trait]
impl<P, G> RequestHandler<PaymentServiceRequest> for PaymentRequestHandler<P, G>
where
    P: PaymentStore + Clone,
    G: PaymentGateway,
{
    async fn handle_request(&self, request: PaymentServiceRequest) {
        match request {
            PaymentServiceRequest::StartPurchase {
                user_id,
                amount_in_minor_units,
                credits,
                option_key,
                response,
            } => {
                let result = self
                    .start_purchase(user_id, amount_in_minor_units, credits, &option_key)
                    .await;
                let _ = response.send(result);
            }
            PaymentServiceRequest::GatewayNotification { payload, response } => {
                let acknowledged = self.handle_notification(&payload).await;
                let _ = response.send(acknowledged);
            }
            PaymentServiceRequest::LookupStatus {
                gateway_payment_id,
                response,
            } => {
                let result = self.lookup_status(&gateway_payment_id).await;
                let _ = response.send(result);
            }
            PaymentServiceRequest::SweepPending => {
                self.sweep_pending().await;
            }
        }
    }
}

pub struct PaymentService;

impl PaymentService {
    pub fn new() -> Self {
        PaymentService {}
    }
}

#[async_trait]
impl<P, G> Service<PaymentServiceRequest, PaymentRequestHandler<P, G>> for PaymentService
where
    P: PaymentStore + Clone,
    G: PaymentGateway,
{
    /// Purchases may run concurrently, but reconciliation-family requests are
    /// handled inline so that deliveries for the same payment are serialized
    /// through this service.
    async fn run(
        &mut self,
        handler: PaymentRequestHandler<P, G>,
        receiver: &mut mpsc::Receiver<PaymentServiceRequest>,
    ) {
        while let Some(request) = receiver.recv().await {
            match request {
                request @ PaymentServiceRequest::StartPurchase { .. } => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler.handle_request(request).await;
                    });
                }
                request => handler.handle_request(request).await,
            }
        }
    }
}
