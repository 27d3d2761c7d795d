use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;

use super::{status_for, AppState};
use crate::models::payments::{GatewayNotification, PaymentOption};
use crate::services::payments::PaymentServiceRequest;

/// Push notifications from the payment gateway. Anything acknowledged with
/// 200 will not be redelivered; a 5xx makes the gateway retry. Bodies that do
/// not parse are acknowledged too, since redelivering them cannot fix them.
pub async fn handle_gateway_webhook(
    State(state): State<AppState>,
    body: String,
) -> impl IntoResponse {
    let payload: GatewayNotification = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(e) => {
            log::warn!("Ignoring malformed gateway notification: {}", e);
            return (StatusCode::OK, Json(json!({"acknowledged": true})));
        }
    };

    let (tx, rx) = oneshot::channel();

    let send_result = state
        .payment_channel
        .send(PaymentServiceRequest::GatewayNotification {
            payload,
            response: tx,
        })
        .await;
    if send_result.is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"description": "Internal server error."})));
    }

    match rx.await {
        Ok(true) => (StatusCode::OK, Json(json!({"acknowledged": true}))),
        Ok(false) | Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"acknowledged": false})),
        ),
    }
}

#[derive(Deserialize)]
pub struct PurchaseRequest {
    pub option_key: String,
}

pub async fn start_purchase(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<PurchaseRequest>,
) -> impl IntoResponse {
    let Some(option) = PaymentOption::by_key(&req.option_key) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"description": "Unknown payment option."})),
        );
    };

    let (tx, rx) = oneshot::channel();

    let send_result = state
        .payment_channel
        .send(PaymentServiceRequest::StartPurchase {
            user_id,
            amount_in_minor_units: option.amount_in_minor_units,
            credits: option.credits,
            option_key: req.option_key.clone(),
            response: tx,
        })
        .await;
    if send_result.is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": "Internal server error."})),
        );
    }

    match rx.await {
        Ok(Ok(checkout)) => (StatusCode::CREATED, Json(json!(checkout))),
        Ok(Err(e)) => {
            log::error!("Purchase failed for user {}: {}", user_id, e);
            (
                status_for(&e),
                Json(json!({"description": "Could not create the payment. Please try again later."})),
            )
        }
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": "Internal server error."})),
        ),
    }
}

pub async fn lookup_payment_status(
    State(state): State<AppState>,
    Path(gateway_payment_id): Path<String>,
) -> impl IntoResponse {
    let (tx, rx) = oneshot::channel();

    let send_result = state
        .payment_channel
        .send(PaymentServiceRequest::LookupStatus {
            gateway_payment_id: gateway_payment_id.clone(),
            response: tx,
        })
        .await;
    if send_result.is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": "Internal server error."})),
        );
    }

    match rx.await {
        Ok(Ok(status)) => (
            StatusCode::OK,
            Json(json!({"gateway_payment_id": gateway_payment_id, "status": status})),
        ),
        Ok(Err(e)) => {
            log::error!("Status lookup failed for {}: {}", gateway_payment_id, e);
            (
                status_for(&e),
                Json(json!({"description": "Could not look up the payment."})),
            )
        }
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": "Internal server error."})),
        ),
    }
}
