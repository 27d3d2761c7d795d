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
use crate::models::users::Contact;
use crate::services::ledger::LedgerRequest;

pub async fn register_contact(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(contact): Json<Contact>,
) -> impl IntoResponse {
    let (tx, rx) = oneshot::channel();

    let send_result = state
        .ledger_channel
        .send(LedgerRequest::EnsureUser {
            user_id,
            contact,
            response: tx,
        })
        .await;
    if send_result.is_err() {
        return internal_error();
    }

    match rx.await {
        Ok(Ok(user)) => (
            StatusCode::OK,
            Json(json!({
                "user_id": user.id,
                "credits": user.credits,
                "first_service_used": user.first_service_used,
                "accepted_terms": user.accepted_terms,
                "referred_by": user.referred_by,
            })),
        ),
        Ok(Err(e)) => {
            log::error!("Contact registration failed for {}: {}", user_id, e);
            (status_for(&e), Json(json!({"description": "Could not register user."})))
        }
        Err(_) => internal_error(),
    }
}

pub async fn check_availability(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    let (tx, rx) = oneshot::channel();

    let send_result = state
        .ledger_channel
        .send(LedgerRequest::CheckAvailability {
            user_id,
            response: tx,
        })
        .await;
    if send_result.is_err() {
        return internal_error();
    }

    match rx.await {
        Ok(Ok(availability)) => (StatusCode::OK, Json(json!(availability))),
        Ok(Err(e)) => {
            log::error!("Availability check failed for {}: {}", user_id, e);
            (status_for(&e), Json(json!({"description": "Could not check availability."})))
        }
        Err(_) => internal_error(),
    }
}

#[derive(Deserialize)]
pub struct ChargeRequest {
    pub uses_free_trial: bool,
}

pub async fn commit_charge(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<ChargeRequest>,
) -> impl IntoResponse {
    let (tx, rx) = oneshot::channel();

    let send_result = state
        .ledger_channel
        .send(LedgerRequest::CommitCharge {
            user_id,
            uses_free_trial: req.uses_free_trial,
            response: tx,
        })
        .await;
    if send_result.is_err() {
        return internal_error();
    }

    match rx.await {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(json!(outcome))),
        Ok(Err(e)) => {
            log::warn!("Charge rejected for {}: {}", user_id, e);
            let description = match &e {
                crate::services::ServiceError::InsufficientBalance { balance, required } => {
                    format!("Not enough credits: balance {}, required {}.", balance, required)
                }
                _ => "Could not complete the charge. Please try again later.".to_string(),
            };
            (status_for(&e), Json(json!({"description": description})))
        }
        Err(_) => internal_error(),
    }
}

pub async fn accept_terms(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    let (tx, rx) = oneshot::channel();

    let send_result = state
        .ledger_channel
        .send(LedgerRequest::AcceptTerms {
            user_id,
            response: tx,
        })
        .await;
    if send_result.is_err() {
        return internal_error();
    }

    match rx.await {
        Ok(Ok(())) => (StatusCode::OK, Json(json!({"accepted": true}))),
        Ok(Err(e)) => {
            log::error!("Accepting terms failed for {}: {}", user_id, e);
            (status_for(&e), Json(json!({"description": "Could not record acceptance."})))
        }
        Err(_) => internal_error(),
    }
}

pub async fn referral_stats(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    let (tx, rx) = oneshot::channel();

    let send_result = state
        .ledger_channel
        .send(LedgerRequest::ReferralStats {
            user_id,
            response: tx,
        })
        .await;
    if send_result.is_err() {
        return internal_error();
    }

    match rx.await {
        Ok(Ok(stats)) => (StatusCode::OK, Json(json!(stats))),
        Ok(Err(e)) => {
            log::error!("Referral stats failed for {}: {}", user_id, e);
            (status_for(&e), Json(json!({"description": "Could not load referral stats."})))
        }
        Err(_) => internal_error(),
    }
}

fn internal_error() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"description": "Internal server error."})),
    )
}
