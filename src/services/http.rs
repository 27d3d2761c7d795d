use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use super::ledger::LedgerRequest;
use super::payments::PaymentServiceRequest;
use super::ServiceError;

mod payments;
mod users;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) ledger_channel: mpsc::Sender<LedgerRequest>,
    pub(crate) payment_channel: mpsc::Sender<PaymentServiceRequest>,
}

/// HTTP status for a service-layer failure. User-facing bodies stay generic;
/// details go to the logs.
pub(crate) fn status_for(error: &ServiceError) -> axum::http::StatusCode {
    use axum::http::StatusCode;

    match error {
        ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ServiceError::InsufficientBalance { .. } => StatusCode::CONFLICT,
        ServiceError::ExternalService(_, _, _) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn app(
    ledger_channel: mpsc::Sender<LedgerRequest>,
    payment_channel: mpsc::Sender<PaymentServiceRequest>,
) -> Router {
    let app_state = AppState {
        ledger_channel,
        payment_channel,
    };

    Router::new()
        .route("/webhook/yookassa", post(payments::handle_gateway_webhook))
        .route("/payments/{gateway_payment_id}", get(payments::lookup_payment_status))
        .route("/users/{user_id}", post(users::register_contact))
        .route("/users/{user_id}/availability", get(users::check_availability))
        .route("/users/{user_id}/charge", post(users::commit_charge))
        .route("/users/{user_id}/accept_terms", post(users::accept_terms))
        .route("/users/{user_id}/referral", get(users::referral_stats))
        .route("/users/{user_id}/purchase", post(payments::start_purchase))
        .route("/health", get(|| async { "OK" }))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(
    listen_addr: &str,
    ledger_channel: mpsc::Sender<LedgerRequest>,
    payment_channel: mpsc::Sender<PaymentServiceRequest>,
) -> Result<(), anyhow::Error> {
    let app = app(ledger_channel, payment_channel);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
