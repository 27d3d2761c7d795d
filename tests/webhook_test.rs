mod common;

use astro_dealer::services::http;

use common::{spawn_app, TestApp};

/// Binds the HTTP edge on an ephemeral port and returns its base URL.
async fn spawn_http(app: &TestApp) -> String {
    let router = http::app(app.ledger_tx.clone(), app.payment_tx.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn malformed_notifications_are_acknowledged() {
    let app = spawn_app().await;
    app.register(1, None).await;
    let base = spawn_http(&app).await;
    let client = reqwest::Client::new();

    // Field-incomplete object: no status, no type.
    let response = client
        .post(format!("{}/webhook/yookassa", base))
        .body(r#"{"event": "payment.succeeded", "object": {"id": "x1"}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // Not JSON at all.
    let response = client
        .post(format!("{}/webhook/yookassa", base))
        .body("definitely not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    assert_eq!(app.balance(1).await, 0);
}

#[tokio::test]
async fn well_formed_notifications_still_reconcile_over_http() {
    let app = spawn_app().await;
    app.register(2, None).await;
    let base = spawn_http(&app).await;

    let checkout = app.purchase(2, "buy_1", 9900, 1).await.unwrap();
    let body = format!(
        r#"{{"event": "payment.succeeded", "object": {{"id": "{}", "status": "succeeded", "type": "payment"}}}}"#,
        checkout.gateway_payment_id
    );

    let response = reqwest::Client::new()
        .post(format!("{}/webhook/yookassa", base))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(app.balance(2).await, 1);
}
