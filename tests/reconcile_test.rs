mod common;

use astro_dealer::models::payments::PaymentStatus;
use astro_dealer::repositories::payments::PaymentStore;
use astro_dealer::services::payments::PaymentServiceRequest;

use common::spawn_app;

#[tokio::test]
async fn happy_path_purchase_awards_credits() {
    let app = spawn_app().await;
    app.register(1, None).await;
    assert_eq!(app.balance(1).await, 0);

    let checkout = app.purchase(1, "buy_1", 9900, 1).await.unwrap();
    assert!(checkout.redirect_url.starts_with("https://pay.test/"));

    let payment = app
        .payment_store
        .get_by_gateway_id(&checkout.gateway_payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(!payment.credits_awarded);

    let acknowledged = app.notify(&checkout.gateway_payment_id, "succeeded").await;
    assert!(acknowledged);

    assert_eq!(app.balance(1).await, 1);
    let payment = app
        .payment_store
        .get_by_gateway_id(&checkout.gateway_payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Succeeded);
    assert!(payment.credits_awarded);
}

#[tokio::test]
async fn duplicate_success_notifications_credit_once() {
    let app = spawn_app().await;
    app.register(2, None).await;

    let checkout = app.purchase(2, "buy_3", 27900, 3).await.unwrap();

    for _ in 0..3 {
        assert!(app.notify(&checkout.gateway_payment_id, "succeeded").await);
    }

    assert_eq!(app.balance(2).await, 3);
}

#[tokio::test]
async fn out_of_order_delivery_never_unawards() {
    let app = spawn_app().await;
    app.register(3, None).await;

    let checkout = app.purchase(3, "buy_1", 9900, 1).await.unwrap();
    assert!(app.notify(&checkout.gateway_payment_id, "succeeded").await);
    assert_eq!(app.balance(3).await, 1);

    // A stale intermediate status arriving late may move the local status,
    // but the award flag must hold and no second credit may happen.
    assert!(app.notify(&checkout.gateway_payment_id, "waiting_for_capture").await);

    let payment = app
        .payment_store
        .get_by_gateway_id(&checkout.gateway_payment_id)
        .await
        .unwrap()
        .unwrap();
    assert!(payment.credits_awarded);
    assert_eq!(app.balance(3).await, 1);

    // And a redelivered success after that is still a no-op.
    assert!(app.notify(&checkout.gateway_payment_id, "succeeded").await);
    assert_eq!(app.balance(3).await, 1);
}

#[tokio::test]
async fn unknown_payments_are_acknowledged_without_mutation() {
    let app = spawn_app().await;
    app.register(4, None).await;

    let acknowledged = app.notify("no-such-payment", "succeeded").await;
    assert!(acknowledged);
    assert_eq!(app.balance(4).await, 0);
}

#[tokio::test]
async fn canceled_payments_award_nothing() {
    let app = spawn_app().await;
    app.register(5, None).await;

    let checkout = app.purchase(5, "buy_1", 9900, 1).await.unwrap();
    assert!(app.notify(&checkout.gateway_payment_id, "canceled").await);

    let payment = app
        .payment_store
        .get_by_gateway_id(&checkout.gateway_payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Canceled);
    assert!(!payment.credits_awarded);
    assert_eq!(app.balance(5).await, 0);
}

#[tokio::test]
async fn unrecognized_status_maps_to_pending() {
    let app = spawn_app().await;
    app.register(6, None).await;

    let checkout = app.purchase(6, "buy_1", 9900, 1).await.unwrap();
    assert!(app.notify(&checkout.gateway_payment_id, "refund_pending").await);

    let payment = app
        .payment_store
        .get_by_gateway_id(&checkout.gateway_payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(app.balance(6).await, 0);
}

#[tokio::test]
async fn manual_lookup_shares_the_award_invariant() {
    let app = spawn_app().await;
    app.register(7, None).await;

    let checkout = app.purchase(7, "buy_5", 44900, 5).await.unwrap();
    app.gateway.set_status(&checkout.gateway_payment_id, "succeeded");

    let status = app.lookup(&checkout.gateway_payment_id).await.unwrap();
    assert_eq!(status, PaymentStatus::Succeeded);
    assert_eq!(app.balance(7).await, 5);

    // Repeating the manual check must not double-award.
    let status = app.lookup(&checkout.gateway_payment_id).await.unwrap();
    assert_eq!(status, PaymentStatus::Succeeded);
    assert_eq!(app.balance(7).await, 5);

    // Neither does a webhook arriving after the manual check.
    assert!(app.notify(&checkout.gateway_payment_id, "succeeded").await);
    assert_eq!(app.balance(7).await, 5);
}

#[tokio::test]
async fn lookup_of_a_payment_missing_at_the_gateway_cancels_it() {
    let app = spawn_app().await;
    app.register(8, None).await;

    let checkout = app.purchase(8, "buy_1", 9900, 1).await.unwrap();
    // Simulate a gateway that lost (or never had) the payment.
    app.gateway.forget(&checkout.gateway_payment_id);

    let status = app.lookup(&checkout.gateway_payment_id).await.unwrap();
    assert_eq!(status, PaymentStatus::Canceled);

    let payment = app
        .payment_store
        .get_by_gateway_id(&checkout.gateway_payment_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Canceled);
    assert!(!payment.credits_awarded);
}

#[tokio::test]
async fn failed_gateway_creation_persists_nothing() {
    let app = spawn_app().await;
    app.register(9, None).await;

    app.gateway.fail_next_create();
    let result = app.purchase(9, "buy_1", 9900, 1).await;
    assert!(result.is_err());

    let unsettled = app
        .payment_store
        .list_unsettled_before(chrono::Utc::now().naive_utc() + chrono::Duration::seconds(60))
        .await
        .unwrap();
    assert!(unsettled.is_empty());
}

#[tokio::test]
async fn mismatched_option_price_is_rejected() {
    let app = spawn_app().await;
    app.register(10, None).await;

    // Tampered amount for a known option.
    let result = app.purchase(10, "buy_1", 100, 1).await;
    assert!(result.is_err());

    let result = app.purchase(10, "nonexistent", 9900, 1).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn sweep_settles_stale_pending_payments() {
    let app = spawn_app().await;
    app.register(11, None).await;

    let checkout = app.purchase(11, "buy_1", 9900, 1).await.unwrap();
    app.gateway.set_status(&checkout.gateway_payment_id, "succeeded");

    // Harness uses a zero-age floor; give the clock a tick so the row
    // qualifies as stale.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    app.payment_tx
        .send(PaymentServiceRequest::SweepPending)
        .await
        .unwrap();

    assert!(app.wait_for_balance(11, 1).await, "sweep never settled the payment");
    let payment = app
        .payment_store
        .get_by_gateway_id(&checkout.gateway_payment_id)
        .await
        .unwrap()
        .unwrap();
    assert!(payment.credits_awarded);
}
