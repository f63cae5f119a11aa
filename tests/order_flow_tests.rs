mod common;

use common::*;
use raildine::application::orders::TransitionRequest;
use raildine::domain::money::{Amount, Balance};
use raildine::domain::order::{DeliveryAgent, OrderStatus, PaymentState};
use raildine::domain::wallet::TransactionKind;
use raildine::error::EngineError;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_end_to_end_wallet_order_with_otp() {
    let h = harness().await;
    let engine = &h.engine;

    let order = engine.create_order(thali_order(CUSTOMER)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.subtotal, dec!(200));
    assert_eq!(order.total, dec!(210));

    engine
        .credit_wallet(CUSTOMER, dec!(500), "Top-up", None)
        .await
        .unwrap();
    engine.pay_order_from_wallet(order.id, CUSTOMER).await.unwrap();
    assert_eq!(
        engine.wallet_balance(CUSTOMER).await.unwrap(),
        Balance::new(dec!(290))
    );
    let history = engine.wallet_transactions(CUSTOMER).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].amount, dec!(-210));
    assert_eq!(history[0].kind, TransactionKind::Debit);
    assert_eq!(history[0].order_id, Some(order.id));

    for status in [
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
    ] {
        engine
            .transition_order(TransitionRequest::new(order.id, VENDOR, status))
            .await
            .unwrap();
    }
    engine
        .transition_order(
            TransitionRequest::new(order.id, VENDOR, OrderStatus::OutForDelivery).with_agent(
                DeliveryAgent {
                    name: "Ravi".to_string(),
                    phone: "9876543210".to_string(),
                },
            ),
        )
        .await
        .unwrap();
    let seen_by_customer = engine.get_order(order.id, CUSTOMER).await.unwrap();
    assert_eq!(seen_by_customer.delivery_otp.as_deref(), Some(OTP));

    let wrong = engine
        .transition_order(
            TransitionRequest::new(order.id, VENDOR, OrderStatus::Delivered).with_otp("0000"),
        )
        .await;
    assert!(matches!(wrong, Err(EngineError::OtpMismatch)));
    assert_eq!(
        engine.get_order(order.id, VENDOR).await.unwrap().status,
        OrderStatus::OutForDelivery
    );

    let delivered = engine
        .transition_order(
            TransitionRequest::new(order.id, VENDOR, OrderStatus::Delivered).with_otp(OTP),
        )
        .await
        .unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert!(delivered.delivered_at.is_some());

    let late_cancel = engine
        .transition_order(TransitionRequest::new(order.id, CUSTOMER, OrderStatus::Cancelled))
        .await;
    assert!(matches!(late_cancel, Err(EngineError::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_insufficient_balance_blocks_wallet_payment() {
    let h = harness().await;
    let engine = &h.engine;
    engine
        .credit_wallet(CUSTOMER, dec!(50), "Top-up", None)
        .await
        .unwrap();
    let order = engine.create_order(thali_order(CUSTOMER)).await.unwrap();

    let result = engine.pay_order_from_wallet(order.id, CUSTOMER).await;
    assert!(matches!(
        result,
        Err(EngineError::InsufficientBalance { .. })
    ));
    assert_eq!(
        engine.wallet_balance(CUSTOMER).await.unwrap(),
        Balance::new(dec!(50))
    );
    assert_eq!(engine.wallet_transactions(CUSTOMER).await.unwrap().len(), 1);
    let order = engine.get_order(order.id, CUSTOMER).await.unwrap();
    assert_eq!(order.payment, PaymentState::Unpaid);
}

#[tokio::test]
async fn test_total_frozen_at_creation() {
    let h = harness().await;
    let order = h.engine.create_order(thali_order(CUSTOMER)).await.unwrap();

    h.catalog
        .set_item(100, RESTAURANT, Amount::new(dec!(180)).unwrap(), true)
        .await;
    let later = h.engine.create_order(thali_order(CUSTOMER)).await.unwrap();

    assert_eq!(
        h.engine.get_order(order.id, CUSTOMER).await.unwrap().total,
        dec!(210)
    );
    assert_eq!(later.total, dec!(294));
}

#[tokio::test]
async fn test_repeated_transition_is_idempotent() {
    let h = harness().await;
    let order = h.engine.create_order(thali_order(CUSTOMER)).await.unwrap();
    let request = TransitionRequest::new(order.id, VENDOR, OrderStatus::Confirmed);

    let first = h.engine.transition_order(request.clone()).await.unwrap();
    let second = h.engine.transition_order(request.clone()).await.unwrap();
    let third = h.engine.transition_order(request).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(third.version, order.version + 1);
}

#[tokio::test]
async fn test_illegal_moves_rejected() {
    let h = harness().await;
    let order = h.engine.create_order(thali_order(CUSTOMER)).await.unwrap();

    let skip = h
        .engine
        .transition_order(TransitionRequest::new(order.id, VENDOR, OrderStatus::Ready))
        .await;
    assert!(matches!(
        skip,
        Err(EngineError::InvalidTransition {
            from: OrderStatus::Pending,
            to: OrderStatus::Ready
        })
    ));

    let other_vendor = h
        .engine
        .transition_order(TransitionRequest::new(
            order.id,
            OTHER_VENDOR,
            OrderStatus::Confirmed,
        ))
        .await;
    assert!(matches!(other_vendor, Err(EngineError::Forbidden(_))));

    let missing = h
        .engine
        .transition_order(TransitionRequest::new(999, VENDOR, OrderStatus::Confirmed))
        .await;
    assert!(matches!(missing, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_cancel_after_confirmation_refunds_once() {
    let h = harness().await;
    let engine = &h.engine;
    engine
        .credit_wallet(CUSTOMER, dec!(500), "Top-up", None)
        .await
        .unwrap();
    let order = engine.create_order(thali_order(CUSTOMER)).await.unwrap();
    engine.pay_order_from_wallet(order.id, CUSTOMER).await.unwrap();
    engine
        .transition_order(TransitionRequest::new(order.id, VENDOR, OrderStatus::Confirmed))
        .await
        .unwrap();

    let cancel = TransitionRequest::new(order.id, CUSTOMER, OrderStatus::Cancelled);
    let cancelled = engine.transition_order(cancel.clone()).await.unwrap();
    engine.transition_order(cancel).await.unwrap();
    assert!(matches!(cancelled.payment, PaymentState::Refunded(_)));

    assert_eq!(
        engine.wallet_balance(CUSTOMER).await.unwrap(),
        Balance::new(dec!(500))
    );
    let refunds: Vec<_> = engine
        .wallet_transactions(CUSTOMER)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.kind == TransactionKind::Refund)
        .collect();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, dec!(210));
    assert_eq!(refunds[0].balance_after, Balance::new(dec!(500)));
}

#[tokio::test]
async fn test_listings_are_newest_first_and_scoped() {
    let h = harness().await;
    let first = h.engine.create_order(thali_order(CUSTOMER)).await.unwrap();
    let second = h.engine.create_order(thali_order(CUSTOMER)).await.unwrap();
    h.engine
        .create_order(thali_order(OTHER_CUSTOMER))
        .await
        .unwrap();

    let mine: Vec<_> = h
        .engine
        .list_orders_for_user(CUSTOMER)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(mine, vec![second.id, first.id]);
    assert_eq!(h.engine.list_orders_for_vendor(VENDOR).await.unwrap().len(), 3);
    assert!(h
        .engine
        .list_orders_for_vendor(OTHER_VENDOR)
        .await
        .unwrap()
        .is_empty());
}
