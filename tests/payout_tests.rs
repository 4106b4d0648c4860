mod common;

use agropay::domain::actor::Actor;
use agropay::domain::events::EngineEvent;
use agropay::domain::money::{Amount, Money};
use agropay::domain::payout::{PayoutMethod, PayoutStatus};
use agropay::domain::wallet::{OwnerRef, TxKind};
use agropay::error::EngineError;
use common::harness;
use uuid::Uuid;

#[tokio::test]
async fn test_payout_request_checks_balance() {
    let h = harness();
    let farmer_id = Uuid::new_v4();
    let farmer = Actor::Farmer(farmer_id);
    h.engine
        .deposit(farmer_id, Amount::from_minor(300).unwrap())
        .await
        .unwrap();

    let result = h
        .engine
        .request_payout(
            &farmer,
            Amount::from_minor(301).unwrap(),
            PayoutMethod::Mpesa,
            "+254700000000",
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::InsufficientFunds {
            needed: 301,
            available: 300
        })
    ));

    let payout = h
        .engine
        .request_payout(
            &farmer,
            Amount::from_minor(300).unwrap(),
            PayoutMethod::Mpesa,
            "+254700000000",
        )
        .await
        .unwrap();
    assert_eq!(payout.status, PayoutStatus::Pending);
    // The request alone does not move money.
    assert_eq!(
        h.engine.balance(OwnerRef::User(farmer_id)).await.unwrap(),
        Money::from_minor(300)
    );
}

#[tokio::test]
async fn test_approval_debits_and_records_reference() {
    let h = harness();
    let farmer_id = Uuid::new_v4();
    let farmer = Actor::Farmer(farmer_id);
    h.engine
        .deposit(farmer_id, Amount::from_minor(500).unwrap())
        .await
        .unwrap();
    let payout = h
        .engine
        .request_payout(
            &farmer,
            Amount::from_minor(200).unwrap(),
            PayoutMethod::Bank,
            "acct 42",
        )
        .await
        .unwrap();

    let processed = h
        .engine
        .approve_payout(&Actor::Admin, payout.id, payout.version)
        .await
        .unwrap();
    assert_eq!(processed.status, PayoutStatus::Processed);
    let reference = processed.reference.unwrap();
    assert!(reference.starts_with("BNK-"));
    assert_eq!(
        h.engine.balance(OwnerRef::User(farmer_id)).await.unwrap(),
        Money::from_minor(300)
    );
    let txs = h
        .engine
        .transactions(OwnerRef::User(farmer_id))
        .await
        .unwrap();
    assert_eq!(txs.last().unwrap().kind, TxKind::Withdrawal);
    assert_eq!(txs.last().unwrap().delta, Money::from_minor(-200));

    let events = h.sink.events().await;
    assert!(events.contains(&EngineEvent::PayoutProcessed {
        payout: payout.id,
        reference,
    }));
}

#[tokio::test]
async fn test_depleted_balance_rejects_at_approval() {
    let h = harness();
    let farmer_id = Uuid::new_v4();
    let farmer = Actor::Farmer(farmer_id);
    h.engine
        .deposit(farmer_id, Amount::from_minor(500).unwrap())
        .await
        .unwrap();
    let first = h
        .engine
        .request_payout(
            &farmer,
            Amount::from_minor(400).unwrap(),
            PayoutMethod::Mpesa,
            "+254700000000",
        )
        .await
        .unwrap();
    let second = h
        .engine
        .request_payout(
            &farmer,
            Amount::from_minor(400).unwrap(),
            PayoutMethod::Mpesa,
            "+254700000000",
        )
        .await
        .unwrap();

    h.engine
        .approve_payout(&Actor::Admin, first.id, first.version)
        .await
        .unwrap();
    // Only 100 left; the second approval must fail and reject the request.
    let result = h
        .engine
        .approve_payout(&Actor::Admin, second.id, second.version)
        .await;
    assert!(matches!(result, Err(EngineError::InsufficientFunds { .. })));
    let stored = h.engine.payout(second.id).await.unwrap();
    assert_eq!(stored.status, PayoutStatus::Rejected);
    assert_eq!(
        stored.reason.as_deref(),
        Some("insufficient funds at approval")
    );
    // The first debit stands, nothing further moved.
    assert_eq!(
        h.engine.balance(OwnerRef::User(farmer_id)).await.unwrap(),
        Money::from_minor(100)
    );
}

#[tokio::test]
async fn test_rejection_keeps_balance_and_records_reason() {
    let h = harness();
    let farmer_id = Uuid::new_v4();
    let farmer = Actor::Farmer(farmer_id);
    h.engine
        .deposit(farmer_id, Amount::from_minor(500).unwrap())
        .await
        .unwrap();
    let payout = h
        .engine
        .request_payout(
            &farmer,
            Amount::from_minor(200).unwrap(),
            PayoutMethod::Bank,
            "acct 42",
        )
        .await
        .unwrap();

    let rejected = h
        .engine
        .reject_payout(&Actor::Admin, payout.id, payout.version, "account mismatch")
        .await
        .unwrap();
    assert_eq!(rejected.status, PayoutStatus::Rejected);
    assert_eq!(rejected.reason.as_deref(), Some("account mismatch"));
    assert_eq!(
        h.engine.balance(OwnerRef::User(farmer_id)).await.unwrap(),
        Money::from_minor(500)
    );

    // A rejected payout cannot later be approved.
    let result = h
        .engine
        .approve_payout(&Actor::Admin, payout.id, rejected.version)
        .await;
    assert!(matches!(
        result,
        Err(EngineError::InvalidTransition { op: "process", .. })
    ));
}

#[tokio::test]
async fn test_payout_admin_only_and_farmer_only() {
    let h = harness();
    let farmer_id = Uuid::new_v4();
    let farmer = Actor::Farmer(farmer_id);
    h.engine
        .deposit(farmer_id, Amount::from_minor(500).unwrap())
        .await
        .unwrap();

    // Buyers cannot request payouts.
    let result = h
        .engine
        .request_payout(
            &Actor::Buyer(farmer_id),
            Amount::from_minor(100).unwrap(),
            PayoutMethod::Mpesa,
            "+254700000000",
        )
        .await;
    assert!(matches!(result, Err(EngineError::InvalidActor(_))));

    let payout = h
        .engine
        .request_payout(
            &farmer,
            Amount::from_minor(100).unwrap(),
            PayoutMethod::Mpesa,
            "+254700000000",
        )
        .await
        .unwrap();
    // Farmers cannot approve their own payouts.
    let result = h
        .engine
        .approve_payout(&farmer, payout.id, payout.version)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidActor(_))));
}
