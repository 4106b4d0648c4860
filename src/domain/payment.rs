use crate::domain::money::Money;
use crate::domain::order::OrderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Closed set of checkout rails. Each variant is backed by exactly one
/// gateway adapter, selected by dispatch in the gateway router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Mpesa,
    Wallet,
    Card,
    Onchain,
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mpesa" => Ok(PaymentMethod::Mpesa),
            "wallet" => Ok(PaymentMethod::Wallet),
            "card" => Ok(PaymentMethod::Card),
            "onchain" | "bitcoin" => Ok(PaymentMethod::Onchain),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

/// Payer-side details handed to the gateway (phone number, card token,
/// on-chain address). Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayerDetails {
    pub account: String,
}

impl PayerDetails {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }
}

/// Result of initiating a charge. Wallet payments settle synchronously;
/// external rails confirm later through the inbound callback.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCharge {
    Settled { gateway_ref: String },
    Pending { gateway_ref: String },
}

impl GatewayCharge {
    pub fn gateway_ref(&self) -> &str {
        match self {
            GatewayCharge::Settled { gateway_ref } | GatewayCharge::Pending { gateway_ref } => {
                gateway_ref
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Settled,
    Failed,
}

/// Idempotency record for one gateway charge, keyed by `(order, gateway_ref)`.
///
/// Callbacks may arrive out of order, late or duplicated; an attempt settles
/// at most once and replays resolve against this record instead of the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub gateway_ref: String,
    pub order: OrderId,
    pub method: PaymentMethod,
    pub amount: Money,
    pub status: AttemptStatus,
    pub created_at: DateTime<Utc>,
}

impl PaymentAttempt {
    pub fn new(
        gateway_ref: impl Into<String>,
        order: OrderId,
        method: PaymentMethod,
        amount: Money,
    ) -> Self {
        Self {
            gateway_ref: gateway_ref.into(),
            order,
            method,
            amount,
            status: AttemptStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status != AttemptStatus::Pending
    }
}
