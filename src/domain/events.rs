use crate::domain::actor::UserId;
use crate::domain::money::Money;
use crate::domain::order::OrderId;
use crate::domain::payout::PayoutId;
use serde::{Deserialize, Serialize};

/// Events the engine publishes to the notification sink. Delivery semantics
/// (retry, fan-out, channels) are the sink's problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    OrderCreated { order: OrderId, farmer: UserId },
    OrderConfirmed { order: OrderId },
    OrderCancelled { order: OrderId },
    OrderRejected { order: OrderId },
    OrderDelivered { order: OrderId },
    OrderCompleted { order: OrderId },
    PaymentPending { order: OrderId, gateway_ref: String },
    PaymentSettled { order: OrderId, gateway_ref: String },
    PaymentFailed { order: OrderId, gateway_ref: String },
    EscrowReleased { order: OrderId, farmer_share: Money, commission: Money },
    EscrowRefunded { order: OrderId, amount: Money },
    PayoutProcessed { payout: PayoutId, reference: String },
    PayoutRejected { payout: PayoutId, reason: String },
}
