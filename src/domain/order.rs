use crate::domain::actor::{Actor, UserId};
use crate::domain::money::{CommissionRate, Money};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type OrderId = Uuid;
pub type ProductId = Uuid;
pub type EscrowId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Paid,
    InTransit,
    Delivered,
    Completed,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// `completed` is the only terminal success state. `delivered` is an
    /// intermediate step that still requires explicit buyer confirmation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Paid => "paid",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Delivery,
    Pickup,
}

/// A buyer's order for a quantity of a single product.
///
/// Pricing is frozen at creation: `total_amount` and the commission rate are
/// computed once and never recomputed, so later catalog price changes cannot
/// retroactively affect an existing order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub buyer: UserId,
    pub farmer: UserId,
    pub product: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub commission_rate: CommissionRate,
    pub total_amount: Money,
    pub delivery_method: DeliveryMethod,
    pub status: OrderStatus,
    pub escrow: Option<EscrowId>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl Order {
    pub fn new(
        buyer: UserId,
        farmer: UserId,
        product: ProductId,
        quantity: u32,
        unit_price: Money,
        commission_rate: CommissionRate,
        delivery_method: DeliveryMethod,
    ) -> Result<Self> {
        if quantity == 0 {
            return Err(EngineError::Validation(
                "quantity must be positive".to_string(),
            ));
        }
        if !unit_price.is_positive() {
            return Err(EngineError::Validation(format!(
                "unit price must be positive, got {unit_price}"
            )));
        }
        let total_amount = unit_price.checked_mul(i64::from(quantity)).ok_or_else(|| {
            EngineError::Validation("order total overflows minor units".to_string())
        })?;
        Ok(Self {
            id: Uuid::new_v4(),
            buyer,
            farmer,
            product,
            quantity,
            unit_price,
            commission_rate,
            total_amount,
            delivery_method,
            status: OrderStatus::Pending,
            escrow: None,
            created_at: Utc::now(),
            version: 0,
        })
    }

    pub fn ensure_buyer(&self, actor: &Actor) -> Result<()> {
        match actor {
            Actor::Buyer(id) if *id == self.buyer => Ok(()),
            _ => Err(EngineError::InvalidActor(format!(
                "only the buyer may act on order {}",
                self.id
            ))),
        }
    }

    pub fn ensure_farmer(&self, actor: &Actor) -> Result<()> {
        match actor {
            Actor::Farmer(id) if *id == self.farmer => Ok(()),
            _ => Err(EngineError::InvalidActor(format!(
                "only the farmer may act on order {}",
                self.id
            ))),
        }
    }

    fn transition_err(&self, op: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            op,
            from: self.status.as_str().to_string(),
        }
    }

    /// Farmer acknowledgment. Idempotent: confirming an already confirmed
    /// order is a no-op; returns whether anything changed.
    pub fn confirm(&mut self, actor: &Actor) -> Result<bool> {
        self.ensure_farmer(actor)?;
        match self.status {
            OrderStatus::Confirmed => Ok(false),
            OrderStatus::Pending => {
                self.status = OrderStatus::Confirmed;
                Ok(true)
            }
            _ => Err(self.transition_err("confirm")),
        }
    }

    /// Whether a payment attempt may be initiated. Paying is allowed from
    /// `pending` or `confirmed`, and only while no escrow is attached.
    pub fn can_pay(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Confirmed)
            && self.escrow.is_none()
    }

    /// Applied only on a confirmed gateway settlement, never optimistically.
    pub fn mark_paid(&mut self, escrow: EscrowId) -> Result<()> {
        if !self.can_pay() {
            return Err(self.transition_err("pay"));
        }
        self.status = OrderStatus::Paid;
        self.escrow = Some(escrow);
        Ok(())
    }

    /// Cancellation is only possible while no escrow funds are held.
    pub fn cancel(&mut self, actor: &Actor) -> Result<()> {
        if self.ensure_buyer(actor).is_err() && self.ensure_farmer(actor).is_err() {
            return Err(EngineError::InvalidActor(format!(
                "only the buyer or farmer may cancel order {}",
                self.id
            )));
        }
        match self.status {
            OrderStatus::Pending | OrderStatus::Confirmed => {
                self.status = OrderStatus::Cancelled;
                Ok(())
            }
            _ => Err(self.transition_err("cancel")),
        }
    }

    /// Farmer refusal of a fresh order. Once any funds are escrowed the
    /// cancellation-and-refund path must be used instead.
    pub fn reject(&mut self, actor: &Actor) -> Result<()> {
        self.ensure_farmer(actor)?;
        match self.status {
            OrderStatus::Pending if self.escrow.is_none() => {
                self.status = OrderStatus::Rejected;
                Ok(())
            }
            _ => Err(self.transition_err("reject")),
        }
    }

    pub fn start_transit(&mut self, actor: &Actor) -> Result<()> {
        self.ensure_farmer(actor)?;
        match self.status {
            OrderStatus::Paid => {
                self.status = OrderStatus::InTransit;
                Ok(())
            }
            _ => Err(self.transition_err("start_transit")),
        }
    }

    pub fn mark_delivered(&mut self) -> Result<()> {
        match self.status {
            OrderStatus::Paid | OrderStatus::InTransit => {
                self.status = OrderStatus::Delivered;
                Ok(())
            }
            _ => Err(self.transition_err("mark_delivered")),
        }
    }

    /// Buyer receipt confirmation; escrow release is driven by the engine.
    pub fn complete(&mut self) -> Result<()> {
        match self.status {
            OrderStatus::Delivered => {
                self.status = OrderStatus::Completed;
                Ok(())
            }
            _ => Err(self.transition_err("complete")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_order() -> Order {
        Order::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            10,
            Money::from_minor(50),
            CommissionRate::new(dec!(0.1)).unwrap(),
            DeliveryMethod::Delivery,
        )
        .unwrap()
    }

    #[test]
    fn test_total_frozen_at_creation() {
        let order = sample_order();
        assert_eq!(order.total_amount, Money::from_minor(500));
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.version, 0);
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let result = Order::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            0,
            Money::from_minor(50),
            CommissionRate::new(dec!(0.1)).unwrap(),
            DeliveryMethod::Pickup,
        );
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_confirm_is_idempotent() {
        let mut order = sample_order();
        let farmer = Actor::Farmer(order.farmer);
        assert!(order.confirm(&farmer).unwrap());
        assert!(!order.confirm(&farmer).unwrap());
        assert_eq!(order.status, OrderStatus::Confirmed);
    }

    #[test]
    fn test_confirm_requires_owning_farmer() {
        let mut order = sample_order();
        let other = Actor::Farmer(Uuid::new_v4());
        assert!(matches!(
            order.confirm(&other),
            Err(EngineError::InvalidActor(_))
        ));
    }

    #[test]
    fn test_no_cancel_once_paid() {
        let mut order = sample_order();
        let buyer = Actor::Buyer(order.buyer);
        order.mark_paid(Uuid::new_v4()).unwrap();
        assert!(matches!(
            order.cancel(&buyer),
            Err(EngineError::InvalidTransition { op: "cancel", .. })
        ));
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[test]
    fn test_reject_only_from_pending() {
        let mut order = sample_order();
        let farmer = Actor::Farmer(order.farmer);
        order.confirm(&farmer).unwrap();
        assert!(matches!(
            order.reject(&farmer),
            Err(EngineError::InvalidTransition { op: "reject", .. })
        ));
    }

    #[test]
    fn test_delivery_then_completion() {
        let mut order = sample_order();
        order.mark_paid(Uuid::new_v4()).unwrap();
        order.start_transit(&Actor::Farmer(order.farmer)).unwrap();
        order.mark_delivered().unwrap();
        assert_eq!(order.status, OrderStatus::Delivered);
        order.complete().unwrap();
        assert!(order.status.is_terminal());
    }

    #[test]
    fn test_delivered_is_not_terminal() {
        let mut order = sample_order();
        order.mark_paid(Uuid::new_v4()).unwrap();
        order.mark_delivered().unwrap();
        assert!(!order.status.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&OrderStatus::InTransit).unwrap();
        assert_eq!(json, "\"in_transit\"");
    }
}
