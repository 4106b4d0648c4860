use crate::application::engine::{CreateOrder, EngineParts, MarketEngine, PaymentTicket};
use crate::domain::actor::{Actor, UserId};
use crate::domain::money::{Amount, CommissionRate, Money};
use crate::domain::order::{DeliveryMethod, OrderId, ProductId};
use crate::domain::payment::{AttemptStatus, PayerDetails, PaymentMethod};
use crate::domain::payout::{PayoutId, PayoutMethod};
use crate::domain::product::ProductSnapshot;
use crate::domain::wallet::{OwnerRef, WalletAccount};
use crate::error::{EngineError, Result};
use crate::infrastructure::gateway::sandbox_router;
use crate::infrastructure::in_memory::{
    InMemoryAttemptStore, InMemoryEscrowStore, InMemoryOrderStore, InMemoryPayoutStore,
    InMemoryProductCatalog, InMemoryWalletStore,
};
use crate::infrastructure::notify::TracingSink;
use crate::interfaces::csv::scenario_reader::{ScenarioStep, StepOp};
use std::collections::HashMap;

/// Drives a [`MarketEngine`] from scenario steps, interning free-form aliases
/// to entity ids as they first appear. Backed by the in-memory stores and the
/// sandbox gateways.
pub struct ScenarioRunner {
    engine: MarketEngine,
    catalog: InMemoryProductCatalog,
    users: HashMap<String, UserId>,
    products: HashMap<String, ProductId>,
    orders: HashMap<String, OrderId>,
    payouts: HashMap<String, PayoutId>,
    /// Last issued payment ticket per order alias, for callback delivery.
    tickets: HashMap<String, PaymentTicket>,
}

impl ScenarioRunner {
    pub fn new(commission_rate: CommissionRate) -> Self {
        let catalog = InMemoryProductCatalog::new();
        let parts = EngineParts {
            orders: Box::new(InMemoryOrderStore::new()),
            escrows: Box::new(InMemoryEscrowStore::new()),
            wallets: Box::new(InMemoryWalletStore::new()),
            payouts: Box::new(InMemoryPayoutStore::new()),
            attempts: Box::new(InMemoryAttemptStore::new()),
            catalog: Box::new(catalog.clone()),
            gateways: sandbox_router(),
            notifier: Box::new(TracingSink),
        };
        Self {
            engine: MarketEngine::new(parts, commission_rate),
            catalog,
            users: HashMap::new(),
            products: HashMap::new(),
            orders: HashMap::new(),
            payouts: HashMap::new(),
            tickets: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &MarketEngine {
        &self.engine
    }

    pub async fn accounts(&self) -> Result<Vec<WalletAccount>> {
        self.engine.accounts().await
    }

    fn user(&mut self, alias: &str) -> UserId {
        *self
            .users
            .entry(alias.to_string())
            .or_insert_with(UserId::new_v4)
    }

    /// Parses `buyer:alice`, `farmer:bob` or `admin`.
    fn actor(&mut self, label: &str) -> Result<Actor> {
        if label == "admin" {
            return Ok(Actor::Admin);
        }
        match label.split_once(':') {
            Some(("buyer", alias)) => Ok(Actor::Buyer(self.user(alias))),
            Some(("farmer", alias)) => Ok(Actor::Farmer(self.user(alias))),
            _ => Err(EngineError::Validation(format!("unknown actor: {label}"))),
        }
    }

    fn order_id(&self, alias: &str) -> Result<OrderId> {
        self.orders
            .get(alias)
            .copied()
            .ok_or_else(|| EngineError::Validation(format!("unknown order alias: {alias}")))
    }

    fn payout_id(&self, alias: &str) -> Result<PayoutId> {
        self.payouts
            .get(alias)
            .copied()
            .ok_or_else(|| EngineError::Validation(format!("unknown payout alias: {alias}")))
    }

    fn required_amount(step: &ScenarioStep) -> Result<Money> {
        step.amount
            .map(Money::from_minor)
            .ok_or_else(|| EngineError::Validation("missing amount column".to_string()))
    }

    fn required_qty(step: &ScenarioStep) -> Result<u32> {
        step.qty
            .ok_or_else(|| EngineError::Validation("missing qty column".to_string()))
    }

    fn delivery_method(label: &str) -> Result<DeliveryMethod> {
        match label {
            "" | "delivery" => Ok(DeliveryMethod::Delivery),
            "pickup" => Ok(DeliveryMethod::Pickup),
            other => Err(EngineError::Validation(format!(
                "unknown delivery method: {other}"
            ))),
        }
    }

    fn payout_method(label: &str) -> Result<PayoutMethod> {
        match label {
            "mpesa" => Ok(PayoutMethod::Mpesa),
            "bank" => Ok(PayoutMethod::Bank),
            other => Err(EngineError::Validation(format!(
                "unknown payout method: {other}"
            ))),
        }
    }

    async fn order_version(&self, id: OrderId) -> Result<u64> {
        Ok(self.engine.order(id).await?.version)
    }

    pub async fn apply(&mut self, step: ScenarioStep) -> Result<()> {
        match step.op {
            StepOp::Product => {
                let Actor::Farmer(farmer) = self.actor(&step.actor)? else {
                    return Err(EngineError::Validation(
                        "products must be seeded by a farmer".to_string(),
                    ));
                };
                let id = *self
                    .products
                    .entry(step.item.clone())
                    .or_insert_with(ProductId::new_v4);
                self.catalog
                    .add(ProductSnapshot {
                        id,
                        farmer,
                        unit_price: Self::required_amount(&step)?,
                        available: Self::required_qty(&step)?,
                    })
                    .await;
            }
            StepOp::Deposit => {
                let actor = self.actor(&step.actor)?;
                let user = actor.user().ok_or_else(|| {
                    EngineError::Validation("deposit requires a user actor".to_string())
                })?;
                let amount = Amount::new(Self::required_amount(&step)?)?;
                self.engine.deposit(user, amount).await?;
            }
            StepOp::Order => {
                let actor = self.actor(&step.actor)?;
                let product = self.products.get(&step.item).copied().ok_or_else(|| {
                    EngineError::Validation(format!("unknown product alias: {}", step.item))
                })?;
                let order = self
                    .engine
                    .create_order(
                        &actor,
                        CreateOrder {
                            product,
                            quantity: Self::required_qty(&step)?,
                            delivery_method: Self::delivery_method(&step.method)?,
                        },
                    )
                    .await?;
                self.orders.insert(step.order.clone(), order.id);
            }
            StepOp::Confirm => {
                let actor = self.actor(&step.actor)?;
                let id = self.order_id(&step.order)?;
                let version = self.order_version(id).await?;
                self.engine.confirm_order(&actor, id, version).await?;
            }
            StepOp::Pay => {
                let actor = self.actor(&step.actor)?;
                let id = self.order_id(&step.order)?;
                let version = self.order_version(id).await?;
                let method: PaymentMethod = step
                    .method
                    .parse()
                    .map_err(EngineError::Validation)?;
                let payer = PayerDetails::new(step.account.clone());
                let ticket = self
                    .engine
                    .pay_order(&actor, id, version, method, &payer)
                    .await?;
                self.tickets.insert(step.order.clone(), ticket);
            }
            StepOp::CallbackOk | StepOp::CallbackFail => {
                let ticket = self.tickets.get(&step.order).ok_or_else(|| {
                    EngineError::Validation(format!(
                        "no payment attempt recorded for order {}",
                        step.order
                    ))
                })?;
                if ticket.status != AttemptStatus::Pending {
                    return Ok(());
                }
                let amount = step
                    .amount
                    .map(Money::from_minor)
                    .unwrap_or(ticket.order.total_amount);
                let success = step.op == StepOp::CallbackOk;
                self.engine
                    .gateway_callback(&ticket.gateway_ref, success, amount)
                    .await?;
            }
            StepOp::Transit => {
                let actor = self.actor(&step.actor)?;
                let id = self.order_id(&step.order)?;
                let version = self.order_version(id).await?;
                self.engine.start_transit(&actor, id, version).await?;
            }
            StepOp::Deliver => {
                let actor = self.actor(&step.actor)?;
                let id = self.order_id(&step.order)?;
                let version = self.order_version(id).await?;
                self.engine.mark_delivered(&actor, id, version).await?;
            }
            StepOp::Receive => {
                let actor = self.actor(&step.actor)?;
                let id = self.order_id(&step.order)?;
                let version = self.order_version(id).await?;
                self.engine.confirm_receipt(&actor, id, version).await?;
            }
            StepOp::Cancel => {
                let actor = self.actor(&step.actor)?;
                let id = self.order_id(&step.order)?;
                let version = self.order_version(id).await?;
                self.engine.cancel_order(&actor, id, version).await?;
            }
            StepOp::Reject => {
                let actor = self.actor(&step.actor)?;
                let id = self.order_id(&step.order)?;
                let version = self.order_version(id).await?;
                self.engine.reject_order(&actor, id, version).await?;
            }
            StepOp::Payout => {
                let actor = self.actor(&step.actor)?;
                let amount = Amount::new(Self::required_amount(&step)?)?;
                let method = Self::payout_method(&step.method)?;
                let payout = self
                    .engine
                    .request_payout(&actor, amount, method, step.account.clone())
                    .await?;
                self.payouts.insert(step.order.clone(), payout.id);
            }
            StepOp::ApprovePayout => {
                let actor = self.actor(&step.actor)?;
                let id = self.payout_id(&step.order)?;
                let version = self.engine.payout(id).await?.version;
                self.engine.approve_payout(&actor, id, version).await?;
            }
            StepOp::RejectPayout => {
                let actor = self.actor(&step.actor)?;
                let id = self.payout_id(&step.order)?;
                let version = self.engine.payout(id).await?.version;
                let reason = if step.account.is_empty() {
                    "rejected by operator".to_string()
                } else {
                    step.account.clone()
                };
                self.engine
                    .reject_payout(&actor, id, version, reason)
                    .await?;
            }
        }
        Ok(())
    }

    /// Balance of a user interned under `alias`, for assertions and output.
    pub async fn balance_of(&mut self, alias: &str) -> Result<Money> {
        let user = self.user(alias);
        self.engine.balance(OwnerRef::User(user)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::csv::scenario_reader::ScenarioReader;
    use rust_decimal_macros::dec;

    async fn run(scenario: &str) -> ScenarioRunner {
        let mut runner = ScenarioRunner::new(CommissionRate::new(dec!(0.1)).unwrap());
        for step in ScenarioReader::new(scenario.as_bytes()).steps() {
            runner.apply(step.unwrap()).await.unwrap();
        }
        runner
    }

    #[tokio::test]
    async fn test_full_wallet_scenario() {
        let scenario = "op, actor, order, item, qty, amount, method, account\n\
            product, farmer:bob, , tomatoes, 100, 50\n\
            deposit, buyer:alice, , , , 1000\n\
            order, buyer:alice, o1, tomatoes, 10, , delivery\n\
            confirm, farmer:bob, o1\n\
            pay, buyer:alice, o1, , , , wallet, w\n\
            transit, farmer:bob, o1\n\
            deliver, farmer:bob, o1\n\
            receive, buyer:alice, o1";
        let mut runner = run(scenario).await;

        // 1000 deposited, 500 paid; farmer gets 450, platform 50.
        assert_eq!(runner.balance_of("alice").await.unwrap(), Money::from_minor(500));
        assert_eq!(runner.balance_of("bob").await.unwrap(), Money::from_minor(450));
        assert_eq!(
            runner.engine().balance(OwnerRef::Platform).await.unwrap(),
            Money::from_minor(50)
        );
    }

    #[tokio::test]
    async fn test_mpesa_scenario_with_callback() {
        let scenario = "op, actor, order, item, qty, amount, method, account\n\
            product, farmer:bob, , maize, 20, 100\n\
            order, buyer:alice, o1, maize, 5, , pickup\n\
            pay, buyer:alice, o1, , , , mpesa, +254700000000\n\
            callback_ok, , o1\n\
            deliver, buyer:alice, o1\n\
            receive, buyer:alice, o1";
        let mut runner = run(scenario).await;

        assert_eq!(runner.balance_of("bob").await.unwrap(), Money::from_minor(450));
    }

    #[tokio::test]
    async fn test_unknown_alias_rejected() {
        let mut runner = ScenarioRunner::new(CommissionRate::new(dec!(0.1)).unwrap());
        let step = ScenarioStep {
            op: StepOp::Confirm,
            actor: "farmer:bob".to_string(),
            order: "missing".to_string(),
            item: String::new(),
            qty: None,
            amount: None,
            method: String::new(),
            account: String::new(),
        };
        assert!(matches!(
            runner.apply(step).await,
            Err(EngineError::Validation(_))
        ));
    }
}
