use crate::domain::escrow::Escrow;
use crate::domain::order::{EscrowId, Order, OrderId, ProductId};
use crate::domain::payment::{AttemptStatus, PaymentAttempt};
use crate::domain::payout::{PayoutId, PayoutRequest};
use crate::domain::ports::{
    AttemptStore, EscrowStore, OrderStore, PayoutStore, ProductCatalog, WalletStore,
};
use crate::domain::product::ProductSnapshot;
use crate::domain::wallet::{LedgerEntry, OwnerRef, WalletAccount, WalletTransaction};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

fn cas_check(expected: u64, found: u64) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(EngineError::StaleVersion { expected, found })
    }
}

/// Thread-safe in-memory order arena with per-row optimistic concurrency.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<Order> {
        let mut orders = self.orders.write().await;
        orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id).cloned())
    }

    async fn update(&self, order: Order) -> Result<Order> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order.id)
            .ok_or_else(|| EngineError::NotFound(format!("order {}", order.id)))?;
        cas_check(order.version, stored.version)?;
        let mut next = order;
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }
}

#[derive(Default)]
struct EscrowInner {
    by_id: HashMap<EscrowId, Escrow>,
    by_order: HashMap<OrderId, EscrowId>,
}

/// Escrow arena. The one-escrow-per-order index doubles as the uniqueness
/// barrier for concurrent payment settlement.
#[derive(Default, Clone)]
pub struct InMemoryEscrowStore {
    inner: Arc<RwLock<EscrowInner>>,
}

impl InMemoryEscrowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EscrowStore for InMemoryEscrowStore {
    async fn insert(&self, escrow: Escrow) -> Result<Escrow> {
        let mut inner = self.inner.write().await;
        if inner.by_order.contains_key(&escrow.order) {
            return Err(EngineError::DuplicateEscrow(escrow.order));
        }
        inner.by_order.insert(escrow.order, escrow.id);
        inner.by_id.insert(escrow.id, escrow.clone());
        Ok(escrow)
    }

    async fn get(&self, id: EscrowId) -> Result<Option<Escrow>> {
        let inner = self.inner.read().await;
        Ok(inner.by_id.get(&id).cloned())
    }

    async fn get_by_order(&self, order: OrderId) -> Result<Option<Escrow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_order
            .get(&order)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn update(&self, escrow: Escrow) -> Result<Escrow> {
        let mut inner = self.inner.write().await;
        let stored = inner
            .by_id
            .get_mut(&escrow.id)
            .ok_or_else(|| EngineError::NotFound(format!("escrow {}", escrow.id)))?;
        cas_check(escrow.version, stored.version)?;
        let mut next = escrow;
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn remove(&self, id: EscrowId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(escrow) = inner.by_id.remove(&id) {
            inner.by_order.remove(&escrow.order);
        }
        Ok(())
    }
}

#[derive(Default)]
struct WalletInner {
    accounts: HashMap<OwnerRef, WalletAccount>,
    log: Vec<WalletTransaction>,
}

/// Wallet arena: cached balances plus the append-only transaction log that
/// remains their source of truth. Batches are applied under one write guard,
/// so a multi-account application is never partially observable.
#[derive(Default, Clone)]
pub struct InMemoryWalletStore {
    inner: Arc<RwLock<WalletInner>>,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn account(&self, owner: OwnerRef) -> Result<WalletAccount> {
        let inner = self.inner.read().await;
        Ok(inner
            .accounts
            .get(&owner)
            .cloned()
            .unwrap_or_else(|| WalletAccount::new(owner)))
    }

    async fn accounts(&self) -> Result<Vec<WalletAccount>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.values().cloned().collect())
    }

    async fn apply(&self, entries: &[LedgerEntry]) -> Result<Vec<WalletTransaction>> {
        let mut inner = self.inner.write().await;

        // Validate the whole batch against live balances before touching
        // anything, so a failing debit leaves no entry applied.
        let mut projected: HashMap<OwnerRef, i64> = HashMap::new();
        for entry in entries {
            let current = projected.entry(entry.owner).or_insert_with(|| {
                inner
                    .accounts
                    .get(&entry.owner)
                    .map(|a| a.balance.minor())
                    .unwrap_or(0)
            });
            let next = *current + entry.delta.minor();
            if next < 0 {
                return Err(EngineError::InsufficientFunds {
                    needed: -entry.delta.minor(),
                    available: *current,
                });
            }
            *current = next;
        }

        let mut applied = Vec::with_capacity(entries.len());
        for entry in entries {
            let account = inner
                .accounts
                .entry(entry.owner)
                .or_insert_with(|| WalletAccount::new(entry.owner));
            account.balance += entry.delta;
            account.version += 1;
            let tx = WalletTransaction {
                id: Uuid::new_v4(),
                owner: entry.owner,
                kind: entry.kind,
                delta: entry.delta,
                reference: entry.reference.clone(),
                created_at: Utc::now(),
            };
            inner.log.push(tx.clone());
            applied.push(tx);
        }
        Ok(applied)
    }

    async fn transactions(&self, owner: OwnerRef) -> Result<Vec<WalletTransaction>> {
        let inner = self.inner.read().await;
        Ok(inner
            .log
            .iter()
            .filter(|tx| tx.owner == owner)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryPayoutStore {
    payouts: Arc<RwLock<HashMap<PayoutId, PayoutRequest>>>,
}

impl InMemoryPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutStore for InMemoryPayoutStore {
    async fn insert(&self, payout: PayoutRequest) -> Result<PayoutRequest> {
        let mut payouts = self.payouts.write().await;
        payouts.insert(payout.id, payout.clone());
        Ok(payout)
    }

    async fn get(&self, id: PayoutId) -> Result<Option<PayoutRequest>> {
        let payouts = self.payouts.read().await;
        Ok(payouts.get(&id).cloned())
    }

    async fn update(&self, payout: PayoutRequest) -> Result<PayoutRequest> {
        let mut payouts = self.payouts.write().await;
        let stored = payouts
            .get_mut(&payout.id)
            .ok_or_else(|| EngineError::NotFound(format!("payout {}", payout.id)))?;
        cas_check(payout.version, stored.version)?;
        let mut next = payout;
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }
}

#[derive(Default, Clone)]
pub struct InMemoryAttemptStore {
    attempts: Arc<RwLock<HashMap<String, PaymentAttempt>>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn insert(&self, attempt: PaymentAttempt) -> Result<()> {
        let mut attempts = self.attempts.write().await;
        if attempts.contains_key(&attempt.gateway_ref) {
            return Err(EngineError::Validation(format!(
                "gateway ref already issued: {}",
                attempt.gateway_ref
            )));
        }
        attempts.insert(attempt.gateway_ref.clone(), attempt);
        Ok(())
    }

    async fn get(&self, gateway_ref: &str) -> Result<Option<PaymentAttempt>> {
        let attempts = self.attempts.read().await;
        Ok(attempts.get(gateway_ref).cloned())
    }

    async fn mark(&self, gateway_ref: &str, status: AttemptStatus) -> Result<PaymentAttempt> {
        let mut attempts = self.attempts.write().await;
        let stored = attempts
            .get_mut(gateway_ref)
            .ok_or_else(|| EngineError::NotFound(format!("payment attempt {gateway_ref}")))?;
        if stored.status == AttemptStatus::Pending {
            stored.status = status;
        }
        Ok(stored.clone())
    }
}

/// Stand-in for the catalog collaborator: seeded products with reservable
/// stock. Reservation and release are atomic against the live count.
#[derive(Default, Clone)]
pub struct InMemoryProductCatalog {
    products: Arc<RwLock<HashMap<ProductId, ProductSnapshot>>>,
}

impl InMemoryProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, product: ProductSnapshot) {
        let mut products = self.products.write().await;
        products.insert(product.id, product);
    }

    pub async fn available(&self, product: ProductId) -> Option<u32> {
        let products = self.products.read().await;
        products.get(&product).map(|p| p.available)
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn reserve(&self, product: ProductId, quantity: u32) -> Result<ProductSnapshot> {
        let mut products = self.products.write().await;
        let stored = products
            .get_mut(&product)
            .ok_or_else(|| EngineError::NotFound(format!("product {product}")))?;
        if stored.available < quantity {
            return Err(EngineError::InsufficientStock {
                requested: quantity,
                available: stored.available,
            });
        }
        stored.available -= quantity;
        Ok(stored.clone())
    }

    async fn release(&self, product: ProductId, quantity: u32) -> Result<()> {
        let mut products = self.products.write().await;
        if let Some(stored) = products.get_mut(&product) {
            stored.available += quantity;
        }
        Ok(())
    }
}
