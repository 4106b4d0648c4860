use crate::domain::escrow::Escrow;
use crate::domain::events::EngineEvent;
use crate::domain::order::{EscrowId, Order, OrderId, ProductId};
use crate::domain::payment::{AttemptStatus, GatewayCharge, PayerDetails, PaymentAttempt, PaymentMethod};
use crate::domain::payout::{PayoutId, PayoutMethod, PayoutRequest};
use crate::domain::product::ProductSnapshot;
use crate::domain::wallet::{LedgerEntry, OwnerRef, WalletAccount, WalletTransaction};
use crate::error::Result;
use async_trait::async_trait;

/// Versioned order storage. `update` is compare-and-swap: it succeeds only
/// when the stored version matches the version carried by the argument, and
/// returns the stored copy with the version bumped.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: Order) -> Result<Order>;
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;
    async fn update(&self, order: Order) -> Result<Order>;
}

#[async_trait]
pub trait EscrowStore: Send + Sync {
    /// Fails with `DuplicateEscrow` if the order already has an escrow. This
    /// uniqueness barrier is what serializes concurrent payment attempts.
    async fn insert(&self, escrow: Escrow) -> Result<Escrow>;
    async fn get(&self, id: EscrowId) -> Result<Option<Escrow>>;
    async fn get_by_order(&self, order: OrderId) -> Result<Option<Escrow>>;
    /// Compare-and-swap, as for orders.
    async fn update(&self, escrow: Escrow) -> Result<Escrow>;
    /// Removes an escrow whose funding was aborted before any money moved.
    /// Only ever called on a `held` escrow the engine just inserted.
    async fn remove(&self, id: EscrowId) -> Result<()>;
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn account(&self, owner: OwnerRef) -> Result<WalletAccount>;
    async fn accounts(&self) -> Result<Vec<WalletAccount>>;
    /// Applies a batch of entries as one all-or-nothing unit: every debit is
    /// checked against the live balance inside the same atomic step that
    /// applies it, and either all entries land or none do.
    async fn apply(&self, entries: &[LedgerEntry]) -> Result<Vec<WalletTransaction>>;
    async fn transactions(&self, owner: OwnerRef) -> Result<Vec<WalletTransaction>>;
}

#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn insert(&self, payout: PayoutRequest) -> Result<PayoutRequest>;
    async fn get(&self, id: PayoutId) -> Result<Option<PayoutRequest>>;
    /// Compare-and-swap, as for orders.
    async fn update(&self, payout: PayoutRequest) -> Result<PayoutRequest>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn insert(&self, attempt: PaymentAttempt) -> Result<()>;
    async fn get(&self, gateway_ref: &str) -> Result<Option<PaymentAttempt>>;
    /// Marks an attempt settled or failed. A pending attempt transitions at
    /// most once; marking an already settled attempt leaves it unchanged and
    /// returns the stored record, so replays stay no-ops.
    async fn mark(&self, gateway_ref: &str, status: AttemptStatus) -> Result<PaymentAttempt>;
}

/// Catalog collaborator. Stock is reserved atomically with order creation;
/// the engine releases the reservation again when an order is cancelled or
/// rejected before completion.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn reserve(&self, product: ProductId, quantity: u32) -> Result<ProductSnapshot>;
    async fn release(&self, product: ProductId, quantity: u32) -> Result<()>;
}

/// The seam to an external payment rail. The engine depends on this, never
/// the reverse; confirmations come back through the engine's callback
/// operation, not through this trait.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, order: &Order, payer: &PayerDetails) -> Result<GatewayCharge>;
    /// Outbound disbursement for an approved payout; returns the rail's
    /// reference for the transfer.
    async fn disburse(&self, payout: &PayoutRequest) -> Result<String>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: EngineEvent);
}

pub type OrderStoreBox = Box<dyn OrderStore>;
pub type EscrowStoreBox = Box<dyn EscrowStore>;
pub type WalletStoreBox = Box<dyn WalletStore>;
pub type PayoutStoreBox = Box<dyn PayoutStore>;
pub type AttemptStoreBox = Box<dyn AttemptStore>;
pub type ProductCatalogBox = Box<dyn ProductCatalog>;
pub type PaymentGatewayBox = Box<dyn PaymentGateway>;
pub type NotificationSinkBox = Box<dyn NotificationSink>;

/// One adapter per rail, selected by dispatch on the closed method enums.
pub struct GatewayRouter {
    mpesa: PaymentGatewayBox,
    wallet: PaymentGatewayBox,
    card: PaymentGatewayBox,
    onchain: PaymentGatewayBox,
    bank: PaymentGatewayBox,
}

impl GatewayRouter {
    pub fn new(
        mpesa: PaymentGatewayBox,
        wallet: PaymentGatewayBox,
        card: PaymentGatewayBox,
        onchain: PaymentGatewayBox,
        bank: PaymentGatewayBox,
    ) -> Self {
        Self {
            mpesa,
            wallet,
            card,
            onchain,
            bank,
        }
    }

    pub fn checkout(&self, method: PaymentMethod) -> &dyn PaymentGateway {
        match method {
            PaymentMethod::Mpesa => self.mpesa.as_ref(),
            PaymentMethod::Wallet => self.wallet.as_ref(),
            PaymentMethod::Card => self.card.as_ref(),
            PaymentMethod::Onchain => self.onchain.as_ref(),
        }
    }

    pub fn payout(&self, method: PayoutMethod) -> &dyn PaymentGateway {
        match method {
            PayoutMethod::Mpesa => self.mpesa.as_ref(),
            PayoutMethod::Bank => self.bank.as_ref(),
        }
    }
}
