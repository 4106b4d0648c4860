use agropay::application::engine::{CreateOrder, EngineParts, MarketEngine};
use agropay::domain::actor::{Actor, UserId};
use agropay::domain::money::{CommissionRate, Money};
use agropay::domain::order::{DeliveryMethod, Order, ProductId};
use agropay::domain::product::ProductSnapshot;
use agropay::infrastructure::gateway::sandbox_router;
use agropay::infrastructure::in_memory::{
    InMemoryAttemptStore, InMemoryEscrowStore, InMemoryOrderStore, InMemoryPayoutStore,
    InMemoryProductCatalog, InMemoryWalletStore,
};
use agropay::infrastructure::notify::MemorySink;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Engine wired with in-memory stores and sandbox gateways, with handles to
/// the catalog and event sink kept out for inspection.
pub struct Harness {
    pub engine: MarketEngine,
    pub catalog: InMemoryProductCatalog,
    pub sink: MemorySink,
}

pub fn harness() -> Harness {
    harness_with_rate(CommissionRate::new(dec!(0.1)).unwrap())
}

pub fn harness_with_rate(rate: CommissionRate) -> Harness {
    let catalog = InMemoryProductCatalog::new();
    let sink = MemorySink::new();
    let parts = EngineParts {
        orders: Box::new(InMemoryOrderStore::new()),
        escrows: Box::new(InMemoryEscrowStore::new()),
        wallets: Box::new(InMemoryWalletStore::new()),
        payouts: Box::new(InMemoryPayoutStore::new()),
        attempts: Box::new(InMemoryAttemptStore::new()),
        catalog: Box::new(catalog.clone()),
        gateways: sandbox_router(),
        notifier: Box::new(sink.clone()),
    };
    Harness {
        engine: MarketEngine::new(parts, rate),
        catalog,
        sink,
    }
}

pub async fn seed_product(
    harness: &Harness,
    farmer: UserId,
    unit_price_minor: i64,
    stock: u32,
) -> ProductId {
    let id = Uuid::new_v4();
    harness
        .catalog
        .add(ProductSnapshot {
            id,
            farmer,
            unit_price: Money::from_minor(unit_price_minor),
            available: stock,
        })
        .await;
    id
}

/// Creates a pending order for `quantity` units of a freshly seeded product.
pub async fn pending_order(
    harness: &Harness,
    buyer: UserId,
    farmer: UserId,
    unit_price_minor: i64,
    quantity: u32,
) -> Order {
    let product = seed_product(harness, farmer, unit_price_minor, quantity * 10).await;
    harness
        .engine
        .create_order(
            &Actor::Buyer(buyer),
            CreateOrder {
                product,
                quantity,
                delivery_method: DeliveryMethod::Delivery,
            },
        )
        .await
        .unwrap()
}
