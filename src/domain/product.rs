use crate::domain::actor::UserId;
use crate::domain::money::Money;
use crate::domain::order::ProductId;
use serde::{Deserialize, Serialize};

/// What the engine needs to know about a product at order time, as returned
/// by the catalog collaborator when stock is reserved: who sells it, at what
/// unit price, and how much remains after the reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub farmer: UserId,
    pub unit_price: Money,
    pub available: u32,
}
