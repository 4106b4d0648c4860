pub mod actor;
pub mod escrow;
pub mod events;
pub mod money;
pub mod order;
pub mod payment;
pub mod payout;
pub mod ports;
pub mod product;
pub mod wallet;
