use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Error taxonomy of the transaction engine.
///
/// `DuplicateEscrow` marks a payment attempt that lost the race to fund an
/// order; no money moved for it. `LedgerImbalance` is fatal to the operation
/// that detected it: nothing is committed and the batch is left for
/// reconciliation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("caller not permitted: {0}")]
    InvalidActor(String),
    #[error("invalid transition: cannot {op} from {from}")]
    InvalidTransition { op: &'static str, from: String },
    #[error("stale version: expected {expected}, found {found}")]
    StaleVersion { expected: u64, found: u64 },
    #[error("insufficient funds: need {needed} minor units, available {available}")]
    InsufficientFunds { needed: i64, available: i64 },
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },
    #[error("gateway error: {0}")]
    Gateway(String),
    #[error("escrow already exists for order {0}")]
    DuplicateEscrow(Uuid),
    #[error("ledger imbalance: batch sums to {0} minor units")]
    LedgerImbalance(i64),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// True for optimistic-concurrency conflicts the engine may retry
    /// internally with bounded backoff.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::StaleVersion { .. })
    }
}
