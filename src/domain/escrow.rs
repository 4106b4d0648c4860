use crate::domain::money::Money;
use crate::domain::order::{EscrowId, OrderId};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Held,
    Released,
    Refunded,
}

/// Funds captured from a payer but not yet released to the payee.
///
/// An escrow transitions `held -> released` or `held -> refunded` exactly
/// once; both target states are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,
    pub order: OrderId,
    pub amount: Money,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Escrow {
    pub fn new(order: OrderId, amount: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            order,
            amount,
            status: EscrowStatus::Held,
            created_at: Utc::now(),
            released_at: None,
            version: 0,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status != EscrowStatus::Held
    }

    pub fn release(&mut self) -> Result<()> {
        match self.status {
            EscrowStatus::Held => {
                self.status = EscrowStatus::Released;
                self.released_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(EngineError::InvalidTransition {
                op: "release",
                from: format!("{:?}", self.status).to_lowercase(),
            }),
        }
    }

    pub fn refund(&mut self) -> Result<()> {
        match self.status {
            EscrowStatus::Held => {
                self.status = EscrowStatus::Refunded;
                self.released_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(EngineError::InvalidTransition {
                op: "refund",
                from: format!("{:?}", self.status).to_lowercase(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_exactly_once() {
        let mut escrow = Escrow::new(Uuid::new_v4(), Money::from_minor(500));
        escrow.release().unwrap();
        assert_eq!(escrow.status, EscrowStatus::Released);
        assert!(escrow.released_at.is_some());
        assert!(escrow.release().is_err());
        assert!(escrow.refund().is_err());
    }

    #[test]
    fn test_refund_is_terminal() {
        let mut escrow = Escrow::new(Uuid::new_v4(), Money::from_minor(500));
        escrow.refund().unwrap();
        assert_eq!(escrow.status, EscrowStatus::Refunded);
        assert!(escrow.release().is_err());
    }
}
