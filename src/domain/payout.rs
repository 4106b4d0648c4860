use crate::domain::actor::UserId;
use crate::domain::money::{Amount, Money};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PayoutId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    Mpesa,
    Bank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processed,
    Rejected,
}

/// Farmer-initiated withdrawal of wallet balance to an external rail.
///
/// Creating a request does not debit the wallet; the debit happens at
/// approval time, atomically against the live balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: PayoutId,
    pub farmer: UserId,
    pub amount: Money,
    pub method: PayoutMethod,
    pub account_details: String,
    pub status: PayoutStatus,
    /// Gateway disbursement reference, set once processed.
    pub reference: Option<String>,
    /// Rejection reason, if any.
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl PayoutRequest {
    pub fn new(
        farmer: UserId,
        amount: Amount,
        method: PayoutMethod,
        account_details: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            farmer,
            amount: amount.value(),
            method,
            account_details: account_details.into(),
            status: PayoutStatus::Pending,
            reference: None,
            reason: None,
            created_at: Utc::now(),
            processed_at: None,
            version: 0,
        }
    }

    fn transition_err(&self, op: &'static str) -> EngineError {
        EngineError::InvalidTransition {
            op,
            from: format!("{:?}", self.status).to_lowercase(),
        }
    }

    pub fn process(&mut self, reference: impl Into<String>) -> Result<()> {
        match self.status {
            PayoutStatus::Pending => {
                self.status = PayoutStatus::Processed;
                self.reference = Some(reference.into());
                self.processed_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(self.transition_err("process")),
        }
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> Result<()> {
        match self.status {
            PayoutStatus::Pending => {
                self.status = PayoutStatus::Rejected;
                self.reason = Some(reason.into());
                self.processed_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(self.transition_err("reject")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PayoutRequest {
        PayoutRequest::new(
            Uuid::new_v4(),
            Amount::from_minor(1000).unwrap(),
            PayoutMethod::Mpesa,
            "+254700000000",
        )
    }

    #[test]
    fn test_process_from_pending_only() {
        let mut payout = sample();
        payout.process("MPS123").unwrap();
        assert_eq!(payout.status, PayoutStatus::Processed);
        assert_eq!(payout.reference.as_deref(), Some("MPS123"));
        assert!(payout.process("MPS124").is_err());
        assert!(payout.reject("late").is_err());
    }

    #[test]
    fn test_reject_records_reason() {
        let mut payout = sample();
        payout.reject("suspicious account details").unwrap();
        assert_eq!(payout.status, PayoutStatus::Rejected);
        assert_eq!(payout.reason.as_deref(), Some("suspicious account details"));
        assert!(payout.processed_at.is_some());
    }
}
