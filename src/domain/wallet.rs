use crate::domain::actor::UserId;
use crate::domain::money::{Amount, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Who a wallet belongs to: a marketplace user (farmer or buyer) or the
/// platform itself, which accrues commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerRef {
    User(UserId),
    Platform,
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerRef::User(id) => write!(f, "{id}"),
            OwnerRef::Platform => write!(f, "platform"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Deposit,
    Withdrawal,
    Payment,
    EscrowRelease,
    Commission,
    Refund,
}

/// Cached per-account balance. The balance is never mutated directly; it is
/// maintained by the store as the running sum of transaction deltas, which
/// remain the sole source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub owner: OwnerRef,
    pub balance: Money,
    pub version: u64,
}

impl WalletAccount {
    pub fn new(owner: OwnerRef) -> Self {
        Self {
            owner,
            balance: Money::ZERO,
            version: 0,
        }
    }
}

/// One append-only ledger row. Never updated or deleted after insert; this is
/// the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub owner: OwnerRef,
    pub kind: TxKind,
    /// Signed delta in minor units: positive credits, negative debits.
    pub delta: Money,
    /// Related order, escrow, payout or gateway reference.
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

/// A requested ledger mutation. Batches of entries are applied atomically:
/// either every entry lands (and its transaction row is appended) or none do.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub owner: OwnerRef,
    pub kind: TxKind,
    pub delta: Money,
    pub reference: String,
}

impl LedgerEntry {
    pub fn credit(owner: OwnerRef, kind: TxKind, amount: Amount, reference: impl Into<String>) -> Self {
        Self {
            owner,
            kind,
            delta: amount.value(),
            reference: reference.into(),
        }
    }

    pub fn debit(owner: OwnerRef, kind: TxKind, amount: Amount, reference: impl Into<String>) -> Self {
        Self {
            owner,
            kind,
            delta: -amount.value(),
            reference: reference.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_constructors_sign_deltas() {
        let owner = OwnerRef::Platform;
        let amount = Amount::from_minor(100).unwrap();
        let credit = LedgerEntry::credit(owner, TxKind::Commission, amount, "o-1");
        let debit = LedgerEntry::debit(owner, TxKind::Withdrawal, amount, "o-1");
        assert_eq!(credit.delta, Money::from_minor(100));
        assert_eq!(debit.delta, Money::from_minor(-100));
    }

    #[test]
    fn test_owner_display() {
        assert_eq!(OwnerRef::Platform.to_string(), "platform");
        let id = Uuid::new_v4();
        assert_eq!(OwnerRef::User(id).to_string(), id.to_string());
    }

    #[test]
    fn test_tx_kind_serializes_snake_case() {
        let json = serde_json::to_string(&TxKind::EscrowRelease).unwrap();
        assert_eq!(json, "\"escrow_release\"");
    }
}
