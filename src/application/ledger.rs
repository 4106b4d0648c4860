use crate::domain::money::{Amount, Money};
use crate::domain::ports::WalletStoreBox;
use crate::domain::wallet::{LedgerEntry, OwnerRef, TxKind, WalletAccount, WalletTransaction};
use crate::error::{EngineError, Result};

/// Append-only double-entry balance ledger over the wallet store.
///
/// All mutations go through `credit`/`debit`/`transfer`; balances are cached
/// by the store and always equal the sum of transaction deltas.
pub struct WalletLedger {
    store: WalletStoreBox,
}

impl WalletLedger {
    pub fn new(store: WalletStoreBox) -> Self {
        Self { store }
    }

    pub async fn credit(
        &self,
        owner: OwnerRef,
        kind: TxKind,
        amount: Amount,
        reference: impl Into<String>,
    ) -> Result<WalletTransaction> {
        let applied = self
            .store
            .apply(&[LedgerEntry::credit(owner, kind, amount, reference)])
            .await?;
        Ok(applied.into_iter().next().ok_or_else(|| {
            EngineError::Validation("ledger returned empty application".to_string())
        })?)
    }

    /// Debits fail with `InsufficientFunds`; the check and the application
    /// happen in the same atomic step, with no read-then-write gap.
    pub async fn debit(
        &self,
        owner: OwnerRef,
        kind: TxKind,
        amount: Amount,
        reference: impl Into<String>,
    ) -> Result<WalletTransaction> {
        let applied = self
            .store
            .apply(&[LedgerEntry::debit(owner, kind, amount, reference)])
            .await?;
        Ok(applied.into_iter().next().ok_or_else(|| {
            EngineError::Validation("ledger returned empty application".to_string())
        })?)
    }

    /// Applies a multi-account batch as one all-or-nothing unit. Used for
    /// escrow release, where the farmer share and the platform commission
    /// must never be observable separately.
    pub async fn transfer(&self, entries: Vec<LedgerEntry>) -> Result<Vec<WalletTransaction>> {
        self.store.apply(&entries).await
    }

    pub async fn balance(&self, owner: OwnerRef) -> Result<Money> {
        Ok(self.store.account(owner).await?.balance)
    }

    pub async fn transactions(&self, owner: OwnerRef) -> Result<Vec<WalletTransaction>> {
        self.store.transactions(owner).await
    }

    pub async fn accounts(&self) -> Result<Vec<WalletAccount>> {
        self.store.accounts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::in_memory::InMemoryWalletStore;
    use uuid::Uuid;

    fn ledger() -> WalletLedger {
        WalletLedger::new(Box::new(InMemoryWalletStore::new()))
    }

    #[tokio::test]
    async fn test_credit_then_debit() {
        let ledger = ledger();
        let owner = OwnerRef::User(Uuid::new_v4());
        ledger
            .credit(owner, TxKind::Deposit, Amount::from_minor(800).unwrap(), "seed")
            .await
            .unwrap();
        ledger
            .debit(owner, TxKind::Withdrawal, Amount::from_minor(300).unwrap(), "w-1")
            .await
            .unwrap();
        assert_eq!(ledger.balance(owner).await.unwrap(), Money::from_minor(500));
    }

    #[tokio::test]
    async fn test_overdraft_rejected_atomically() {
        let ledger = ledger();
        let owner = OwnerRef::User(Uuid::new_v4());
        ledger
            .credit(owner, TxKind::Deposit, Amount::from_minor(100).unwrap(), "seed")
            .await
            .unwrap();
        let result = ledger
            .debit(owner, TxKind::Withdrawal, Amount::from_minor(101).unwrap(), "w-1")
            .await;
        assert!(matches!(
            result,
            Err(EngineError::InsufficientFunds {
                needed: 101,
                available: 100
            })
        ));
        assert_eq!(ledger.balance(owner).await.unwrap(), Money::from_minor(100));
        assert_eq!(ledger.transactions(owner).await.unwrap().len(), 1);
    }
}
