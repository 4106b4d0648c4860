use crate::domain::wallet::WalletAccount;
use crate::error::Result;
use std::io::Write;

/// Writes final wallet balances as CSV, sorted by owner for deterministic
/// output.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_accounts(&mut self, mut accounts: Vec<WalletAccount>) -> Result<()> {
        accounts.sort_by_key(|account| account.owner.to_string());
        self.writer.write_record(["owner", "balance"])?;
        for account in accounts {
            self.writer.write_record([
                account.owner.to_string(),
                account.balance.minor().to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Money;
    use crate::domain::wallet::OwnerRef;
    use uuid::Uuid;

    #[test]
    fn test_writer_output_sorted_and_in_minor_units() {
        let user = OwnerRef::User(Uuid::nil());
        let accounts = vec![
            WalletAccount {
                owner: OwnerRef::Platform,
                balance: Money::from_minor(50),
                version: 3,
            },
            WalletAccount {
                owner: user,
                balance: Money::from_minor(450),
                version: 7,
            },
        ];
        let mut buffer = Vec::new();
        BalanceWriter::new(&mut buffer)
            .write_accounts(accounts)
            .unwrap();
        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "owner,balance");
        // The nil uuid sorts before "platform".
        assert_eq!(lines[1], format!("{},450", Uuid::nil()));
        assert_eq!(lines[2], "platform,50");
    }
}
