//! Settlement seam
//!
//! The marketplace never moves value itself. A purchase asks the settlement
//! layer to transfer the price from buyer to seller and only records the
//! sale if that transfer succeeded. Implementations must be all-or-nothing:
//! an error means no balance changed.

use crate::types::{AccountId, Amount};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

/// Settlement failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettlementError {
    /// Payer cannot cover the amount
    #[error("Insufficient funds in {account}: needed {needed}, available {available}")]
    InsufficientFunds {
        /// Paying account
        account: AccountId,
        /// Requested amount
        needed: Amount,
        /// Current balance
        available: Amount,
    },

    /// Account is not known to the settlement layer
    #[error("Unknown account: {0}")]
    UnknownAccount(AccountId),

    /// Settlement layer could not be reached or refused the request
    #[error("Settlement unavailable: {0}")]
    Unavailable(String),
}

/// External value-transfer authority
#[async_trait]
pub trait Settlement: Send + Sync {
    /// Move `amount` from `from` to `to` atomically
    async fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), SettlementError>;

    /// Current balance of `account`
    async fn balance(&self, account: &AccountId) -> Result<Amount, SettlementError>;
}

/// In-process balance book
///
/// Accounts are opened with `deposit`. Transfers to unknown accounts open
/// them; transfers from unknown accounts fail.
#[derive(Debug, Default)]
pub struct InMemorySettlement {
    balances: Mutex<HashMap<AccountId, Amount>>,
}

impl InMemorySettlement {
    /// Empty book
    pub fn new() -> Self {
        Self::default()
    }

    /// Book with opening balances
    pub fn with_balances<I>(balances: I) -> Self
    where
        I: IntoIterator<Item = (AccountId, Amount)>,
    {
        Self {
            balances: Mutex::new(balances.into_iter().collect()),
        }
    }

    /// Credit an account, opening it if needed
    pub fn deposit(&self, account: AccountId, amount: Amount) {
        *self.balances.lock().entry(account).or_insert(Decimal::ZERO) += amount;
    }
}

#[async_trait]
impl Settlement for InMemorySettlement {
    async fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), SettlementError> {
        let mut balances = self.balances.lock();

        let available = *balances
            .get(from)
            .ok_or_else(|| SettlementError::UnknownAccount(from.clone()))?;
        if available < amount {
            return Err(SettlementError::InsufficientFunds {
                account: from.clone(),
                needed: amount,
                available,
            });
        }

        balances.insert(from.clone(), available - amount);
        *balances.entry(to.clone()).or_insert(Decimal::ZERO) += amount;

        tracing::debug!(%from, %to, %amount, "Transfer settled");
        Ok(())
    }

    async fn balance(&self, account: &AccountId) -> Result<Amount, SettlementError> {
        self.balances
            .lock()
            .get(account)
            .copied()
            .ok_or_else(|| SettlementError::UnknownAccount(account.clone()))
    }
}
