//! Posting requests.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AccountId, LedgerError, PostingGroupId, Result};

/// Default amount moved by a generated posting.
pub const DEFAULT_AMOUNT: i64 = 5;

/// Default posting currency.
pub const DEFAULT_CURRENCY: &str = "USD";

/// An instruction to move `amount` from `account_b` to `account_a`.
///
/// The amount is credited to A and debited from B. Both legs share `group`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRequest {
    /// Posting group shared by both legs.
    pub group: PostingGroupId,
    /// Credited account.
    pub account_a: AccountId,
    /// Debited account.
    pub account_b: AccountId,
    /// Signed amount deposited on A and removed from B.
    pub amount: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Opaque transaction tag.
    pub transaction: Option<String>,
    /// Opaque scheme tag.
    pub scheme: Option<String>,
}

impl PostingRequest {
    /// Create a request with no opaque tags.
    pub fn new(
        group: impl Into<PostingGroupId>,
        account_a: impl Into<AccountId>,
        account_b: impl Into<AccountId>,
        amount: i64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            account_a: account_a.into(),
            account_b: account_b.into(),
            amount,
            currency: currency.into(),
            transaction: None,
            scheme: None,
        }
    }

    /// The template every generated request starts from.
    pub fn template() -> Self {
        Self::new(1, "myacc", "youracc", DEFAULT_AMOUNT, DEFAULT_CURRENCY)
    }

    /// Both legs would land on the same account.
    pub fn is_self_transfer(&self) -> bool {
        self.account_a == self.account_b
    }

    /// Validate the request before it is submitted.
    pub fn validate(&self) -> Result<()> {
        if self.is_self_transfer() {
            return Err(LedgerError::invalid_request(format!(
                "self-transfer on account {}",
                self.account_a
            )));
        }

        for account in [&self.account_a, &self.account_b] {
            if !account.is_valid() {
                return Err(LedgerError::invalid_request(format!(
                    "invalid account id {:?}",
                    account.as_str()
                )));
            }
        }

        if self.amount.checked_neg().is_none() {
            return Err(LedgerError::invalid_request("amount cannot be negated"));
        }

        Ok(())
    }
}

impl fmt::Display for PostingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "group {}: {} {} {} <- {}",
            self.group, self.amount, self.currency, self.account_a, self.account_b
        )
    }
}
