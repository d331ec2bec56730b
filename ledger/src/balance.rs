//! Running balance resolution.

use std::fmt;
use std::str::FromStr;

use ledgerbench_common::{AccountId, LedgerError, PostingRequest, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::store::LedgerTx;

/// Position of an account's newest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Causality ID of the newest entry (0 when the account has no history).
    pub causality_id: i64,
    /// Balance after the newest entry.
    pub balance: i64,
}

impl BalanceSnapshot {
    /// Position of an account with no entries.
    pub const ZERO: Self = Self {
        causality_id: 0,
        balance: 0,
    };

    /// Create a snapshot.
    pub fn new(causality_id: i64, balance: i64) -> Self {
        Self {
            causality_id,
            balance,
        }
    }

    /// Causality ID and balance of the entry that applies `amount` next.
    pub fn advance(&self, amount: i64) -> Option<(i64, i64)> {
        Some((
            self.causality_id.checked_add(1)?,
            self.balance.checked_add(amount)?,
        ))
    }
}

/// Whether postings carry a running balance per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BalanceMode {
    /// Read each account's newest entry before writing.
    #[default]
    Running,
    /// Skip the read; causality IDs are random and balances synthesized.
    Disabled,
}

impl BalanceMode {
    /// Mode selected by a `--no-running-balance` style flag.
    pub fn from_disabled_flag(disabled: bool) -> Self {
        if disabled {
            BalanceMode::Disabled
        } else {
            BalanceMode::Running
        }
    }

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            BalanceMode::Running => "running",
            BalanceMode::Disabled => "disabled",
        }
    }
}

impl fmt::Display for BalanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BalanceMode {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(BalanceMode::Running),
            "disabled" => Ok(BalanceMode::Disabled),
            other => Err(LedgerError::ConfigurationError(format!(
                "unknown balance mode: {}",
                other
            ))),
        }
    }
}

/// Where a posting gets the prior position of its two accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorBalances {
    /// Query both accounts inside the transaction.
    Resolve,
    /// Fixed values chosen before the transaction starts.
    Synthesized {
        a: BalanceSnapshot,
        b: BalanceSnapshot,
    },
}

impl PriorBalances {
    /// Pick the prior source for one request.
    ///
    /// Synthesized values are drawn here, once, so every retry of the same
    /// posting writes the same rows.
    pub fn for_mode<R: Rng + ?Sized>(
        mode: BalanceMode,
        request: &PostingRequest,
        rng: &mut R,
    ) -> Self {
        match mode {
            BalanceMode::Running => PriorBalances::Resolve,
            BalanceMode::Disabled => {
                let (a, b) = synthesize(request, rng);
                PriorBalances::Synthesized { a, b }
            }
        }
    }

    /// Resolve the priors of both accounts of `request`.
    pub async fn resolve(
        &self,
        tx: &mut dyn LedgerTx,
        request: &PostingRequest,
    ) -> Result<(BalanceSnapshot, BalanceSnapshot)> {
        match *self {
            PriorBalances::Resolve => {
                let a = last_balance(tx, &request.account_a).await?;
                let b = last_balance(tx, &request.account_b).await?;
                Ok((a, b))
            }
            PriorBalances::Synthesized { a, b } => Ok((a, b)),
        }
    }
}

/// Newest position of `account`, or zero when it has no entries.
pub async fn last_balance(tx: &mut dyn LedgerTx, account: &AccountId) -> Result<BalanceSnapshot> {
    Ok(tx.last_entry(account).await?.unwrap_or(BalanceSnapshot::ZERO))
}

/// Priors for a posting without a running balance.
///
/// A's prior is `-amount` and B's is `+amount`, so both written legs carry a
/// balance of zero. Causality IDs are random and leave room for the `+1`.
pub fn synthesize<R: Rng + ?Sized>(
    request: &PostingRequest,
    rng: &mut R,
) -> (BalanceSnapshot, BalanceSnapshot) {
    let a = BalanceSnapshot::new(rng.gen_range(0..i64::MAX), request.amount.wrapping_neg());
    let b = BalanceSnapshot::new(rng.gen_range(0..i64::MAX), request.amount);
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_advance() {
        assert_eq!(BalanceSnapshot::ZERO.advance(5), Some((1, 5)));
        assert_eq!(BalanceSnapshot::new(4, -5).advance(5), Some((5, 0)));
        assert_eq!(BalanceSnapshot::new(i64::MAX, 0).advance(1), None);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("running".parse::<BalanceMode>().unwrap(), BalanceMode::Running);
        assert_eq!(BalanceMode::from_disabled_flag(true), BalanceMode::Disabled);
        assert!("sometimes".parse::<BalanceMode>().is_err());
    }

    #[test]
    fn test_synthesized_priors() {
        let mut rng = StdRng::seed_from_u64(7);
        let req = PostingRequest::new(1, "a", "b", 12, "USD");

        let priors = PriorBalances::for_mode(BalanceMode::Disabled, &req, &mut rng);
        let PriorBalances::Synthesized { a, b } = priors else {
            panic!("expected synthesized priors");
        };

        assert_eq!(a.balance, -12);
        assert_eq!(b.balance, 12);
        assert!(a.causality_id < i64::MAX);
        assert!(b.causality_id < i64::MAX);
    }

    #[test]
    fn test_running_mode_resolves() {
        let mut rng = StdRng::seed_from_u64(7);
        let req = PostingRequest::template();
        assert_eq!(
            PriorBalances::for_mode(BalanceMode::Running, &req, &mut rng),
            PriorBalances::Resolve
        );
    }
}
