//! Ledger entries for double-entry postings.

use chrono::NaiveDateTime;
use ledgerbench_common::{AccountId, LedgerError, PostingGroupId, PostingRequest, Result};
use serde::{Deserialize, Serialize};

use crate::balance::BalanceSnapshot;

/// A committed row of the `accounts` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Account this leg belongs to.
    pub account_id: AccountId,
    /// Posting the leg is part of.
    pub posting_group_id: PostingGroupId,
    /// Per-account sequence number.
    pub causality_id: i64,
    /// Signed delta applied to the account.
    pub amount: i64,
    /// Running balance after this entry.
    pub balance: i64,
    /// Currency code.
    pub currency: Option<String>,
    /// Insert time.
    pub created: Option<NaiveDateTime>,
    /// Value date.
    pub value_date: Option<NaiveDateTime>,
    /// Opaque transaction tag.
    pub transaction_id: Option<String>,
    /// Opaque scheme tag.
    pub scheme: Option<String>,
}

/// One leg about to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    /// Account the leg is written for.
    pub account_id: AccountId,
    /// Causality ID, one past the resolved prior.
    pub causality_id: i64,
    /// Signed amount.
    pub amount: i64,
    /// Balance after the leg.
    pub balance: i64,
}

impl NewEntry {
    /// Build the leg that follows `prior` on `account_id`.
    pub fn following(account_id: AccountId, prior: BalanceSnapshot, amount: i64) -> Result<Self> {
        let (causality_id, balance) = prior.advance(amount).ok_or_else(|| {
            LedgerError::invalid_request(format!(
                "balance or causality overflow on account {}",
                account_id
            ))
        })?;

        Ok(Self {
            account_id,
            causality_id,
            amount,
            balance,
        })
    }

    /// Materialize the committed row.
    pub fn into_entry(self, request: &PostingRequest, now: NaiveDateTime) -> LedgerEntry {
        LedgerEntry {
            account_id: self.account_id,
            posting_group_id: request.group,
            causality_id: self.causality_id,
            amount: self.amount,
            balance: self.balance,
            currency: Some(request.currency.clone()),
            created: Some(now),
            value_date: Some(now),
            transaction_id: request.transaction.clone(),
            scheme: request.scheme.clone(),
        }
    }
}

/// The two legs of one posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingLegs {
    /// Leg on account A.
    pub credit: NewEntry,
    /// Leg on account B.
    pub debit: NewEntry,
}

impl PostingLegs {
    /// Build both legs of `request` on top of the resolved priors.
    pub fn build(
        request: &PostingRequest,
        prior_a: BalanceSnapshot,
        prior_b: BalanceSnapshot,
    ) -> Result<Self> {
        let debit_amount = request
            .amount
            .checked_neg()
            .ok_or_else(|| LedgerError::invalid_request("amount cannot be negated"))?;

        Ok(Self {
            credit: NewEntry::following(request.account_a.clone(), prior_a, request.amount)?,
            debit: NewEntry::following(request.account_b.clone(), prior_b, debit_amount)?,
        })
    }
}
