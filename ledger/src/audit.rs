//! Ledger invariant audit.

use std::collections::{BTreeMap, HashSet};

use ledgerbench_common::{AccountId, PostingGroupId};
use serde::Serialize;

use crate::balance::BalanceMode;
use crate::journal::LedgerEntry;

/// A broken ledger invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Violation {
    /// Causality IDs of an account are not strictly increasing.
    CausalityOrder {
        account: AccountId,
        previous: i64,
        current: i64,
    },
    /// Entry balance is not the prior balance plus its amount.
    BrokenChain {
        account: AccountId,
        causality_id: i64,
        expected: i64,
        actual: i64,
    },
    /// Legs of a posting group do not sum to zero.
    Unbalanced { group: PostingGroupId, sum: i128 },
    /// A posting group with a leg missing.
    OddLegCount { group: PostingGroupId, legs: usize },
}

/// Result of auditing the ledger.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    /// Entries inspected.
    pub entries: usize,
    /// Distinct accounts.
    pub accounts: usize,
    /// Distinct posting groups.
    pub groups: usize,
    /// Everything that failed.
    pub violations: Vec<Violation>,
}

impl AuditReport {
    /// No invariant is broken.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Default)]
struct GroupTotals {
    legs: usize,
    sum: i128,
}

/// Check the ledger invariants over `entries`.
///
/// Per account, causality IDs must strictly increase. With a running
/// balance, each entry's balance must equal the previous one (0 for the
/// first) plus its amount. Every posting group must net to zero with an even
/// number of legs; groups shared by several postings are checked as a whole.
pub fn audit(entries: &[LedgerEntry], mode: BalanceMode) -> AuditReport {
    let mut sorted: Vec<&LedgerEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| {
        a.account_id
            .cmp(&b.account_id)
            .then(a.causality_id.cmp(&b.causality_id))
    });

    let mut report = AuditReport {
        entries: entries.len(),
        ..AuditReport::default()
    };
    let mut accounts = HashSet::new();
    let mut groups: BTreeMap<PostingGroupId, GroupTotals> = BTreeMap::new();
    let mut previous: Option<&LedgerEntry> = None;

    for entry in sorted {
        let same_account = previous.filter(|p| p.account_id == entry.account_id);

        if let Some(prev) = same_account {
            if entry.causality_id <= prev.causality_id {
                report.violations.push(Violation::CausalityOrder {
                    account: entry.account_id.clone(),
                    previous: prev.causality_id,
                    current: entry.causality_id,
                });
            }
        }

        if mode == BalanceMode::Running {
            let prior = same_account.map_or(0, |p| p.balance);
            let expected = prior.wrapping_add(entry.amount);
            if expected != entry.balance {
                report.violations.push(Violation::BrokenChain {
                    account: entry.account_id.clone(),
                    causality_id: entry.causality_id,
                    expected,
                    actual: entry.balance,
                });
            }
        }

        let totals = groups.entry(entry.posting_group_id).or_default();
        totals.legs += 1;
        totals.sum += i128::from(entry.amount);

        accounts.insert(&entry.account_id);
        previous = Some(entry);
    }

    for (group, totals) in &groups {
        if totals.legs % 2 != 0 {
            report.violations.push(Violation::OddLegCount {
                group: *group,
                legs: totals.legs,
            });
        }
        if totals.sum != 0 {
            report.violations.push(Violation::Unbalanced {
                group: *group,
                sum: totals.sum,
            });
        }
    }

    report.accounts = accounts.len();
    report.groups = groups.len();
    report
}
