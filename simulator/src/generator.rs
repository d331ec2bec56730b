//! Contention profiles for generated postings.

use std::fmt;
use std::str::FromStr;

use ledgerbench_common::{AccountId, LedgerError, PostingGroupId, PostingRequest};
use rand::Rng;

/// Accounts in the small pool used by the contended profiles.
pub const POOL_SIZE: u32 = 10;

/// Account every `few-one` posting debits.
pub const HOT_ACCOUNT: &str = "outbound_wash";

/// Roughly one in this many `few-few` postings is forced onto a shared group.
const FORCED_GROUP_EVERY: i64 = 100;

/// A named contention profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneratorKind {
    /// Disjoint accounts and groups. Uncontended.
    ManyMany,
    /// Ten accounts moving money among each other, with occasional shared groups.
    FewFew,
    /// Ten accounts all paying into one hot account.
    FewOne,
}

impl GeneratorKind {
    /// Every profile.
    pub const ALL: [GeneratorKind; 3] = [
        GeneratorKind::ManyMany,
        GeneratorKind::FewFew,
        GeneratorKind::FewOne,
    ];

    /// Name used on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            GeneratorKind::ManyMany => "many-many",
            GeneratorKind::FewFew => "few-few",
            GeneratorKind::FewOne => "few-one",
        }
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GeneratorKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GeneratorKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                let known: Vec<_> = GeneratorKind::ALL.iter().map(|k| k.name()).collect();
                LedgerError::ConfigurationError(format!(
                    "unknown generator {:?}, expected one of {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// Produces posting requests for one contention profile.
#[derive(Debug, Clone)]
pub struct RequestGenerator {
    kind: GeneratorKind,
    template: PostingRequest,
}

impl RequestGenerator {
    /// Create a generator that fills in `template`.
    pub fn new(kind: GeneratorKind, template: PostingRequest) -> Self {
        Self { kind, template }
    }

    /// The profile in use.
    pub fn kind(&self) -> GeneratorKind {
        self.kind
    }

    /// Generate the next request.
    ///
    /// `committed` is the process-wide count of committed postings; only the
    /// `few-few` profile reads it. Requests may be self-transfers; callers
    /// drop those before submitting.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R, committed: u64) -> PostingRequest {
        let mut req = self.template.clone();

        match self.kind {
            GeneratorKind::ManyMany => {
                req.account_a = AccountId::numbered(random_id(rng));
                req.account_b = AccountId::numbered(random_id(rng));
                req.group = PostingGroupId::new(random_id(rng));
            }
            GeneratorKind::FewFew => {
                req.account_a = pool_account(rng);
                req.account_b = pool_account(rng);
                req.group = PostingGroupId::new(few_few_group(random_id(rng), committed));
            }
            GeneratorKind::FewOne => {
                req.account_a = pool_account(rng);
                req.account_b = AccountId::new(HOT_ACCOUNT);
                req.group = PostingGroupId::new(random_id(rng));
            }
        }

        req
    }
}

/// Non-negative random identifier.
fn random_id<R: Rng + ?Sized>(rng: &mut R) -> i64 {
    rng.gen_range(0..i64::MAX)
}

fn pool_account<R: Rng + ?Sized>(rng: &mut R) -> AccountId {
    AccountId::numbered(rng.gen_range(0..POOL_SIZE))
}

/// Group for a `few-few` posting: a random group divisible by 100 is
/// replaced with a value shared by every worker until 100 more postings commit.
fn few_few_group(random: i64, committed: u64) -> i64 {
    if random % FORCED_GROUP_EVERY == 0 {
        (committed / FORCED_GROUP_EVERY as u64) as i64
    } else {
        random
    }
}
