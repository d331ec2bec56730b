//! Identifier types for ledger entities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a ledger account.
///
/// Accounts have no metadata of their own; an account exists as soon as a
/// ledger entry references it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create a new account ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Account ID in the `acc<n>` family used by the generators.
    pub fn numbered(n: impl fmt::Display) -> Self {
        Self(format!("acc{}", n))
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate the account ID: non-empty and at most 255 bytes.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0.len() <= 255
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier grouping the two legs of one posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostingGroupId(i64);

impl PostingGroupId {
    /// Create a posting group ID.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for PostingGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PostingGroupId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_account() {
        assert_eq!(AccountId::numbered(7).as_str(), "acc7");
        assert_eq!(AccountId::numbered(7), AccountId::from("acc7"));
    }

    #[test]
    fn test_account_validation() {
        assert!(AccountId::new("outbound_wash").is_valid());
        assert!(!AccountId::new("").is_valid());
        assert!(!AccountId::new("x".repeat(256)).is_valid());
    }

    #[test]
    fn test_group_display() {
        let group = PostingGroupId::new(42);
        assert_eq!(group.to_string(), "42");
        assert_eq!(group.get(), 42);
    }
}
