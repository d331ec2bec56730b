//! ledgerbench Common Types
//!
//! This crate contains the types shared by the posting engine and the
//! workload simulator: account and posting-group identifiers, the posting
//! request, and the store error taxonomy with its failure classification.

pub mod identifiers;
pub mod posting;
pub mod error;

pub use identifiers::*;
pub use posting::*;
pub use error::*;
