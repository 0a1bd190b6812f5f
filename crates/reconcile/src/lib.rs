//! Library reconciliation.
//!
//! A reindex runs in three steps:
//!
//! 1. **Scan**: walk the library roots and hash every game file
//! 2. **Plan**: diff the scan against a registry snapshot ([`reconcile`])
//! 3. **Apply**: write the planned mutations one record at a time ([`apply`])
//!
//! [`Indexer`] drives the three steps and guarantees that only one pass
//! runs at a time.

mod apply;
mod indexer;
mod plan;

pub use apply::{ApplyReport, StoreWriteError, apply};
pub use indexer::{IndexError, IndexReport, IndexSummary, Indexer, PathFailure};
pub use plan::{DuplicateContent, Mutation, MutationPlan, reconcile};
