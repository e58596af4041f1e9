//! Reconciliation of two key sequences fetched from different databases
//!
//! [`reconcile`] is the pure comparison; [`ReconciliationEngine`] fetches both
//! sides, runs it, and builds a [`ReconciliationReport`].

pub mod engine;
pub mod matcher;
pub mod report;

pub use engine::*;
pub use matcher::*;
pub use report::*;
