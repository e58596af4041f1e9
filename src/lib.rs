//! # Account Recon
//!
//! Reconciles the key column of two relational sources, typically a
//! PostgreSQL and an IBM Db2 database, and reports which keys one side has
//! that the other lacks.
//!
//! ## Features
//!
//! - **Multiset reconciliation**: duplicate keys are counted, not collapsed
//! - **Fetchers**: PostgreSQL through `sqlx`, Db2 through ODBC (`db2` feature)
//! - **Scoped connections**: one connection per fetch, released on every path
//! - **Fail fast**: a failed fetch aborts the run and names the source
//! - **Injected logging**: run events go through a [`ReconEvents`] sink
//!
//! ## Quick Start
//!
//! ```rust
//! use account_recon::{reconcile, AccountKey};
//!
//! let first: Vec<AccountKey> = vec!["acc1".into(), "acc2".into(), "acc2".into()];
//! let second: Vec<AccountKey> = vec!["acc2".into(), "acc3".into()];
//!
//! let result = reconcile(&first, &second);
//! assert_eq!(result.missing_in_second, vec![AccountKey::from("acc1"), AccountKey::from("acc2")]);
//! assert_eq!(result.missing_in_first, vec![AccountKey::from("acc3")]);
//! ```

pub mod config;
pub mod fetch;
pub mod logging;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;
