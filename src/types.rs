//! Core types and data structures for the reconciliation system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Key identifying one record in a source, e.g. an account number.
///
/// Keys are compared byte-for-byte exactly as the driver returned them.
/// The same key may legitimately appear more than once in a result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountKey(String);

impl AccountKey {
    /// Create a new key
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw key text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the raw text
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AccountKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Ordered keys from one fetch, one entry per source row, in result-set order
pub type ResultSequence = Vec<AccountKey>;

/// Name of a data source as it appears in logs, errors and report lines
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceLabel(String);

impl SourceLabel {
    /// Create a new label
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Borrow the label text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceLabel {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Outcome of comparing two result sequences
///
/// Each side keeps one entry per unmatched occurrence, so a key that appears
/// three times in the first sequence and once in the second shows up twice in
/// `missing_in_second`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    /// Occurrences in the first sequence with no partner in the second, in first-sequence order
    pub missing_in_second: Vec<AccountKey>,
    /// Occurrences in the second sequence with no partner in the first, in second-sequence order
    pub missing_in_first: Vec<AccountKey>,
}

impl ReconciliationResult {
    /// True when both sides matched occurrence for occurrence
    pub fn is_empty(&self) -> bool {
        self.missing_in_second.is_empty() && self.missing_in_first.is_empty()
    }

    /// Total number of unmatched occurrences across both sides
    pub fn discrepancy_count(&self) -> usize {
        self.missing_in_second.len() + self.missing_in_first.len()
    }

    /// The same result seen from the other direction
    pub fn swapped(self) -> Self {
        Self {
            missing_in_second: self.missing_in_first,
            missing_in_first: self.missing_in_second,
        }
    }
}

/// Failure of a single fetch against one source
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("Connection error on {label}: {message}")]
    Connection { label: SourceLabel, message: String },
    #[error("Query error on {label}: {message}")]
    Query { label: SourceLabel, message: String },
    #[error("Fetch from {label} exceeded deadline of {deadline:?}")]
    Timeout {
        label: SourceLabel,
        deadline: Duration,
    },
}

impl FetchError {
    /// Create a connection error
    pub fn connection(label: &SourceLabel, message: impl Into<String>) -> Self {
        FetchError::Connection {
            label: label.clone(),
            message: message.into(),
        }
    }

    /// Create a query error
    pub fn query(label: &SourceLabel, message: impl Into<String>) -> Self {
        FetchError::Query {
            label: label.clone(),
            message: message.into(),
        }
    }

    /// Source the failure happened on
    pub fn label(&self) -> &SourceLabel {
        match self {
            FetchError::Connection { label, .. }
            | FetchError::Query { label, .. }
            | FetchError::Timeout { label, .. } => label,
        }
    }

    /// Operation that failed, for log lines
    pub fn operation(&self) -> &'static str {
        match self {
            FetchError::Connection { .. } => "connect",
            FetchError::Query { .. } => "query",
            FetchError::Timeout { .. } => "deadline",
        }
    }
}

/// Errors that abort a reconciliation run
#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Reconciliation aborted: {0}")]
    FetchAbort(#[from] FetchError),
}

impl ReconError {
    /// Source named by a fetch abort, if this is one
    pub fn failed_source(&self) -> Option<&SourceLabel> {
        match self {
            ReconError::FetchAbort(err) => Some(err.label()),
            _ => None,
        }
    }
}

/// Result type for a single fetch
pub type FetchResult<T> = Result<T, FetchError>;

/// Result type for reconciliation operations
pub type ReconResult<T> = Result<T, ReconError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_compare_byte_for_byte() {
        assert_ne!(AccountKey::from("ACC1"), AccountKey::from("acc1"));
        assert_ne!(AccountKey::from("ACC1  "), AccountKey::from("ACC1"));
        assert_eq!(AccountKey::from("ACC1"), AccountKey::new(String::from("ACC1")));
    }

    #[test]
    fn test_fetch_abort_names_source() {
        let err: ReconError = FetchError::connection(&"db2".into(), "refused").into();
        assert_eq!(err.failed_source(), Some(&SourceLabel::from("db2")));
        assert_eq!(
            err.to_string(),
            "Reconciliation aborted: Connection error on db2: refused"
        );
    }

    #[test]
    fn test_result_swap_and_counts() {
        let result = ReconciliationResult {
            missing_in_second: vec!["a".into(), "a".into()],
            missing_in_first: vec!["b".into()],
        };
        assert_eq!(result.discrepancy_count(), 3);
        let swapped = result.clone().swapped();
        assert_eq!(swapped.missing_in_first, result.missing_in_second);
        assert!(!swapped.is_empty());
        assert!(ReconciliationResult::default().is_empty());
    }
}
