//! Data fetchers: run a bounded key query and materialize one column
//!
//! Each driver module offers a `fetch_column` that works on a connection the
//! caller already holds, and a [`KeySource`] that opens a connection per
//! fetch and always releases it.

pub mod db2;
pub mod postgres;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{Driver, KeyNormalization, SourceConfig};
use crate::traits::*;
use crate::types::*;

pub use postgres::PostgresSource;

#[cfg(feature = "db2")]
pub use db2::Db2Source;

/// The query a fetcher runs and how to read its key column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyQuery {
    pub sql: String,
    pub column: String,
    pub normalization: KeyNormalization,
    /// Limit the server puts on the statement, if any
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl KeyQuery {
    /// Create a query reading `column` without normalization
    pub fn new(sql: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            column: column.into(),
            normalization: KeyNormalization::Exact,
            timeout: None,
        }
    }

    /// Take the query, column and normalization from a source config
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            sql: config.query.clone(),
            column: config.key_column.clone(),
            normalization: config.normalization,
            timeout: config.query_timeout,
        }
    }

    /// Turn one raw column value into a key, rejecting NULL
    pub(crate) fn key_at(
        &self,
        label: &SourceLabel,
        row: usize,
        raw: Option<String>,
    ) -> FetchResult<AccountKey> {
        raw.map(|value| self.normalization.apply(value))
            .ok_or_else(|| {
                FetchError::query(
                    label,
                    format!("NULL value in key column '{}' at row {}", self.column, row),
                )
            })
    }
}

/// Build the key source matching a config's driver
pub fn source_from_config(config: SourceConfig) -> ReconResult<Box<dyn KeySource>> {
    match config.driver {
        Driver::Postgres => Ok(Box::new(PostgresSource::new(config)?)),
        #[cfg(feature = "db2")]
        Driver::Db2 => Ok(Box::new(Db2Source::new(config)?)),
        #[cfg(not(feature = "db2"))]
        Driver::Db2 => Err(ReconError::Config(format!(
            "Source '{}' needs Db2 support; rebuild with the `db2` feature",
            config.label
        ))),
    }
}
