//! Connection descriptors and run configuration
//!
//! Everything is read from environment variables, one prefix per source:
//!
//! | Variable            | Meaning                              | Default                  |
//! |---------------------|--------------------------------------|--------------------------|
//! | `{P}DRIVER`         | `postgres` or `db2`                  | by position              |
//! | `{P}LABEL`          | name used in logs and reports        | driver name              |
//! | `{P}HOST`           | server host                          | required                 |
//! | `{P}PORT`           | server port                          | 5432 / 50000             |
//! | `{P}DATABASE`       | database name                        | required                 |
//! | `{P}USER`           | user name                            | required                 |
//! | `{P}PASSWORD`       | password                             | none                     |
//! | `{P}QUERY`          | bounded read-only key query          | required                 |
//! | `{P}KEY_COLUMN`     | column holding the key               | `account_no`             |
//! | `{P}NORMALIZE`      | `exact` or `trim-trailing`           | `exact`                  |
//! | `{P}ODBC_DRIVER`    | ODBC driver name (Db2 only)          | `IBM DB2 ODBC DRIVER`    |
//! | `{P}QUERY_TIMEOUT_SECS` | server-side query limit          | run deadline             |
//!
//! plus `RECON_DEADLINE_SECS` (0 disables the deadline) and
//! `RECON_SEQUENTIAL`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::reconciliation::RunOptions;
use crate::types::*;
use crate::utils::validation::validate_key_query;

/// Default prefix for the first source
pub const FIRST_PREFIX: &str = "PG_";
/// Default prefix for the second source
pub const SECOND_PREFIX: &str = "DB2_";

const DEFAULT_KEY_COLUMN: &str = "account_no";
const DEFAULT_ODBC_DRIVER: &str = "IBM DB2 ODBC DRIVER";
const DEFAULT_DEADLINE_SECS: u64 = 300;

/// Database product behind a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Postgres,
    Db2,
}

impl Driver {
    /// Port the server listens on unless told otherwise
    pub fn default_port(&self) -> u16 {
        match self {
            Driver::Postgres => 5432,
            Driver::Db2 => 50000,
        }
    }

    /// Identifier string
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Postgres => "postgres",
            Driver::Db2 => "db2",
        }
    }

    /// Row-limiting clause in this dialect
    pub fn row_limit_clause(&self, rows: u64) -> String {
        match self {
            Driver::Postgres => format!("LIMIT {}", rows),
            Driver::Db2 => format!("FETCH FIRST {} ROWS ONLY", rows),
        }
    }

    /// Row-limiting clause with a placeholder count, for messages
    pub fn row_limit_hint(&self) -> &'static str {
        match self {
            Driver::Postgres => "LIMIT n",
            Driver::Db2 => "FETCH FIRST n ROWS ONLY",
        }
    }

    fn parse(value: &str) -> ReconResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Driver::Postgres),
            "db2" | "ibm_db2" | "ibmdb2" => Ok(Driver::Db2),
            other => Err(ReconError::Config(format!("Unknown driver '{}'", other))),
        }
    }
}

/// Caller-side rewriting of keys right after they are fetched
///
/// The reconciler compares keys exactly; this is where a source whose key
/// column is fixed-width can shed its padding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyNormalization {
    #[default]
    Exact,
    TrimTrailing,
}

impl KeyNormalization {
    /// Apply to one raw value
    pub fn apply(&self, raw: String) -> AccountKey {
        match self {
            KeyNormalization::Exact => AccountKey::new(raw),
            KeyNormalization::TrimTrailing => {
                let trimmed = raw.trim_end().len();
                let mut raw = raw;
                raw.truncate(trimmed);
                AccountKey::new(raw)
            }
        }
    }

    fn parse(value: &str) -> ReconResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" | "" => Ok(KeyNormalization::Exact),
            "trim-trailing" | "trim_trailing" => Ok(KeyNormalization::TrimTrailing),
            other => Err(ReconError::Config(format!(
                "Unknown key normalization '{}'",
                other
            ))),
        }
    }
}

/// Connection descriptor and key query for one source
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub driver: Driver,
    pub label: SourceLabel,
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub query: String,
    pub key_column: String,
    #[serde(default)]
    pub normalization: KeyNormalization,
    pub odbc_driver: Option<String>,
    /// Server-side limit on the key query; falls back to the run deadline
    #[serde(default)]
    pub query_timeout: Option<Duration>,
}

impl SourceConfig {
    /// Create a config with defaults for everything but the essentials
    pub fn new(
        driver: Driver,
        host: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            driver,
            label: SourceLabel::new(driver.as_str()),
            host: host.into(),
            port: None,
            database: database.into(),
            username: username.into(),
            password: None,
            query: query.into(),
            key_column: DEFAULT_KEY_COLUMN.to_string(),
            normalization: KeyNormalization::Exact,
            odbc_driver: None,
            query_timeout: None,
        }
    }

    /// Load from `{prefix}*` variables via `lookup`
    pub fn from_lookup<F>(prefix: &str, default_driver: Driver, lookup: F) -> ReconResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", prefix, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &str| {
            var(name).ok_or_else(|| {
                ReconError::Config(format!("Missing environment variable {}{}", prefix, name))
            })
        };

        let driver = match var("DRIVER") {
            Some(value) => Driver::parse(&value)?,
            None => default_driver,
        };
        let query_timeout = match var("QUERY_TIMEOUT_SECS") {
            Some(value) => Some(Duration::from_secs(value.parse::<u64>().map_err(|_| {
                ReconError::Config(format!(
                    "Invalid timeout in {}QUERY_TIMEOUT_SECS: '{}'",
                    prefix, value
                ))
            })?)),
            None => None,
        };
        let port = match var("PORT") {
            Some(value) => Some(value.parse::<u16>().map_err(|_| {
                ReconError::Config(format!("Invalid port in {}PORT: '{}'", prefix, value))
            })?),
            None => None,
        };

        let mut config = SourceConfig::new(
            driver,
            required("HOST")?,
            required("DATABASE")?,
            required("USER")?,
            required("QUERY")?,
        );
        config.port = port;
        // Credentials are taken verbatim; surrounding spaces can be significant.
        config.password = lookup(&format!("{}PASSWORD", prefix)).filter(|v| !v.is_empty());
        config.query_timeout = query_timeout.filter(|t| !t.is_zero());
        if let Some(label) = var("LABEL") {
            config.label = SourceLabel::new(label);
        }
        if let Some(column) = var("KEY_COLUMN") {
            config.key_column = column;
        }
        if let Some(normalization) = var("NORMALIZE") {
            config.normalization = KeyNormalization::parse(&normalization)?;
        }
        config.odbc_driver = var("ODBC_DRIVER");
        Ok(config)
    }

    /// Load from the process environment
    pub fn from_env(prefix: &str, default_driver: Driver) -> ReconResult<Self> {
        Self::from_lookup(prefix, default_driver, |name| std::env::var(name).ok())
    }

    /// Port to connect to
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.driver.default_port())
    }

    /// ODBC driver name used in the Db2 connection string
    pub fn effective_odbc_driver(&self) -> &str {
        self.odbc_driver.as_deref().unwrap_or(DEFAULT_ODBC_DRIVER)
    }

    /// Server-side query limit: the explicit one, else `deadline`
    pub fn query_timeout_or(&self, deadline: Option<Duration>) -> Option<Duration> {
        self.query_timeout.or(deadline)
    }

    /// Check the descriptor and the query before any connection is made
    pub fn validate(&self) -> ReconResult<()> {
        if self.host.trim().is_empty() {
            return Err(ReconError::Config(format!(
                "Host cannot be empty for {}",
                self.label
            )));
        }
        if self.database.trim().is_empty() {
            return Err(ReconError::Config(format!(
                "Database cannot be empty for {}",
                self.label
            )));
        }
        if self.port == Some(0) {
            return Err(ReconError::Config(format!(
                "Port cannot be 0 for {}",
                self.label
            )));
        }
        validate_key_query(&self.query, &self.key_column, self.driver)
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("driver", &self.driver)
            .field("label", &self.label)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***REDACTED***"))
            .field("query", &self.query)
            .field("key_column", &self.key_column)
            .field("normalization", &self.normalization)
            .field("odbc_driver", &self.odbc_driver)
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}

/// Both sources plus run options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub first: SourceConfig,
    pub second: SourceConfig,
    pub options: RunOptions,
}

impl RunConfig {
    /// Load both sources and the run options via `lookup`
    pub fn from_lookup<F>(first_prefix: &str, second_prefix: &str, lookup: F) -> ReconResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = SourceConfig::from_lookup(first_prefix, Driver::Postgres, &lookup)?;
        let second = SourceConfig::from_lookup(second_prefix, Driver::Db2, &lookup)?;

        let deadline_secs = match lookup("RECON_DEADLINE_SECS").filter(|v| !v.trim().is_empty()) {
            Some(value) => value.trim().parse::<u64>().map_err(|_| {
                ReconError::Config(format!("Invalid RECON_DEADLINE_SECS: '{}'", value))
            })?,
            None => DEFAULT_DEADLINE_SECS,
        };
        let sequential = lookup("RECON_SEQUENTIAL")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let config = Self {
            first,
            second,
            options: RunOptions {
                deadline: (deadline_secs > 0).then(|| Duration::from_secs(deadline_secs)),
                concurrent: !sequential,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Give each source without its own query timeout the run deadline
    ///
    /// Call once the deadline is final, before building the sources, so the
    /// server stops the query when the client stops waiting.
    pub fn apply_deadline_to_queries(mut self) -> Self {
        let deadline = self.options.deadline;
        self.first.query_timeout = self.first.query_timeout_or(deadline);
        self.second.query_timeout = self.second.query_timeout_or(deadline);
        self
    }

    /// Load from the process environment
    pub fn from_env(first_prefix: &str, second_prefix: &str) -> ReconResult<Self> {
        Self::from_lookup(first_prefix, second_prefix, |name| std::env::var(name).ok())
    }

    /// Validate both sources and make sure they can be told apart
    pub fn validate(&self) -> ReconResult<()> {
        self.first.validate()?;
        self.second.validate()?;
        if self.first.label == self.second.label {
            return Err(ReconError::Config(format!(
                "Both sources are labelled '{}'",
                self.first.label
            )));
        }
        Ok(())
    }
}
