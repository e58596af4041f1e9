//! IBM Db2 fetcher over ODBC
//!
//! The ODBC calls block, so [`Db2Source`] runs them on the blocking pool and
//! replays the row events once the task finishes. Only available with the
//! `db2` feature; [`connection_string`] is always compiled.

use crate::config::SourceConfig;

/// ODBC connection string for a Db2 descriptor
pub fn connection_string(config: &SourceConfig) -> String {
    let mut conn = format!(
        "DRIVER={{{}}};DATABASE={};HOSTNAME={};PORT={};PROTOCOL=TCPIP;UID={};",
        config.effective_odbc_driver(),
        config.database,
        config.host,
        config.effective_port(),
        config.username,
    );
    if let Some(password) = &config.password {
        conn.push_str(&format!("PWD={};", password));
    }
    conn
}

#[cfg(feature = "db2")]
pub use odbc::*;

#[cfg(feature = "db2")]
mod odbc {
    use std::sync::{Mutex, PoisonError};

    use async_trait::async_trait;
    use odbc_api::{ConnectionOptions, Cursor, Environment, ResultSetMetadata};
    use tracing::debug;

    use super::connection_string;
    use crate::config::{Driver, SourceConfig};
    use crate::fetch::KeyQuery;
    use crate::traits::*;
    use crate::types::*;

    /// Holds events raised on the blocking pool until they can be replayed
    #[derive(Debug, Default)]
    pub(super) struct EventBuffer(Mutex<Vec<ReconEvent>>);

    impl EventBuffer {
        pub(super) fn into_events(self) -> Vec<ReconEvent> {
            self.0.into_inner().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl ReconEvents for EventBuffer {
        fn record(&self, event: ReconEvent) {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
        }
    }

    /// Whole seconds for the ODBC query timeout, rounding up so a limit never becomes zero
    pub(super) fn timeout_secs(query: &KeyQuery) -> Option<usize> {
        query.timeout.filter(|t| !t.is_zero()).map(|t| {
            let secs = t.as_secs() + u64::from(t.subsec_nanos() > 0);
            usize::try_from(secs).unwrap_or(usize::MAX)
        })
    }

    /// Run `query` on an open ODBC connection and read its key column in row order
    ///
    /// The column is looked up by name, ignoring ASCII case, since Db2 folds
    /// unquoted identifiers to upper case.
    pub fn fetch_column(
        conn: &odbc_api::Connection<'_>,
        label: &SourceLabel,
        query: &KeyQuery,
        events: &dyn ReconEvents,
    ) -> FetchResult<ResultSequence> {
        let query_error = |e: odbc_api::Error| FetchError::query(label, e.to_string());

        let mut cursor = conn
            .execute(&query.sql, (), timeout_secs(query))
            .map_err(query_error)?
            .ok_or_else(|| FetchError::query(label, "statement returned no result set"))?;

        let mut position = None;
        for (index, name) in cursor.column_names().map_err(query_error)?.enumerate() {
            if name.map_err(query_error)?.eq_ignore_ascii_case(&query.column) {
                position = Some(index + 1);
                break;
            }
        }
        let column = position
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| {
                FetchError::query(
                    label,
                    format!("key column '{}' not in result set", query.column),
                )
            })?;

        let mut keys = Vec::new();
        let mut buf = Vec::new();
        while let Some(mut row) = cursor.next_row().map_err(query_error)? {
            let index = keys.len();
            buf.clear();
            let raw = if row.get_text(column, &mut buf).map_err(query_error)? {
                Some(String::from_utf8(buf.clone()).map_err(|e| {
                    FetchError::query(label, format!("key at row {} is not UTF-8: {}", index, e))
                })?)
            } else {
                None
            };
            let key = query.key_at(label, index, raw)?;
            events.record(ReconEvent::RowFetched {
                label: label.clone(),
                row: index,
                key: key.clone(),
            });
            keys.push(key);
        }

        Ok(keys)
    }

    /// Db2 key source opening one ODBC connection per fetch
    #[derive(Debug, Clone)]
    pub struct Db2Source {
        config: SourceConfig,
        query: KeyQuery,
    }

    impl Db2Source {
        /// Create a source from a validated config
        pub fn new(config: SourceConfig) -> ReconResult<Self> {
            if config.driver != Driver::Db2 {
                return Err(ReconError::Config(format!(
                    "Source '{}' is configured for {}, not db2",
                    config.label,
                    config.driver.as_str()
                )));
            }
            config.validate()?;
            let query = KeyQuery::from_config(&config);
            Ok(Self { config, query })
        }

        fn fetch_blocking(
            conn_str: &str,
            label: &SourceLabel,
            query: &KeyQuery,
            events: &dyn ReconEvents,
        ) -> FetchResult<ResultSequence> {
            let env = Environment::new().map_err(|e| FetchError::connection(label, e.to_string()))?;
            // Dropping the connection disconnects, on every return path below.
            let conn = env
                .connect_with_connection_string(conn_str, ConnectionOptions::default())
                .map_err(|e| FetchError::connection(label, e.to_string()))?;
            events.record(ReconEvent::ConnectionOpened {
                label: label.clone(),
            });

            let fetched = fetch_column(&conn, label, query, events);

            drop(conn);
            events.record(ReconEvent::ConnectionClosed {
                label: label.clone(),
            });
            fetched
        }
    }

    #[async_trait]
    impl KeySource for Db2Source {
        fn label(&self) -> &SourceLabel {
            &self.config.label
        }

        fn query(&self) -> &str {
            &self.query.sql
        }

        async fn fetch_keys(&self, events: &dyn ReconEvents) -> FetchResult<ResultSequence> {
            debug!(
                host = %self.config.host,
                port = self.config.effective_port(),
                database = %self.config.database,
                "Connecting to Db2"
            );
            let conn_str = connection_string(&self.config);
            let label = self.config.label.clone();
            let query = self.query.clone();

            let (fetched, buffered) = tokio::task::spawn_blocking(move || {
                let buffer = EventBuffer::default();
                let fetched = Db2Source::fetch_blocking(&conn_str, &label, &query, &buffer);
                (fetched, buffer.into_events())
            })
            .await
            .map_err(|e| FetchError::query(&self.config.label, format!("fetch task failed: {}", e)))?;

            for event in buffered {
                events.record(event);
            }
            fetched
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Driver;

    #[test]
    fn test_connection_string_layout() {
        let mut config = SourceConfig::new(
            Driver::Db2,
            "db2.internal",
            "CORE",
            "db2inst1",
            "SELECT account_no FROM accounts FETCH FIRST 10 ROWS ONLY",
        );
        config.password = Some("pw".to_string());

        assert_eq!(
            connection_string(&config),
            "DRIVER={IBM DB2 ODBC DRIVER};DATABASE=CORE;HOSTNAME=db2.internal;PORT=50000;PROTOCOL=TCPIP;UID=db2inst1;PWD=pw;"
        );
    }

    #[test]
    fn test_connection_string_without_password() {
        let mut config = SourceConfig::new(
            Driver::Db2,
            "db2.internal",
            "CORE",
            "db2inst1",
            "SELECT account_no FROM accounts FETCH FIRST 10 ROWS ONLY",
        );
        config.port = Some(50001);
        config.odbc_driver = Some("Db2".to_string());

        assert_eq!(
            connection_string(&config),
            "DRIVER={Db2};DATABASE=CORE;HOSTNAME=db2.internal;PORT=50001;PROTOCOL=TCPIP;UID=db2inst1;"
        );
    }

    #[cfg(feature = "db2")]
    #[test]
    fn test_query_timeout_rounds_up_to_whole_seconds() {
        use crate::fetch::KeyQuery;
        use std::time::Duration;

        let mut query = KeyQuery::new(
            "SELECT account_no FROM accounts FETCH FIRST 10 ROWS ONLY",
            "account_no",
        );
        assert_eq!(odbc::timeout_secs(&query), None);

        query.timeout = Some(Duration::from_secs(300));
        assert_eq!(odbc::timeout_secs(&query), Some(300));

        query.timeout = Some(Duration::from_millis(1500));
        assert_eq!(odbc::timeout_secs(&query), Some(2));

        query.timeout = Some(Duration::ZERO);
        assert_eq!(odbc::timeout_secs(&query), None);
    }

    #[cfg(feature = "db2")]
    #[test]
    fn test_event_buffer_keeps_order() {
        use crate::traits::{ReconEvent, ReconEvents};
        use crate::types::SourceLabel;

        let buffer = odbc::EventBuffer::default();
        let label = SourceLabel::from("db2");
        buffer.record(ReconEvent::ConnectionOpened {
            label: label.clone(),
        });
        buffer.record(ReconEvent::ConnectionClosed {
            label: label.clone(),
        });

        assert_eq!(
            buffer.into_events(),
            vec![
                ReconEvent::ConnectionOpened {
                    label: label.clone()
                },
                ReconEvent::ConnectionClosed { label },
            ]
        );
    }
}
