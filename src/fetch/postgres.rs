//! PostgreSQL fetcher

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Row};
use tracing::{debug, warn};

use crate::config::{Driver, SourceConfig};
use crate::fetch::KeyQuery;
use crate::traits::*;
use crate::types::*;

/// Run `query` on an open connection and read its key column in row order
///
/// The key column has to decode as text; cast non-text keys in the query
/// (`SELECT account_no::text ...`).
pub async fn fetch_column(
    conn: &mut PgConnection,
    label: &SourceLabel,
    query: &KeyQuery,
    events: &dyn ReconEvents,
) -> FetchResult<ResultSequence> {
    let rows = sqlx::query(&query.sql)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| FetchError::query(label, e.to_string()))?;

    let mut keys = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let raw: Option<String> = row.try_get(query.column.as_str()).map_err(|e| {
            FetchError::query(
                label,
                format!("cannot read key column '{}': {}", query.column, e),
            )
        })?;
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

/// PostgreSQL key source opening one connection per fetch
#[derive(Debug, Clone)]
pub struct PostgresSource {
    config: SourceConfig,
    query: KeyQuery,
}

impl PostgresSource {
    /// Create a source from a validated config
    pub fn new(config: SourceConfig) -> ReconResult<Self> {
        if config.driver != Driver::Postgres {
            return Err(ReconError::Config(format!(
                "Source '{}' is configured for {}, not postgres",
                config.label,
                config.driver.as_str()
            )));
        }
        config.validate()?;
        let query = KeyQuery::from_config(&config);
        Ok(Self { config, query })
    }

    /// Server settings for the session, in milliseconds where PostgreSQL expects them
    fn session_settings(&self) -> Vec<(&'static str, String)> {
        self.query
            .timeout
            .map(|t| vec![("statement_timeout", t.as_millis().to_string())])
            .unwrap_or_default()
    }

    fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.effective_port())
            .database(&self.config.database)
            .username(&self.config.username)
            .options(self.session_settings());
        match &self.config.password {
            Some(password) => options.password(password),
            None => options,
        }
    }

    fn connection_error(&self, e: sqlx::Error) -> FetchError {
        FetchError::connection(
            &self.config.label,
            format!(
                "{}:{}/{}: {}",
                self.config.host,
                self.config.effective_port(),
                self.config.database,
                e
            ),
        )
    }

    /// Open a session
    pub async fn connect(&self) -> FetchResult<PgConnection> {
        debug!(
            host = %self.config.host,
            port = self.config.effective_port(),
            database = %self.config.database,
            "Connecting to PostgreSQL"
        );
        PgConnection::connect_with(&self.connect_options())
            .await
            .map_err(|e| self.connection_error(e))
    }
}

#[async_trait]
impl KeySource for PostgresSource {
    fn label(&self) -> &SourceLabel {
        &self.config.label
    }

    fn query(&self) -> &str {
        &self.query.sql
    }

    async fn fetch_keys(&self, events: &dyn ReconEvents) -> FetchResult<ResultSequence> {
        let label = &self.config.label;
        let mut conn = self.connect().await?;
        events.record(ReconEvent::ConnectionOpened {
            label: label.clone(),
        });

        let fetched = fetch_column(&mut conn, label, &self.query, events).await;

        if let Err(e) = conn.close().await {
            warn!(source = %label, error = %e, "Failed to close PostgreSQL connection cleanly");
        }
        events.record(ReconEvent::ConnectionClosed {
            label: label.clone(),
        });
        fetched
    }
}
