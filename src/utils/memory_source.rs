//! In-memory key source and event sink for testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone, PartialEq)]
enum Fault {
    Connection(String),
    Query(String),
}

/// In-memory key source for testing and development
///
/// Behaves like a database-backed source: each fetch "opens" a connection,
/// reports every row, and releases the connection when the fetch ends or is
/// dropped. Open connections and fetch attempts are counted so tests can
/// check that nothing leaks.
#[derive(Debug, Clone)]
pub struct MemorySource {
    label: SourceLabel,
    query: String,
    rows: Arc<RwLock<Vec<AccountKey>>>,
    fault: Option<Fault>,
    delay: Option<Duration>,
    open: Arc<AtomicUsize>,
    fetches: Arc<AtomicUsize>,
}

impl MemorySource {
    /// Create a source returning `rows` in order
    pub fn new<K: Into<AccountKey>>(
        label: impl Into<SourceLabel>,
        rows: impl IntoIterator<Item = K>,
    ) -> Self {
        Self {
            label: label.into(),
            query: "SELECT account_no FROM accounts".to_string(),
            rows: Arc::new(RwLock::new(rows.into_iter().map(Into::into).collect())),
            fault: None,
            delay: None,
            open: Arc::new(AtomicUsize::new(0)),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail every fetch while establishing the session
    pub fn failing_connection(mut self, message: impl Into<String>) -> Self {
        self.fault = Some(Fault::Connection(message.into()));
        self
    }

    /// Fail every fetch after the session is open
    pub fn failing_query(mut self, message: impl Into<String>) -> Self {
        self.fault = Some(Fault::Query(message.into()));
        self
    }

    /// Hold the connection open this long before returning rows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replace the stored rows
    pub fn set_rows<K: Into<AccountKey>>(&self, rows: impl IntoIterator<Item = K>) {
        let mut stored = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        *stored = rows.into_iter().map(Into::into).collect();
    }

    /// Connections currently held by in-flight fetches
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of fetches attempted so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

struct ConnectionGuard {
    open: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn acquire(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self { open: open.clone() }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeySource for MemorySource {
    fn label(&self) -> &SourceLabel {
        &self.label
    }

    fn query(&self) -> &str {
        &self.query
    }

    async fn fetch_keys(&self, events: &dyn ReconEvents) -> FetchResult<ResultSequence> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(Fault::Connection(message)) = &self.fault {
            return Err(FetchError::connection(&self.label, message.clone()));
        }

        let _connection = ConnectionGuard::acquire(&self.open);
        events.record(ReconEvent::ConnectionOpened {
            label: self.label.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let fetched = match &self.fault {
            Some(Fault::Query(message)) => Err(FetchError::query(&self.label, message.clone())),
            _ => {
                let rows = self
                    .rows
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for (row, key) in rows.iter().enumerate() {
                    events.record(ReconEvent::RowFetched {
                        label: self.label.clone(),
                        row,
                        key: key.clone(),
                    });
                }
                Ok(rows)
            }
        };

        events.record(ReconEvent::ConnectionClosed {
            label: self.label.clone(),
        });
        fetched
    }
}

/// Event sink that keeps everything it is given
#[derive(Debug, Clone, Default)]
pub struct MemoryEvents {
    events: Arc<RwLock<Vec<ReconEvent>>>,
}

impl MemoryEvents {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn events(&self) -> Vec<ReconEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clear all captured events
    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ReconEvents for MemoryEvents {
    fn record(&self, event: ReconEvent) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
