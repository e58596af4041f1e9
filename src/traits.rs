//! Traits for source abstraction and injected logging

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::types::*;

/// A database (or stand-in) that can produce the key column for one run
///
/// Implementations own their connection descriptor. Each call acquires a
/// fresh connection, runs the bounded query, and releases the connection
/// before returning, whether the fetch succeeded or not.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Name used in logs, errors and report lines
    fn label(&self) -> &SourceLabel;

    /// The query this source runs, for validation and logging
    fn query(&self) -> &str;

    /// Fetch the key column in result-set order
    async fn fetch_keys(&self, events: &dyn ReconEvents) -> FetchResult<ResultSequence>;
}

#[async_trait]
impl<S: KeySource + ?Sized> KeySource for Box<S> {
    fn label(&self) -> &SourceLabel {
        (**self).label()
    }

    fn query(&self) -> &str {
        (**self).query()
    }

    async fn fetch_keys(&self, events: &dyn ReconEvents) -> FetchResult<ResultSequence> {
        (**self).fetch_keys(events).await
    }
}

/// Which side of the comparison a key is missing from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    First,
    Second,
}

/// Something worth recording while a run progresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReconEvent {
    RunStarted {
        run_id: Uuid,
        first: SourceLabel,
        second: SourceLabel,
        concurrent: bool,
    },
    FetchStarted {
        label: SourceLabel,
        query: String,
    },
    ConnectionOpened {
        label: SourceLabel,
    },
    RowFetched {
        label: SourceLabel,
        row: usize,
        key: AccountKey,
    },
    FetchCompleted {
        label: SourceLabel,
        rows: usize,
        elapsed: Duration,
    },
    ConnectionClosed {
        label: SourceLabel,
    },
    FetchFailed {
        label: SourceLabel,
        operation: String,
        message: String,
    },
    KeyMissing {
        key: AccountKey,
        missing_from: SourceLabel,
        present_in: SourceLabel,
    },
    Reconciled {
        missing_in_first: usize,
        missing_in_second: usize,
    },
    RunAborted {
        run_id: Uuid,
        label: SourceLabel,
        operation: String,
        message: String,
    },
}

/// Sink for run events
///
/// Fetchers and the engine report through this instead of a global logger,
/// so tests can capture what a run emitted.
pub trait ReconEvents: Send + Sync {
    /// Record a single event
    fn record(&self, event: ReconEvent);
}

impl<E: ReconEvents + ?Sized> ReconEvents for std::sync::Arc<E> {
    fn record(&self, event: ReconEvent) {
        (**self).record(event)
    }
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl ReconEvents for NoopEvents {
    fn record(&self, _event: ReconEvent) {}
}
