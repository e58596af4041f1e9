//! Run orchestration: fetch both sources, then reconcile

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::logging::TracingEvents;
use crate::reconciliation::matcher::reconcile;
use crate::reconciliation::report::{ReconciliationReport, SourceSummary};
use crate::traits::*;
use crate::types::*;

/// Knobs for a single run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Upper bound for each fetch, connection setup included
    pub deadline: Option<Duration>,
    /// Fetch both sources at the same time instead of one after the other
    pub concurrent: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            deadline: Some(Duration::from_secs(300)),
            concurrent: true,
        }
    }
}

/// Reconciliation engine comparing the key columns of two sources
///
/// Either both fetches succeed and a full report comes back, or the run
/// aborts with the failing source named. There is no partial report.
pub struct ReconciliationEngine<A: KeySource, B: KeySource> {
    first: A,
    second: B,
    events: Arc<dyn ReconEvents>,
    options: RunOptions,
}

impl<A: KeySource, B: KeySource> ReconciliationEngine<A, B> {
    /// Create an engine that logs through `tracing`
    pub fn new(first: A, second: B) -> Self {
        Self {
            first,
            second,
            events: Arc::new(TracingEvents),
            options: RunOptions::default(),
        }
    }

    /// Replace the event sink
    pub fn with_events(mut self, events: Arc<dyn ReconEvents>) -> Self {
        self.events = events;
        self
    }

    /// Replace the run options
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Options in effect
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Fetch both sides and compare them
    pub async fn run(&self) -> ReconResult<ReconciliationReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        self.events.record(ReconEvent::RunStarted {
            run_id,
            first: self.first.label().clone(),
            second: self.second.label().clone(),
            concurrent: self.options.concurrent,
        });

        let fetched = if self.options.concurrent {
            tokio::try_join!(self.fetch(&self.first), self.fetch(&self.second))
        } else {
            match self.fetch(&self.first).await {
                Ok(first) => self.fetch(&self.second).await.map(|second| (first, second)),
                Err(err) => Err(err),
            }
        };
        let (first_keys, second_keys) = fetched.map_err(|err| {
            self.events.record(ReconEvent::RunAborted {
                run_id,
                label: err.label().clone(),
                operation: err.operation().to_string(),
                message: err.to_string(),
            });
            ReconError::FetchAbort(err)
        })?;

        let result = reconcile(&first_keys, &second_keys);
        let report = ReconciliationReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            first: SourceSummary {
                label: self.first.label().clone(),
                rows: first_keys.len(),
            },
            second: SourceSummary {
                label: self.second.label().clone(),
                rows: second_keys.len(),
            },
            result,
        };

        for discrepancy in report.discrepancies() {
            self.events.record(ReconEvent::KeyMissing {
                key: discrepancy.key,
                missing_from: discrepancy.missing_from,
                present_in: discrepancy.present_in,
            });
        }
        self.events.record(ReconEvent::Reconciled {
            missing_in_first: report.result.missing_in_first.len(),
            missing_in_second: report.result.missing_in_second.len(),
        });

        Ok(report)
    }

    async fn fetch<S: KeySource>(&self, source: &S) -> FetchResult<ResultSequence> {
        let label = source.label();
        let started = Instant::now();
        self.events.record(ReconEvent::FetchStarted {
            label: label.clone(),
            query: source.query().to_string(),
        });

        let fetched = match self.options.deadline {
            Some(deadline) => {
                match tokio::time::timeout(deadline, source.fetch_keys(self.events.as_ref())).await
                {
                    Ok(fetched) => fetched,
                    Err(_) => Err(FetchError::Timeout {
                        label: label.clone(),
                        deadline,
                    }),
                }
            }
            None => source.fetch_keys(self.events.as_ref()).await,
        };

        match &fetched {
            Ok(keys) => self.events.record(ReconEvent::FetchCompleted {
                label: label.clone(),
                rows: keys.len(),
                elapsed: started.elapsed(),
            }),
            Err(err) => self.events.record(ReconEvent::FetchFailed {
                label: label.clone(),
                operation: err.operation().to_string(),
                message: err.to_string(),
            }),
        }

        fetched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{MemoryEvents, MemorySource};

    fn engine(
        first: MemorySource,
        second: MemorySource,
    ) -> (ReconciliationEngine<MemorySource, MemorySource>, MemoryEvents) {
        let events = MemoryEvents::new();
        let engine =
            ReconciliationEngine::new(first, second).with_events(Arc::new(events.clone()));
        (engine, events)
    }

    #[tokio::test]
    async fn test_run_reports_multiset_gaps() {
        let first = MemorySource::new("postgres", ["acc1", "acc2", "acc2"]);
        let second = MemorySource::new("db2", ["acc2", "acc3"]);
        let (engine, events) = engine(first, second);

        let report = engine.run().await.unwrap();

        assert_eq!(report.first.rows, 3);
        assert_eq!(report.second.rows, 2);
        assert_eq!(
            report.result.missing_in_second,
            vec![AccountKey::from("acc1"), AccountKey::from("acc2")]
        );
        assert_eq!(report.result.missing_in_first, vec![AccountKey::from("acc3")]);

        let missing: Vec<ReconEvent> = events
            .events()
            .into_iter()
            .filter(|e| matches!(e, ReconEvent::KeyMissing { .. }))
            .collect();
        assert_eq!(missing.len(), 3);
        assert_eq!(
            missing[2],
            ReconEvent::KeyMissing {
                key: "acc3".into(),
                missing_from: "postgres".into(),
                present_in: "db2".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_connection_fault_aborts_run() {
        let first = MemorySource::new("postgres", ["acc1"]);
        let second = MemorySource::new("db2", ["acc1"]).failing_connection("connection refused");
        let (engine, events) = engine(first.clone(), second.clone());

        let err = engine.run().await.unwrap_err();

        assert!(matches!(
            &err,
            ReconError::FetchAbort(FetchError::Connection { label, .. }) if label.as_str() == "db2"
        ));
        assert!(!events
            .events()
            .iter()
            .any(|e| matches!(e, ReconEvent::KeyMissing { .. } | ReconEvent::Reconciled { .. })));
        assert_eq!(first.open_connections(), 0);
        assert_eq!(second.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_run_start_and_abort_go_through_the_sink() {
        let first = MemorySource::new("postgres", ["acc1"]);
        let second = MemorySource::new("db2", ["acc1"]).failing_query("SQL0204N");
        let (engine, events) = engine(first, second);

        engine.run().await.unwrap_err();

        let recorded = events.events();
        let run_id = match recorded.first() {
            Some(ReconEvent::RunStarted {
                run_id,
                first,
                second,
                concurrent: true,
            }) if first.as_str() == "postgres" && second.as_str() == "db2" => *run_id,
            other => panic!("expected RunStarted first, got {:?}", other),
        };
        match recorded.last() {
            Some(ReconEvent::RunAborted {
                run_id: aborted,
                label,
                operation,
                message,
            }) => {
                assert_eq!(*aborted, run_id);
                assert_eq!(label.as_str(), "db2");
                assert_eq!(operation, "query");
                assert!(message.contains("SQL0204N"));
            }
            other => panic!("expected RunAborted last, got {:?}", other),
        }
        let aborts = recorded
            .iter()
            .filter(|e| matches!(e, ReconEvent::RunAborted { .. }))
            .count();
        assert_eq!(aborts, 1);
    }

    #[tokio::test]
    async fn test_successful_run_records_no_abort() {
        let first = MemorySource::new("postgres", ["acc1"]);
        let second = MemorySource::new("db2", ["acc1"]);
        let (engine, events) = engine(first, second);

        engine.run().await.unwrap();

        let recorded = events.events();
        assert!(matches!(recorded.first(), Some(ReconEvent::RunStarted { .. })));
        assert!(matches!(recorded.last(), Some(ReconEvent::Reconciled { .. })));
        assert!(!recorded
            .iter()
            .any(|e| matches!(e, ReconEvent::RunAborted { .. })));
    }

    #[tokio::test]
    async fn test_sequential_run_stops_at_first_failure() {
        let first = MemorySource::new("postgres", ["acc1"]).failing_query("syntax error");
        let second = MemorySource::new("db2", ["acc1"]);
        let (engine, _events) = engine(first, second.clone());
        let engine = engine.with_options(RunOptions {
            deadline: None,
            concurrent: false,
        });

        let err = engine.run().await.unwrap_err();

        assert_eq!(err.failed_source(), Some(&SourceLabel::from("postgres")));
        assert_eq!(second.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_names_slow_source() {
        let first = MemorySource::new("postgres", ["acc1"]);
        let second = MemorySource::new("db2", ["acc1"]).with_delay(Duration::from_secs(60));
        let (engine, _events) = engine(first, second.clone());
        let engine = engine.with_options(RunOptions {
            deadline: Some(Duration::from_secs(5)),
            concurrent: true,
        });

        let err = engine.run().await.unwrap_err();

        assert!(matches!(
            err,
            ReconError::FetchAbort(FetchError::Timeout { ref label, .. }) if label.as_str() == "db2"
        ));
        assert_eq!(second.open_connections(), 0);
    }
}
