//! Logging bootstrap and the `tracing`-backed event sink

use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;

use crate::traits::*;

/// Install a formatted subscriber writing to stderr
///
/// `RUST_LOG` wins over `level` when set. Calling this more than once is
/// harmless; only the first subscriber is installed.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Event sink that forwards to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl ReconEvents for TracingEvents {
    fn record(&self, event: ReconEvent) {
        match event {
            ReconEvent::RunStarted {
                run_id,
                first,
                second,
                concurrent,
            } => info!(
                %run_id,
                first = %first,
                second = %second,
                concurrent,
                "Starting reconciliation run"
            ),
            ReconEvent::FetchStarted { label, query } => {
                info!(source = %label, %query, "Fetching keys")
            }
            ReconEvent::ConnectionOpened { label } => debug!(source = %label, "Connection opened"),
            ReconEvent::RowFetched { label, row, key } => {
                trace!(source = %label, row, %key, "Row fetched")
            }
            ReconEvent::FetchCompleted {
                label,
                rows,
                elapsed,
            } => info!(
                source = %label,
                rows,
                elapsed_ms = elapsed.as_millis() as u64,
                "Fetch completed"
            ),
            ReconEvent::ConnectionClosed { label } => debug!(source = %label, "Connection closed"),
            ReconEvent::FetchFailed {
                label,
                operation,
                message,
            } => warn!(source = %label, %operation, error = %message, "Fetch failed"),
            ReconEvent::KeyMissing {
                key,
                missing_from,
                present_in,
            } => info!(
                %key,
                missing_from = %missing_from,
                present_in = %present_in,
                "Account missing in {}",
                missing_from
            ),
            ReconEvent::Reconciled {
                missing_in_first,
                missing_in_second,
            } => info!(missing_in_first, missing_in_second, "Reconciliation complete"),
            ReconEvent::RunAborted {
                run_id,
                label,
                operation,
                message,
            } => error!(
                %run_id,
                source = %label,
                %operation,
                error = %message,
                "Reconciliation aborted"
            ),
        }
    }
}
