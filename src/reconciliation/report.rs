//! Reconciliation report produced by a completed run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::reconciliation::matcher::{tally, KeyTally};
use crate::traits::Side;
use crate::types::*;

/// Row count fetched from one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub label: SourceLabel,
    pub rows: usize,
}

/// One unmatched occurrence, tagged with where it is missing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub key: AccountKey,
    pub side: Side,
    pub missing_from: SourceLabel,
    pub present_in: SourceLabel,
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Account missing in {}: {} (present in {})",
            self.missing_from, self.key, self.present_in
        )
    }
}

/// Full outcome of one reconciliation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub first: SourceSummary,
    pub second: SourceSummary,
    pub result: ReconciliationResult,
}

impl ReconciliationReport {
    /// True when every occurrence on each side found a partner
    pub fn is_reconciled(&self) -> bool {
        self.result.is_empty()
    }

    /// Report lines, first-source gaps before second-source gaps
    pub fn discrepancies(&self) -> impl Iterator<Item = Discrepancy> + '_ {
        let missing_in_second = self.result.missing_in_second.iter().map(|key| Discrepancy {
            key: key.clone(),
            side: Side::Second,
            missing_from: self.second.label.clone(),
            present_in: self.first.label.clone(),
        });
        let missing_in_first = self.result.missing_in_first.iter().map(|key| Discrepancy {
            key: key.clone(),
            side: Side::First,
            missing_from: self.first.label.clone(),
            present_in: self.second.label.clone(),
        });
        missing_in_second.chain(missing_in_first)
    }

    /// Unmatched counts per key
    pub fn tally(&self) -> BTreeMap<AccountKey, KeyTally> {
        tally(&self.result)
    }

    /// Wall-clock duration of the run
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
