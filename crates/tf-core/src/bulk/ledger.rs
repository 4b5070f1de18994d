use std::{collections::HashSet, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{
    bulk::{
        runner::RunState,
        types::{ErrorKind, Execution, OperationClass, OperationOutcome, Target, TargetId},
    },
    errors::Error,
    Result,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordedOutcome {
    pub target_id: TargetId,
    pub label: Option<String>,
    pub class: OperationClass,
    pub outcome: OperationOutcome,
    /// Remote calls spent on this target.
    pub calls: u32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedTarget {
    pub target_id: TargetId,
    pub label: Option<String>,
    pub error_kind: ErrorKind,
    pub message: String,
    pub retriable: bool,
}

/// What one `record` changed, for progress reporting and abort checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub counts: OutcomeCounts,
    /// Failures in a row, ignoring flood-control failures.
    pub consecutive_failures: usize,
    pub last: RecordedOutcome,
}

/// Point-in-time copy of the whole ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerSummary {
    pub counts: OutcomeCounts,
    pub consecutive_failures: usize,
    pub failures: Vec<FailedTarget>,
    /// Every recorded outcome, in completion order.
    pub outcomes: Vec<RecordedOutcome>,
}

/// How a run ended, handed to `finalize`.
#[derive(Clone, Debug)]
pub struct Termination {
    pub state: RunState,
    pub undispatched: Vec<TargetId>,
    pub total_flood_wait: Duration,
}

/// Immutable accounting of one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub counts: OutcomeCounts,
    pub failures: Vec<FailedTarget>,
    pub outcomes: Vec<RecordedOutcome>,
    /// Targets never handed to a worker (cancel/abort).
    pub undispatched: Vec<TargetId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub total_flood_wait: Duration,
}

impl RunReport {
    pub fn failed_target_ids(&self) -> impl Iterator<Item = &TargetId> + '_ {
        self.failures.iter().map(|f| &f.target_id)
    }

    /// One-line human summary.
    pub fn headline(&self) -> String {
        format!(
            "{}: {} attempted, {} succeeded, {} skipped, {} failed, {} not dispatched",
            self.state,
            self.counts.attempted,
            self.counts.succeeded,
            self.counts.skipped,
            self.counts.failed,
            self.undispatched.len()
        )
    }
}

#[derive(Debug)]
struct LedgerState {
    seen: HashSet<TargetId>,
    outcomes: Vec<RecordedOutcome>,
    failures: Vec<FailedTarget>,
    counts: OutcomeCounts,
    consecutive_failures: usize,
    report: Option<RunReport>,
}

/// Per-target outcomes of a run; one entry per dispatched target.
#[derive(Debug)]
pub struct ResultLedger {
    started_at: DateTime<Utc>,
    started: Instant,
    state: Mutex<LedgerState>,
}

impl Default for ResultLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultLedger {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            state: Mutex::new(LedgerState {
                seen: HashSet::new(),
                outcomes: Vec::new(),
                failures: Vec::new(),
                counts: OutcomeCounts::default(),
                consecutive_failures: 0,
                report: None,
            }),
        }
    }

    /// Record the single outcome of `target`.
    ///
    /// A second record for the same target is a caller bug and is rejected
    /// without touching the counters.
    pub async fn record(&self, target: &Target, execution: Execution) -> Result<ProgressUpdate> {
        let mut st = self.state.lock().await;
        if st.report.is_some() {
            return Err(Error::InvalidState(format!(
                "ledger already finalized, cannot record {}",
                target.id
            )));
        }
        if !st.seen.insert(target.id.clone()) {
            return Err(Error::DuplicateOutcome(target.id.to_string()));
        }

        st.counts.attempted += 1;
        match &execution.outcome {
            OperationOutcome::Success { .. } => {
                st.counts.succeeded += 1;
                st.consecutive_failures = 0;
            }
            OperationOutcome::Skipped { .. } => {
                st.counts.skipped += 1;
                st.consecutive_failures = 0;
            }
            OperationOutcome::Failed {
                error_kind,
                message,
                retriable,
            } => {
                st.counts.failed += 1;
                if !error_kind.is_flood_control() {
                    st.consecutive_failures += 1;
                }
                st.failures.push(FailedTarget {
                    target_id: target.id.clone(),
                    label: target.label.clone(),
                    error_kind: *error_kind,
                    message: message.clone(),
                    retriable: *retriable,
                });
            }
        }

        let last = RecordedOutcome {
            target_id: target.id.clone(),
            label: target.label.clone(),
            class: target.class(),
            outcome: execution.outcome,
            calls: execution.calls,
            completed_at: Utc::now(),
        };
        st.outcomes.push(last.clone());

        Ok(ProgressUpdate {
            counts: st.counts,
            consecutive_failures: st.consecutive_failures,
            last,
        })
    }

    /// Counts and every outcome recorded so far.
    pub async fn summary(&self) -> LedgerSummary {
        let st = self.state.lock().await;
        LedgerSummary {
            counts: st.counts,
            consecutive_failures: st.consecutive_failures,
            failures: st.failures.clone(),
            outcomes: st.outcomes.clone(),
        }
    }

    /// Produce the run report. The first call freezes the ledger; later calls
    /// return the same report and ignore their argument.
    pub async fn finalize(&self, termination: Termination) -> RunReport {
        let mut st = self.state.lock().await;
        if let Some(report) = &st.report {
            return report.clone();
        }

        let report = RunReport {
            state: termination.state,
            counts: st.counts,
            failures: st.failures.clone(),
            outcomes: st.outcomes.clone(),
            undispatched: termination.undispatched,
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed: self.started.elapsed(),
            total_flood_wait: termination.total_flood_wait,
        };
        st.report = Some(report.clone());
        report
    }
}
