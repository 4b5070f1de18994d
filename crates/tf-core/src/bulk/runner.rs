//! Orchestrates one bulk run: a bounded pool of workers pulling targets from
//! a shared queue, executing them, and recording outcomes in the ledger.

use std::{
    collections::{HashSet, VecDeque},
    fmt,
    sync::{Arc, OnceLock},
    time::Duration,
};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    bulk::{
        executor::{OperationExecutor, STOPPED_BEFORE_DISPATCH},
        ledger::{ProgressUpdate, ResultLedger, RunReport, Termination},
        rate_limit::{RateLimiter, RateLimits},
        retry::{RetryConfig, RetryPolicy},
        targets::TargetSource,
        types::{ErrorKind, OperationClass, OperationOutcome, Target, TargetId},
    },
    errors::Error,
    remote::port::RemoteClient,
    sinks::{MediaStore, ProgressSink, ReportSink},
    Result,
};

pub const DEFAULT_READ_ONLY_CONCURRENCY: usize = 4;
pub const DEFAULT_ABORT_THRESHOLD: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Aborted { reason: AbortReason },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Aborted { .. }
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Running => f.write_str("running"),
            RunState::Completed => f.write_str("completed"),
            RunState::Cancelled => f.write_str("cancelled"),
            RunState::Aborted { reason } => write!(f, "aborted ({reason})"),
        }
    }
}

/// Why a run stopped on its own, as opposed to a user cancellation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum AbortReason {
    ConsecutiveFailures { count: usize },
    AccountRestricted { target_id: TargetId },
    FloodWaitBudgetExhausted { total: Duration },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::ConsecutiveFailures { count } => {
                write!(f, "{count} consecutive failures")
            }
            AbortReason::AccountRestricted { target_id } => {
                write!(f, "account restricted by the service at {target_id}")
            }
            AbortReason::FloodWaitBudgetExhausted { total } => {
                write!(f, "flood wait budget exhausted after {}s", total.as_secs())
            }
        }
    }
}

/// Everything a run needs besides the collaborators.
#[derive(Clone, Debug)]
pub struct ExecutionPlan {
    pub targets: TargetSource,
    /// Simultaneous in-flight targets, at least 1.
    pub concurrency: usize,
    pub retry: RetryConfig,
    /// Abort once more than this many non-flood failures happen in a row.
    pub abort_after_consecutive_failures: Option<usize>,
}

impl ExecutionPlan {
    pub fn new(targets: TargetSource) -> Self {
        let concurrency = Self::default_concurrency(&targets, DEFAULT_READ_ONLY_CONCURRENCY);
        Self {
            targets,
            concurrency,
            retry: RetryConfig::default(),
            abort_after_consecutive_failures: Some(DEFAULT_ABORT_THRESHOLD),
        }
    }

    /// 1 unless every target is read-only, then `read_only_bound`.
    pub fn default_concurrency(targets: &TargetSource, read_only_bound: usize) -> usize {
        let classes = targets.classes();
        if !classes.is_empty() && classes.iter().all(|c| c.is_read_only()) {
            read_only_bound.max(1)
        } else {
            1
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_abort_threshold(mut self, threshold: Option<usize>) -> Self {
        self.abort_after_consecutive_failures = threshold;
        self
    }

    /// Fresh plan for what `report` left unfinished: targets never dispatched,
    /// targets stopped before their first call, and retriable failures.
    pub fn remaining_after(&self, report: &RunReport) -> ExecutionPlan {
        let mut wanted: HashSet<&TargetId> = report.undispatched.iter().collect();
        wanted.extend(
            report
                .failures
                .iter()
                .filter(|f| f.retriable)
                .map(|f| &f.target_id),
        );
        wanted.extend(
            report
                .outcomes
                .iter()
                .filter(|o| {
                    o.calls == 0
                        && matches!(&o.outcome, OperationOutcome::Skipped { reason } if reason == STOPPED_BEFORE_DISPATCH)
                })
                .map(|o| &o.target_id),
        );

        let targets = self
            .targets
            .iter()
            .filter(|t| wanted.contains(&t.id))
            .cloned()
            .collect();

        ExecutionPlan {
            targets,
            concurrency: self.concurrency,
            retry: self.retry,
            abort_after_consecutive_failures: self.abort_after_consecutive_failures,
        }
    }
}

#[derive(Clone, Debug)]
enum StopCause {
    Cancelled,
    Aborted(AbortReason),
}

#[derive(Debug, Default)]
struct StopSignal {
    token: CancellationToken,
    cause: OnceLock<StopCause>,
}

impl StopSignal {
    /// First cause wins; returns whether this call was it.
    fn trigger(&self, cause: StopCause) -> bool {
        let first = self.cause.set(cause).is_ok();
        self.token.cancel();
        first
    }
}

/// Requests cooperative cancellation of a run from another task.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    signal: Arc<StopSignal>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if self.signal.trigger(StopCause::Cancelled) {
            info!("cancellation requested; letting in-flight targets finish");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.signal.token.is_cancelled()
    }
}

/// Single-use driver of one bulk run.
pub struct BulkRunner {
    remote: Arc<dyn RemoteClient>,
    media: Arc<dyn MediaStore>,
    limits: RateLimits,
    progress: Option<Arc<dyn ProgressSink>>,
    reports: Option<Arc<dyn ReportSink>>,
    signal: Arc<StopSignal>,
    state: Mutex<RunState>,
}

struct WorkerCtx {
    executor: OperationExecutor,
    ledger: ResultLedger,
    queue: Mutex<VecDeque<Target>>,
    signal: Arc<StopSignal>,
    progress: Option<Arc<dyn ProgressSink>>,
    abort_threshold: Option<usize>,
    total: usize,
}

impl BulkRunner {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        media: Arc<dyn MediaStore>,
        limits: RateLimits,
    ) -> Self {
        Self {
            remote,
            media,
            limits,
            progress: None,
            reports: None,
            signal: Arc::new(StopSignal::default()),
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.reports = Some(sink);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            signal: self.signal.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    pub async fn state(&self) -> RunState {
        self.state.lock().await.clone()
    }

    /// Execute `plan` to a terminal state and return its report.
    ///
    /// Per-target failures never surface as `Err`; only misuse does (starting
    /// a runner twice, or a plan the remote account cannot perform).
    pub async fn start(&self, plan: ExecutionPlan) -> Result<RunReport> {
        {
            let mut st = self.state.lock().await;
            if *st != RunState::Idle {
                return Err(Error::InvalidState(format!(
                    "runner is {st}; a new run needs a new runner"
                )));
            }
            let unsupported: Vec<&str> = plan
                .targets
                .classes()
                .into_iter()
                .filter(|c| !self.remote.supports(*c))
                .map(OperationClass::as_str)
                .collect();
            if !unsupported.is_empty() {
                return Err(Error::InvalidPlan(format!(
                    "this account cannot perform {}",
                    unsupported.join(", ")
                )));
            }
            *st = RunState::Running;
        }

        let limiter = RateLimiter::new(self.limits);
        let total = plan.targets.len();
        let concurrency = plan.concurrency.max(1).min(total.max(1));
        info!(
            "starting bulk run: {total} target(s) [{}], concurrency {concurrency}",
            plan.targets
                .classes()
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let ctx = Arc::new(WorkerCtx {
            executor: OperationExecutor::new(
                self.remote.clone(),
                self.media.clone(),
                limiter.clone(),
                RetryPolicy::new(plan.retry),
            ),
            ledger: ResultLedger::new(),
            queue: Mutex::new(plan.targets.into_vec().into_iter().collect()),
            signal: self.signal.clone(),
            progress: self.progress.clone(),
            abort_threshold: plan.abort_after_consecutive_failures,
            total,
        });

        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            workers.spawn(run_worker(ctx.clone()));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("bulk worker failed: {e}");
            }
        }

        let undispatched: Vec<TargetId> = ctx.queue.lock().await.drain(..).map(|t| t.id).collect();
        let state = match self.signal.cause.get() {
            None => RunState::Completed,
            Some(StopCause::Cancelled) => RunState::Cancelled,
            Some(StopCause::Aborted(reason)) => RunState::Aborted {
                reason: reason.clone(),
            },
        };

        let report = ctx
            .ledger
            .finalize(Termination {
                state: state.clone(),
                undispatched,
                total_flood_wait: limiter.total_flood_wait().await,
            })
            .await;
        *self.state.lock().await = state;

        if let Some(sink) = &self.reports {
            if let Err(e) = sink.persist(&report).await {
                error!("failed to persist run report: {e}");
            }
        }
        info!("{}", report.headline());
        Ok(report)
    }
}

async fn run_worker(ctx: Arc<WorkerCtx>) {
    loop {
        if ctx.signal.token.is_cancelled() {
            break;
        }
        let Some(target) = ctx.queue.lock().await.pop_front() else {
            break;
        };

        let execution = ctx.executor.execute(&target, &ctx.signal.token).await;
        let kind = execution.outcome.error_kind();
        let update = match ctx.ledger.record(&target, execution).await {
            Ok(update) => update,
            Err(e) => {
                error!("ledger rejected outcome of {}: {e}", target.id);
                continue;
            }
        };

        if let Some(progress) = &ctx.progress {
            progress.on_progress(ctx.total, &update);
        }
        ctx.check_abort(&target, kind, &update).await;
    }
}

impl WorkerCtx {
    async fn check_abort(&self, target: &Target, kind: Option<ErrorKind>, update: &ProgressUpdate) {
        let reason = if kind == Some(ErrorKind::AccountRestricted) {
            Some(AbortReason::AccountRestricted {
                target_id: target.id.clone(),
            })
        } else if self
            .abort_threshold
            .is_some_and(|n| update.consecutive_failures > n)
        {
            Some(AbortReason::ConsecutiveFailures {
                count: update.consecutive_failures,
            })
        } else {
            let total = self.executor.limiter().total_flood_wait().await;
            self.executor
                .policy()
                .flood_budget_exceeded(total)
                .then_some(AbortReason::FloodWaitBudgetExhausted { total })
        };

        if let Some(reason) = reason {
            let text = reason.to_string();
            if self.signal.trigger(StopCause::Aborted(reason)) {
                warn!("aborting run: {text}");
            }
        }
    }
}
