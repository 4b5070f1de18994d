//! The bulk execution engine: rate limiting, retries, per-target execution,
//! outcome accounting and the run orchestrator.

pub mod executor;
pub mod ledger;
pub mod rate_limit;
pub mod retry;
pub mod runner;
pub mod targets;
pub mod types;

#[cfg(test)]
mod testing;

pub use executor::OperationExecutor;
pub use ledger::{LedgerSummary, ProgressUpdate, ResultLedger, RunReport};
pub use rate_limit::{RateClassConfig, RateLimiter, RateLimits};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use runner::{AbortReason, BulkRunner, CancelHandle, ExecutionPlan, RunState};
pub use targets::TargetSource;
pub use types::{ErrorKind, OperationClass, OperationOutcome, Target, TargetId, TargetPayload};
