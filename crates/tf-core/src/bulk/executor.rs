use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    bulk::{
        rate_limit::RateLimiter,
        retry::{RetryDecision, RetryPolicy},
        types::{ErrorKind, Execution, OperationClass, OperationOutcome, Target, TargetPayload},
    },
    remote::{
        port::RemoteClient,
        types::{RemoteError, RemoteErrorKind},
    },
    sinks::MediaStore,
};

/// Skip reason for a target whose turn never came because the run stopped.
pub const STOPPED_BEFORE_DISPATCH: &str = "run stopped before dispatch";

/// Performs one target against the remote client, gated by the rate limiter
/// and driven by the retry policy.
pub struct OperationExecutor {
    remote: Arc<dyn RemoteClient>,
    media: Arc<dyn MediaStore>,
    limiter: RateLimiter,
    policy: RetryPolicy,
}

/// A failed attempt, already classified.
struct Attempt {
    kind: ErrorKind,
    message: String,
}

impl OperationExecutor {
    pub fn new(
        remote: Arc<dyn RemoteClient>,
        media: Arc<dyn MediaStore>,
        limiter: RateLimiter,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            remote,
            media,
            limiter,
            policy,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `target` to a single outcome.
    ///
    /// `stop` is honored only while waiting (for a rate slot or a retry);
    /// a remote call that has started always completes.
    pub async fn execute(&self, target: &Target, stop: &CancellationToken) -> Execution {
        if let Some(reason) = precheck(target) {
            return Execution {
                outcome: OperationOutcome::skipped(reason),
                calls: 0,
            };
        }

        let class = target.class();
        let mut calls = 0u32;
        let mut attempts = 0u32;
        let mut backoff: Option<Duration> = None;
        let mut last: Option<Attempt> = None;

        loop {
            let admitted = tokio::select! {
                biased;
                _ = stop.cancelled() => false,
                _ = self.wait_turn(class, backoff.take()) => true,
            };
            if !admitted {
                let outcome = match last {
                    None => OperationOutcome::skipped(STOPPED_BEFORE_DISPATCH),
                    Some(a) => OperationOutcome::failed(
                        a.kind,
                        format!("run stopped before retry: {}", a.message),
                    ),
                };
                return Execution { outcome, calls };
            }

            calls += 1;
            debug!("{} {} (call {calls})", class, target.id);
            let failure = match self.perform(target).await {
                Ok(outcome) => return Execution { outcome, calls },
                Err(failure) => failure,
            };

            if !failure.kind.is_flood_control() {
                attempts += 1;
            }

            match self.policy.decide(failure.kind, attempts) {
                RetryDecision::GiveUp => {
                    debug!("{} gave up after {calls} call(s): {}", target.id, failure.message);
                    return Execution {
                        outcome: OperationOutcome::failed(failure.kind, failure.message),
                        calls,
                    };
                }
                RetryDecision::Retry {
                    after,
                    pause_class: true,
                } => {
                    let until = self.limiter.register_pause(class, after).await;
                    warn!(
                        "flood control on {class}: pausing {}s (until {:?})",
                        after.as_secs(),
                        until
                    );
                    let total = self.limiter.total_flood_wait().await;
                    if self.policy.flood_budget_exceeded(total) {
                        return Execution {
                            outcome: OperationOutcome::failed(
                                failure.kind,
                                format!(
                                    "flood wait budget exhausted ({}s accumulated): {}",
                                    total.as_secs(),
                                    failure.message
                                ),
                            ),
                            calls,
                        };
                    }
                    // The class pause is the wait: the next acquire blocks until it ends.
                }
                RetryDecision::Retry { after, .. } => {
                    warn!(
                        "{} attempt {attempts} failed ({}), retrying in {}ms",
                        target.id,
                        failure.kind,
                        after.as_millis()
                    );
                    backoff = Some(after);
                }
            }
            last = Some(failure);
        }
    }

    async fn wait_turn(&self, class: OperationClass, backoff: Option<Duration>) {
        if let Some(delay) = backoff {
            tokio::time::sleep(delay).await;
        }
        self.limiter.acquire(class).await;
    }

    async fn perform(&self, target: &Target) -> Result<OperationOutcome, Attempt> {
        match &target.payload {
            TargetPayload::SendMessage { recipient, text } => {
                let sent = self
                    .remote
                    .send_message(*recipient, text)
                    .await
                    .map_err(classify)?;
                Ok(OperationOutcome::success(format!(
                    "sent as message {}",
                    sent.message_id.0
                )))
            }
            TargetPayload::DownloadMedia { message, media } => {
                let Some(downloaded) = self
                    .remote
                    .download_media(*message, media)
                    .await
                    .map_err(classify)?
                else {
                    return Ok(OperationOutcome::skipped("no downloadable media"));
                };
                let saved = self
                    .media
                    .store(target, *message, media, downloaded)
                    .await
                    .map_err(|e| Attempt {
                        kind: ErrorKind::Storage,
                        message: format!("failed to store media: {e}"),
                    })?;
                Ok(OperationOutcome::success(saved))
            }
            TargetPayload::DeleteMessage { message } => {
                self.remote.delete_message(*message).await.map_err(classify)?;
                Ok(OperationOutcome::success("message deleted"))
            }
            TargetPayload::DeleteContact { user } => {
                self.remote.delete_contact(*user).await.map_err(classify)?;
                Ok(OperationOutcome::success("contact deleted"))
            }
            TargetPayload::ArchiveChat { chat } => {
                self.remote.archive_chat(*chat).await.map_err(classify)?;
                Ok(OperationOutcome::success("chat archived"))
            }
        }
    }
}

/// Outcomes that need no remote call.
fn precheck(target: &Target) -> Option<&'static str> {
    match &target.payload {
        TargetPayload::SendMessage { text, .. } if text.trim().is_empty() => {
            Some("empty message text")
        }
        _ => None,
    }
}

fn classify(err: RemoteError) -> Attempt {
    let kind = match err.kind {
        RemoteErrorKind::FloodWait(wait) => ErrorKind::FloodControl { wait },
        RemoteErrorKind::PeerFlood => ErrorKind::AccountRestricted,
        RemoteErrorKind::Timeout | RemoteErrorKind::Network => ErrorKind::Transient,
        RemoteErrorKind::Forbidden | RemoteErrorKind::PrivacyRestricted => {
            ErrorKind::PermissionDenied
        }
        RemoteErrorKind::NotFound => ErrorKind::NotFound,
        RemoteErrorKind::BadRequest => ErrorKind::InvalidTarget,
        RemoteErrorKind::Other => ErrorKind::Unknown,
    };
    Attempt {
        kind,
        message: err.message,
    }
}
