use std::time::Duration;

use crate::bulk::types::ErrorKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Ceiling on non-flood attempts per target (first try included).
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Ceiling on flood-control pause accumulated over a whole run.
    /// `None` lets the service pause us for as long as it likes.
    pub max_total_flood_wait: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            max_total_flood_wait: Some(Duration::from_secs(3600)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `after`, then try again. `pause_class` asks the caller to block
    /// the whole operation class for that long, not just this target.
    Retry { after: Duration, pause_class: bool },
    GiveUp,
}

/// Decides what happens after a failed attempt. Pure: waiting and
/// re-dispatching belong to the executor.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryPolicy {
    cfg: RetryConfig,
}

impl RetryPolicy {
    pub fn new(cfg: RetryConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.cfg
    }

    /// `attempts` is the number of non-flood attempts already made.
    pub fn decide(&self, kind: ErrorKind, attempts: u32) -> RetryDecision {
        match kind {
            // An instruction from the service, not a fault: never counted.
            ErrorKind::FloodControl { wait } => RetryDecision::Retry {
                after: wait,
                pause_class: true,
            },
            ErrorKind::Transient | ErrorKind::Unknown if attempts < self.cfg.max_attempts => {
                RetryDecision::Retry {
                    after: self.backoff(attempts),
                    pause_class: false,
                }
            }
            ErrorKind::PermissionDenied
            | ErrorKind::NotFound
            | ErrorKind::InvalidTarget
            | ErrorKind::AccountRestricted
            | ErrorKind::Storage => RetryDecision::GiveUp,
            _ => RetryDecision::GiveUp,
        }
    }

    /// `base * 2^(attempts-1)`, capped.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(20);
        self.cfg
            .backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.cfg.backoff_cap)
    }

    pub fn flood_budget_exceeded(&self, total_flood_wait: Duration) -> bool {
        self.cfg
            .max_total_flood_wait
            .is_some_and(|max| total_flood_wait > max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(2),
            max_total_flood_wait: Some(Duration::from_secs(60)),
        })
    }

    #[test]
    fn flood_control_always_retries_with_advertised_wait() {
        let p = policy();
        let wait = Duration::from_secs(30);
        for attempts in [0, 1, 3, 100] {
            assert_eq!(
                p.decide(ErrorKind::FloodControl { wait }, attempts),
                RetryDecision::Retry {
                    after: wait,
                    pause_class: true
                }
            );
        }
    }

    #[test]
    fn terminal_kinds_give_up_immediately() {
        let p = policy();
        for kind in [
            ErrorKind::PermissionDenied,
            ErrorKind::NotFound,
            ErrorKind::InvalidTarget,
            ErrorKind::AccountRestricted,
            ErrorKind::Storage,
        ] {
            assert_eq!(p.decide(kind, 1), RetryDecision::GiveUp, "{kind}");
        }
    }

    #[test]
    fn transient_backs_off_exponentially_until_ceiling() {
        let p = policy();
        assert_eq!(
            p.decide(ErrorKind::Transient, 1),
            RetryDecision::Retry {
                after: Duration::from_millis(500),
                pause_class: false
            }
        );
        assert_eq!(
            p.decide(ErrorKind::Unknown, 2),
            RetryDecision::Retry {
                after: Duration::from_secs(1),
                pause_class: false
            }
        );
        assert_eq!(p.decide(ErrorKind::Transient, 3), RetryDecision::GiveUp);
        assert_eq!(p.decide(ErrorKind::Unknown, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn backoff_is_capped() {
        let p = policy();
        assert_eq!(p.backoff(3), Duration::from_secs(2));
        assert_eq!(p.backoff(64), Duration::from_secs(2));
    }

    #[test]
    fn flood_budget_is_optional() {
        assert!(policy().flood_budget_exceeded(Duration::from_secs(61)));
        assert!(!policy().flood_budget_exceeded(Duration::from_secs(60)));

        let unbounded = RetryPolicy::new(RetryConfig {
            max_total_flood_wait: None,
            ..RetryConfig::default()
        });
        assert!(!unbounded.flood_budget_exceeded(Duration::from_secs(u64::MAX / 4)));
    }
}
