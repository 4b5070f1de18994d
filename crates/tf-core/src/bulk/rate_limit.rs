//! Per operation-class call spacing and flood-control pauses.
//!
//! Each class owns one `RateBudget` behind an async mutex. Admission happens
//! under that lock and records the call time before releasing it, so two
//! waiters can never both act on a stale "last call" and proceed together.

use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

use crate::bulk::types::OperationClass;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateClassConfig {
    /// Minimum spacing between two admitted calls of the class.
    pub min_interval: Duration,
    /// Extra random spacing (`0..=jitter`) added after each admitted call.
    pub jitter: Duration,
}

impl RateClassConfig {
    pub fn fixed(min_interval: Duration) -> Self {
        Self {
            min_interval,
            jitter: Duration::ZERO,
        }
    }
}

/// Spacing configuration for every operation class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimits {
    pub send_message: RateClassConfig,
    pub download_media: RateClassConfig,
    pub delete_contact: RateClassConfig,
    pub archive_chat: RateClassConfig,
    pub delete_message: RateClassConfig,
}

impl Default for RateLimits {
    fn default() -> Self {
        // Direct messages to strangers are what gets accounts banned: 45-90s apart.
        Self {
            send_message: RateClassConfig {
                min_interval: Duration::from_secs(45),
                jitter: Duration::from_secs(45),
            },
            download_media: RateClassConfig::fixed(Duration::from_millis(250)),
            delete_contact: RateClassConfig::fixed(Duration::from_millis(1000)),
            archive_chat: RateClassConfig::fixed(Duration::from_millis(100)),
            delete_message: RateClassConfig::fixed(Duration::from_millis(1000)),
        }
    }
}

impl RateLimits {
    /// Same spacing for every class, no jitter.
    pub fn uniform(min_interval: Duration) -> Self {
        let cfg = RateClassConfig::fixed(min_interval);
        Self {
            send_message: cfg,
            download_media: cfg,
            delete_contact: cfg,
            archive_chat: cfg,
            delete_message: cfg,
        }
    }

    pub fn for_class(&self, class: OperationClass) -> RateClassConfig {
        match class {
            OperationClass::SendMessage => self.send_message,
            OperationClass::DownloadMedia => self.download_media,
            OperationClass::DeleteContact => self.delete_contact,
            OperationClass::ArchiveChat => self.archive_chat,
            OperationClass::DeleteMessage => self.delete_message,
        }
    }
}

/// Rate state of one operation class for the duration of a run.
#[derive(Debug)]
pub struct RateBudget {
    cfg: RateClassConfig,
    last_call: Option<Instant>,
    next_allowed: Option<Instant>,
    paused_until: Option<Instant>,
    flood_wait: Duration,
}

impl RateBudget {
    fn new(cfg: RateClassConfig) -> Self {
        Self {
            cfg,
            last_call: None,
            next_allowed: None,
            paused_until: None,
            flood_wait: Duration::ZERO,
        }
    }

    /// Earliest instant at which the next call is legal.
    fn ready_at(&self) -> Option<Instant> {
        match (self.next_allowed, self.paused_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Admit a call at `now` if legal, otherwise report when to come back.
    fn try_admit(&mut self, now: Instant) -> Result<(), Instant> {
        if let Some(ready) = self.ready_at() {
            if now < ready {
                return Err(ready);
            }
        }

        self.last_call = Some(now);
        let spacing = self.cfg.min_interval.saturating_add(self.jitter());
        self.next_allowed = Some(deadline(now, spacing));
        Ok(())
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.cfg.jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Extend (never shrink) the pause; returns the effective deadline.
    fn extend_pause(&mut self, now: Instant, duration: Duration) -> Instant {
        let requested = deadline(now, duration);
        let current = self.paused_until.filter(|p| *p > now);
        match current {
            Some(existing) if existing >= requested => existing,
            Some(existing) => {
                self.flood_wait = self.flood_wait.saturating_add(requested - existing);
                self.paused_until = Some(requested);
                requested
            }
            None => {
                self.flood_wait = self.flood_wait.saturating_add(requested - now);
                self.paused_until = Some(requested);
                requested
            }
        }
    }
}

/// Stand-in for deadlines too far out for `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, saturating at a far-future instant instead of overflowing.
fn deadline(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Shared gate in front of every remote call of a run.
///
/// Cloning is cheap and shares the underlying budgets.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    budgets: Arc<[Mutex<RateBudget>; 5]>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        let budgets =
            OperationClass::ALL.map(|class| Mutex::new(RateBudget::new(limits.for_class(class))));
        Self {
            budgets: Arc::new(budgets),
        }
    }

    fn budget(&self, class: OperationClass) -> &Mutex<RateBudget> {
        let idx = match class {
            OperationClass::SendMessage => 0,
            OperationClass::DownloadMedia => 1,
            OperationClass::DeleteContact => 2,
            OperationClass::ArchiveChat => 3,
            OperationClass::DeleteMessage => 4,
        };
        &self.budgets[idx]
    }

    /// Wait until a call of `class` is legal, then record it.
    ///
    /// Re-checks after every sleep: a pause registered while we were waiting
    /// pushes the admission further out.
    pub async fn acquire(&self, class: OperationClass) {
        let budget = self.budget(class);
        loop {
            let ready = {
                let mut guard = budget.lock().await;
                match guard.try_admit(Instant::now()) {
                    Ok(()) => return,
                    Err(ready) => ready,
                }
            };
            sleep_until(ready).await;
        }
    }

    /// Block the whole class for `duration` from now (flood control).
    pub async fn register_pause(&self, class: OperationClass, duration: Duration) -> Instant {
        let mut guard = self.budget(class).lock().await;
        guard.extend_pause(Instant::now(), duration)
    }

    pub async fn paused_until(&self, class: OperationClass) -> Option<Instant> {
        let guard = self.budget(class).lock().await;
        guard.paused_until.filter(|p| *p > Instant::now())
    }

    pub async fn last_call(&self, class: OperationClass) -> Option<Instant> {
        self.budget(class).lock().await.last_call
    }

    /// Pause time actually imposed by flood control across all classes.
    pub async fn total_flood_wait(&self) -> Duration {
        let mut total = Duration::ZERO;
        for budget in self.budgets.iter() {
            total = total.saturating_add(budget.lock().await.flood_wait);
        }
        total
    }
}
