use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    bulk::{
        rate_limit::{RateClassConfig, RateLimits},
        retry::RetryConfig,
        runner::{ExecutionPlan, DEFAULT_ABORT_THRESHOLD, DEFAULT_READ_ONLY_CONCURRENCY},
        targets::TargetSource,
    },
    errors::Error,
    Result,
};

/// Typed configuration, read from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: String,

    // Per-class pacing
    pub send_rate: RateClassConfig,
    pub download_rate: RateClassConfig,
    pub delete_contact_rate: RateClassConfig,
    pub archive_rate: RateClassConfig,
    pub delete_message_rate: RateClassConfig,

    // Retries and abort rules
    pub retry: RetryConfig,
    pub abort_after_consecutive_failures: Option<usize>,

    pub download_concurrency: usize,

    // Output
    pub download_dir: PathBuf,
    pub report_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build from any variable lookup; unparsable numbers fall back to defaults.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(lookup);

        let telegram_bot_token = vars.str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let defaults = RateLimits::default();
        let send_rate = vars.rate("SEND", defaults.send_message);
        let download_rate = vars.rate("DOWNLOAD", defaults.download_media);
        let delete_contact_rate = vars.rate("DELETE_CONTACT", defaults.delete_contact);
        let archive_rate = vars.rate("ARCHIVE", defaults.archive_chat);
        let delete_message_rate = vars.rate("DELETE_MESSAGE", defaults.delete_message);

        let retry_defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_attempts: vars
                .u32("RETRY_MAX_ATTEMPTS")
                .unwrap_or(retry_defaults.max_attempts)
                .max(1),
            backoff_base: vars
                .millis("RETRY_BACKOFF_BASE_MS")
                .unwrap_or(retry_defaults.backoff_base),
            backoff_cap: vars
                .millis("RETRY_BACKOFF_CAP_MS")
                .unwrap_or(retry_defaults.backoff_cap),
            // 0 disables the ceiling.
            max_total_flood_wait: match vars.u64("MAX_TOTAL_FLOOD_WAIT_SECS") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => retry_defaults.max_total_flood_wait,
            },
        };

        let abort_after_consecutive_failures =
            match vars.usize("ABORT_AFTER_CONSECUTIVE_FAILURES") {
                Some(0) => None,
                Some(n) => Some(n),
                None => Some(DEFAULT_ABORT_THRESHOLD),
            };

        let download_concurrency = vars
            .usize("DOWNLOAD_CONCURRENCY")
            .unwrap_or(DEFAULT_READ_ONLY_CONCURRENCY)
            .max(1);

        let download_dir = PathBuf::from(vars.str("DOWNLOAD_DIR").unwrap_or("downloads".to_string()));
        let report_dir = PathBuf::from(vars.str("REPORT_DIR").unwrap_or("reports".to_string()));

        Ok(Self {
            telegram_bot_token,
            send_rate,
            download_rate,
            delete_contact_rate,
            archive_rate,
            delete_message_rate,
            retry,
            abort_after_consecutive_failures,
            download_concurrency,
            download_dir,
            report_dir,
        })
    }

    pub fn rate_limits(&self) -> RateLimits {
        RateLimits {
            send_message: self.send_rate,
            download_media: self.download_rate,
            delete_contact: self.delete_contact_rate,
            archive_chat: self.archive_rate,
            delete_message: self.delete_message_rate,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry
    }

    /// Plan for `targets` with this configuration's retry and abort settings.
    pub fn execution_plan(&self, targets: TargetSource) -> ExecutionPlan {
        let concurrency = ExecutionPlan::default_concurrency(&targets, self.download_concurrency);
        ExecutionPlan::new(targets)
            .with_concurrency(concurrency)
            .with_retry(self.retry)
            .with_abort_threshold(self.abort_after_consecutive_failures)
    }
}

/// Upper bound for a configured per-class interval or jitter.
const MAX_RATE_SPACING: Duration = Duration::from_secs(86_400);

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn str(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn u64(&self, key: &str) -> Option<u64> {
        self.str(key).and_then(|s| s.trim().parse::<u64>().ok())
    }

    fn u32(&self, key: &str) -> Option<u32> {
        self.str(key).and_then(|s| s.trim().parse::<u32>().ok())
    }

    fn usize(&self, key: &str) -> Option<usize> {
        self.str(key).and_then(|s| s.trim().parse::<usize>().ok())
    }

    fn millis(&self, key: &str) -> Option<Duration> {
        self.u64(key).map(Duration::from_millis)
    }

    /// `<PREFIX>_MIN_INTERVAL_MS` and `<PREFIX>_JITTER_MS`, each capped at a day.
    fn rate(&self, prefix: &str, default: RateClassConfig) -> RateClassConfig {
        RateClassConfig {
            min_interval: self
                .millis(&format!("{prefix}_MIN_INTERVAL_MS"))
                .unwrap_or(default.min_interval)
                .min(MAX_RATE_SPACING),
            jitter: self
                .millis(&format!("{prefix}_JITTER_MS"))
                .unwrap_or(default.jitter)
                .min(MAX_RATE_SPACING),
        }
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}
