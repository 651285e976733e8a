use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use url::Url;

/// Backoff policy applied to network-level failures of a retrying request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry (doubled each further attempt).
    pub base_backoff: Duration,
    /// Upper bound for a single backoff delay.
    pub max_backoff: Duration,
    /// Spread each delay by up to a fifth in either direction.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            ..Self::default()
        }
    }

    /// A policy that never re-issues a request.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry number `retry` (1 = first retry).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)));
        let capped = exp.min(self.max_backoff);

        if !self.jitter {
            return capped;
        }

        let base_ms = capped.as_millis() as u64;
        let jitter_range = base_ms / 5;
        if jitter_range == 0 {
            return capped;
        }
        let jitter = rand::thread_rng().gen_range(0..jitter_range * 2) as i64 - jitter_range as i64;
        Duration::from_millis((base_ms as i64 + jitter).max(1) as u64)
    }
}

/// Configuration shared by the request engine, cache buckets and loaders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierConfig {
    /// Origin of the page the assets are delivered to. Decides secure-context caching
    /// and the origin embedded in blob URLs.
    pub page_origin: Url,
    /// Timeout for probes and cache population fetches. Streaming body fetches are unbounded.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Retry policy used by requests that opt into retrying.
    pub retry: RetryPolicy,
    /// Directory holding one subdirectory per bucket. `None` keeps buckets in memory.
    pub cache_root: Option<PathBuf>,
    pub video_bucket: String,
    pub libs_bucket: String,
    /// Name the video unit reports under in the progress tracker.
    pub video_progress_name: String,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            page_origin: default_origin(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            cache_root: None,
            video_bucket: "video".to_string(),
            libs_bucket: "libs".to_string(),
            video_progress_name: "video".to_string(),
        }
    }
}

fn default_origin() -> Url {
    Url::parse("https://localhost/").expect("static origin parses")
}

impl CourierConfig {
    pub fn with_page_origin(mut self, origin: Url) -> Self {
        self.page_origin = origin;
        self
    }

    pub fn with_request_timeout(mut self, ms: u64) -> Self {
        self.request_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = Some(root.into());
        self
    }

    pub fn with_video_bucket(mut self, name: impl Into<String>) -> Self {
        self.video_bucket = name.into();
        self
    }

    pub fn with_libs_bucket(mut self, name: impl Into<String>) -> Self {
        self.libs_bucket = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            jitter: false,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(5), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_a_fifth() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        for _ in 0..50 {
            let d = policy.backoff_for(1).as_millis();
            assert!((800..=1200).contains(&d), "{}", d);
        }
    }

    #[test]
    fn new_policy_has_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::from_millis(10)).max_attempts, 1);
    }

    #[test]
    fn defaults_name_the_page_buckets() {
        let config = CourierConfig::default();
        assert_eq!(config.video_bucket, "video");
        assert_eq!(config.libs_bucket, "libs");
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.cache_root.is_none());
    }
}
