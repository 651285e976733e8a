//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [general]
//! page_origin = "https://wedding.example.com/"
//! log_format = "json"
//!
//! [network]
//! request_timeout_ms = 10000
//! retry_attempts = 4
//!
//! [cache]
//! dir = "/var/cache/courier"
//!
//! [batch]
//! confetti = false
//!
//! [[video]]
//! id = "video-love-story"
//! src = "https://cdn.example.com/love-story.mp4"
//! class = "w-100 rounded-4"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use courier_core::{BundleManifest, CourierConfig, LoaderBatch, RetryPolicy};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub bundles: BundleManifest,

    #[serde(default)]
    pub batch: LoaderBatch,

    #[serde(default)]
    pub video: Vec<VideoDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_page_origin")]
    pub page_origin: String,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            page_origin: default_page_origin(),
            log_format: default_log_format(),
        }
    }
}

fn default_page_origin() -> String {
    "https://localhost/".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    200
}

fn default_retry_max_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_video_bucket")]
    pub video_bucket: String,

    #[serde(default = "default_libs_bucket")]
    pub libs_bucket: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            video_bucket: default_video_bucket(),
            libs_bucket: default_libs_bucket(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".courier-cache")
}

fn default_video_bucket() -> String {
    "video".into()
}

fn default_libs_bucket() -> String {
    "libs".into()
}

/// A video container on the page.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoDef {
    pub id: String,
    pub src: Option<String>,
    pub class: Option<String>,

    /// Intrinsic dimensions reported as the element's metadata.
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_courier_config(&self) -> Result<CourierConfig, String> {
        let origin = Url::parse(&self.general.page_origin)
            .map_err(|e| format!("Invalid page_origin {}: {}", self.general.page_origin, e))?;
        let retry = RetryPolicy {
            max_attempts: self.network.retry_attempts,
            base_backoff: Duration::from_millis(self.network.retry_base_ms),
            max_backoff: Duration::from_millis(self.network.retry_max_ms),
            jitter: true,
        };

        let mut config = CourierConfig::default()
            .with_page_origin(origin)
            .with_request_timeout(self.network.request_timeout_ms)
            .with_retry(retry)
            .with_cache_root(self.cache.dir.clone())
            .with_video_bucket(self.cache.video_bucket.clone())
            .with_libs_bucket(self.cache.libs_bucket.clone());
        config.connect_timeout = Duration::from_millis(self.network.connect_timeout_ms);
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        let origin = Url::parse(&self.general.page_origin).map_err(|e| {
            format!("Invalid page_origin {}: {}", self.general.page_origin, e)
        })?;
        if origin.cannot_be_a_base() {
            return Err(format!(
                "page_origin must be an absolute origin: {}",
                self.general.page_origin
            ));
        }

        match self.general.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        if self.network.retry_attempts == 0 {
            return Err("retry_attempts must be at least 1".into());
        }
        if self.network.retry_base_ms > self.network.retry_max_ms {
            return Err(format!(
                "retry_base_ms ({}) exceeds retry_max_ms ({})",
                self.network.retry_base_ms, self.network.retry_max_ms
            ));
        }

        if self.cache.video_bucket.trim().is_empty() || self.cache.libs_bucket.trim().is_empty() {
            return Err("Bucket names must not be empty".into());
        }

        for url in self
            .bundles
            .aos
            .resources()
            .chain(self.bundles.confetti.resources())
            .chain(self.bundles.fonts.iter().map(String::as_str))
        {
            check_http_url(url).map_err(|e| format!("Invalid bundle URL {}: {}", url, e))?;
        }

        let mut video_ids = HashSet::new();
        for v in &self.video {
            if v.id.is_empty() {
                return Err("Video ID must not be empty".into());
            }
            if !video_ids.insert(&v.id) {
                return Err(format!("Duplicate video ID: {}", v.id));
            }
            if let Some(src) = v.src.as_deref().filter(|s| !s.is_empty()) {
                check_http_url(src)
                    .map_err(|e| format!("Invalid src for video '{}': {} ({})", v.id, src, e))?;
            }
            if v.width == 0 || v.height == 0 {
                return Err(format!("Video '{}' must have non-zero dimensions", v.id));
            }
        }

        Ok(())
    }
}

fn check_http_url(raw: &str) -> Result<(), String> {
    let parsed = Url::parse(raw).map_err(|e| e.to_string())?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("scheme '{}' is not http or https", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config: AppConfig = toml::from_str("").unwrap();
        config.validate().unwrap();

        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.cache.dir, PathBuf::from(".courier-cache"));
        assert_eq!(config.network.retry_attempts, 3);
        assert_eq!(config.batch, LoaderBatch::default());
        assert_eq!(config.bundles, BundleManifest::default());
        assert!(config.video.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[general]
page_origin = "https://wedding.example.com/"
log_format = "json"

[network]
request_timeout_ms = 2500
retry_attempts = 5

[cache]
dir = "/tmp/courier"
video_bucket = "clips"

[batch]
confetti = false

[bundles]
fonts = ["https://fonts.example.com/a.css"]

[[video]]
id = "video-love-story"
src = "https://cdn.example.com/love.mp4"
class = "w-100"
width = 1280
height = 720

[[video]]
id = "teaser"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.general.log_format, "json");
        assert!(!config.batch.confetti);
        assert!(config.batch.aos && config.batch.additional_font);
        assert_eq!(config.bundles.fonts, vec!["https://fonts.example.com/a.css"]);
        assert_eq!(config.bundles.aos, BundleManifest::default().aos);
        assert_eq!(config.video.len(), 2);
        assert_eq!(config.video[0].width, 1280);
        assert_eq!(config.video[1].src, None);
        assert_eq!(config.video[1].width, 1920);

        let courier = config.to_courier_config().unwrap();
        assert_eq!(courier.page_origin.as_str(), "https://wedding.example.com/");
        assert_eq!(courier.request_timeout, Duration::from_millis(2500));
        assert_eq!(courier.retry.max_attempts, 5);
        assert_eq!(courier.cache_root, Some(PathBuf::from("/tmp/courier")));
        assert_eq!(courier.video_bucket, "clips");
        assert_eq!(courier.libs_bucket, "libs");
    }

    #[test]
    fn validate_rejects_duplicate_video_ids() {
        let toml = r#"
[[video]]
id = "same"

[[video]]
id = "same"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate video ID"), "{}", err);
    }

    #[test]
    fn validate_rejects_non_http_video_src() {
        let toml = r#"
[[video]]
id = "bad"
src = "ftp://example.com/v.mp4"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid src"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_origin() {
        let toml = r#"
[general]
page_origin = "not-an-origin"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid page_origin"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let toml = r#"
[general]
log_format = "xml"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid log_format"), "{}", err);
    }

    #[test]
    fn validate_rejects_zero_retry_attempts() {
        let toml = r#"
[network]
retry_attempts = 0
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("retry_attempts"), "{}", err);
    }

    #[test]
    fn validate_rejects_bad_bundle_url() {
        let toml = r#"
[bundles]
fonts = ["fonts.example.com/a.css"]
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid bundle URL"), "{}", err);
    }
}
