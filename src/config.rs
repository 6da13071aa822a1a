use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Upstream proxy API
    pub upstream_api_url: String,
    pub request_timeout: Duration,

    // Save store (optional; save endpoints are disabled without it)
    pub save_store_url: Option<String>,

    // Web server
    pub web_host: String,
    pub web_port: u16,

    // Fetch pipeline
    pub fetch: FetchSettings,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut fetch = FetchSettings::default();
        fetch.set_initial_fetch_limit(parse_env_usize(
            "INITIAL_FETCH_LIMIT",
            fetch.initial_fetch_limit,
        )?);
        fetch.set_max_total_posts(parse_env_usize("MAX_TOTAL_POSTS", fetch.max_total_posts)?);
        fetch.set_threads_to_enrich(parse_env_usize(
            "THREADS_TO_ENRICH",
            fetch.threads_to_enrich,
        )?);
        fetch.set_max_continuation_pages(parse_env_usize(
            "MAX_CONTINUATION_PAGES",
            fetch.max_continuation_pages,
        )?);
        fetch.set_reply_page_cap(parse_env_usize("REPLY_PAGE_CAP", fetch.reply_page_cap)?);
        fetch.set_retry_base_delay_ms(parse_env_u64(
            "RETRY_BASE_DELAY_MS",
            fetch.retry_base_delay_ms,
        )?);

        Ok(Self {
            upstream_api_url: required_env("UPSTREAM_API_URL")?,
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 30)?),
            save_store_url: optional_env("SAVE_STORE_URL"),
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8080)?,
            fetch,
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_api_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "UPSTREAM_API_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if !self.upstream_api_url.starts_with("http") {
            return Err(ConfigError::InvalidValue {
                name: "UPSTREAM_API_URL".to_string(),
                message: "must be an http(s) URL".to_string(),
            });
        }
        Ok(())
    }

    /// Configuration suitable for tests: no environment access.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            upstream_api_url: "http://127.0.0.1:0".to_string(),
            request_timeout: Duration::from_secs(10),
            save_store_url: None,
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
            fetch: FetchSettings::default(),
        }
    }
}

/// Runtime-mutable fetch pipeline settings.
///
/// Setters validate their argument and silently retain the prior value when it
/// is out of range, so a bad update from the settings API can never wedge the
/// pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSettings {
    /// Posts requested in the initial timeline fetch (1-100).
    pub initial_fetch_limit: usize,
    /// Ceiling on accumulated posts across continuation pages (> 0).
    pub max_total_posts: usize,
    /// Top posts by reply count eagerly expanded into threads.
    pub threads_to_enrich: usize,
    /// Continuation pages followed per timeline fetch.
    pub max_continuation_pages: usize,
    /// Reply pages walked per root post.
    pub reply_page_cap: usize,
    /// Base delay of the gateway's 429 backoff schedule.
    pub retry_base_delay_ms: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            initial_fetch_limit: 50,
            max_total_posts: 200,
            threads_to_enrich: 10,
            max_continuation_pages: 3,
            reply_page_cap: 4,
            retry_base_delay_ms: 3000,
        }
    }
}

impl FetchSettings {
    pub fn set_initial_fetch_limit(&mut self, value: usize) {
        if (1..=100).contains(&value) {
            self.initial_fetch_limit = value;
        }
    }

    pub fn set_max_total_posts(&mut self, value: usize) {
        if value > 0 {
            self.max_total_posts = value;
        }
    }

    pub fn set_threads_to_enrich(&mut self, value: usize) {
        if value <= 50 {
            self.threads_to_enrich = value;
        }
    }

    pub fn set_max_continuation_pages(&mut self, value: usize) {
        if value <= 20 {
            self.max_continuation_pages = value;
        }
    }

    pub fn set_reply_page_cap(&mut self, value: usize) {
        if (1..=20).contains(&value) {
            self.reply_page_cap = value;
        }
    }

    pub fn set_retry_base_delay_ms(&mut self, value: u64) {
        if value > 0 {
            self.retry_base_delay_ms = value;
        }
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = FetchSettings::default();
        assert_eq!(settings.initial_fetch_limit, 50);
        assert_eq!(settings.max_total_posts, 200);
        assert_eq!(settings.threads_to_enrich, 10);
        assert_eq!(settings.max_continuation_pages, 3);
        assert_eq!(settings.reply_page_cap, 4);
        assert_eq!(settings.retry_base_delay_ms, 3000);
    }

    #[test]
    fn test_out_of_range_values_silently_rejected() {
        let mut settings = FetchSettings::default();
        settings.set_initial_fetch_limit(0);
        assert_eq!(settings.initial_fetch_limit, 50);
        settings.set_initial_fetch_limit(101);
        assert_eq!(settings.initial_fetch_limit, 50);
        settings.set_initial_fetch_limit(25);
        assert_eq!(settings.initial_fetch_limit, 25);

        settings.set_max_total_posts(0);
        assert_eq!(settings.max_total_posts, 200);

        settings.set_reply_page_cap(0);
        assert_eq!(settings.reply_page_cap, 4);

        settings.set_retry_base_delay_ms(0);
        assert_eq!(settings.retry_base_delay_ms, 3000);
    }
}
