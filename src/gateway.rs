//! Rate-limited request gateway for the upstream proxy API.
//!
//! All first-attempt requests pass through a FIFO admission lock so concurrent
//! callers never race the global throttle; retries already own a backoff delay
//! and bypass admission, which means a throttled retry can interleave ahead of
//! queued fresh requests. Every sender reserves a distinct fire slot under a
//! single slot timestamp before sleeping, so the minimum interval between any
//! two network calls holds process-wide even when retries interleave.
//!
//! The gateway also owns the session caches: post-id details, per-handle
//! timeline results, and the failure records that back the fast-fail path.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::constants::PROXY_USER_AGENT;
use crate::error::FetchError;
use crate::model::Post;

/// Tuning knobs for the gateway. Defaults match the upstream proxy's observed
/// tolerance; tests shrink every interval.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Minimum spacing between any two outbound calls.
    pub min_interval: Duration,
    /// Base delay for the 429 backoff schedule (`base * 2^attempt`).
    pub retry_base_delay: Duration,
    /// Retries after the first attempt on HTTP 429.
    pub max_retries: u32,
    /// How long a recorded failure suppresses new calls to the same URL.
    pub failure_ttl: Duration,
    /// Extra hold applied to URLs that exhausted their 429 budget.
    pub rate_limit_hold: Duration,
    /// Per-request client timeout.
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(2000),
            retry_base_delay: Duration::from_millis(3000),
            max_retries: 2,
            failure_ttl: Duration::from_secs(600),
            rate_limit_hold: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    recorded_at: Instant,
    /// Set for rate-limit failures: calls stay suppressed until this instant
    /// even if the TTL math would allow them sooner.
    retry_after: Option<Instant>,
}

impl FailureRecord {
    fn expired(&self, ttl: Duration) -> bool {
        self.recorded_at.elapsed() >= ttl
            && self.retry_after.is_none_or(|t| Instant::now() >= t)
    }

    fn suppresses(&self, ttl: Duration) -> bool {
        self.recorded_at.elapsed() < ttl
            || self.retry_after.is_some_and(|t| Instant::now() < t)
    }
}

/// Serializes and throttles outbound calls to the upstream proxy.
pub struct RequestGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    /// Runtime-mutable copy of the 429 backoff base.
    retry_base_delay: Mutex<Duration>,
    /// FIFO admission for first attempts. Tokio mutexes wake waiters in FIFO
    /// order, so queued requests fire strictly in arrival order.
    admission: tokio::sync::Mutex<()>,
    /// The most recently reserved fire slot; may lie in the future while the
    /// claiming sender is still sleeping towards it.
    last_call: Mutex<Option<Instant>>,
    failures: Mutex<HashMap<String, FailureRecord>>,
    post_details: Mutex<HashMap<String, Post>>,
    timelines: Mutex<HashMap<String, Vec<Post>>>,
}

impl RequestGateway {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(PROXY_USER_AGENT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            retry_base_delay: Mutex::new(config.retry_base_delay),
            config,
            admission: tokio::sync::Mutex::new(()),
            last_call: Mutex::new(None),
            failures: Mutex::new(HashMap::new()),
            post_details: Mutex::new(HashMap::new()),
            timelines: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch `url` and parse the body as JSON.
    ///
    /// # Errors
    ///
    /// Fails fast with [`FetchError::SkippedRecentFailure`] when the URL has a
    /// live failure record; otherwise with the error class of the final
    /// attempt. HTTP 429 is retried on an exponential backoff schedule before
    /// failing; all other failures are recorded immediately.
    pub async fn request(&self, url: &str) -> Result<Value, FetchError> {
        if self.recently_failed(url) {
            debug!(url = %url, "Skipping recently failed endpoint");
            return Err(FetchError::SkippedRecentFailure);
        }

        let mut attempt: u32 = 0;
        loop {
            let response = if attempt == 0 {
                // Hold the admission slot across the throttle wait and the
                // send so queued callers cannot reorder.
                let _slot = self.admission.lock().await;
                self.throttled_send(url).await
            } else {
                self.throttled_send(url).await
            };

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    self.record_failure(url, None);
                    return Err(FetchError::Network(e.to_string()));
                }
            };

            let status = response.status();
            if status.as_u16() == 429 {
                if attempt < self.config.max_retries {
                    let delay = self.retry_base_delay() * 2u32.pow(attempt);
                    warn!(url = %url, attempt, delay_ms = delay.as_millis() as u64, "Rate limited, backing off");
                    sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                self.record_failure(url, Some(self.config.rate_limit_hold));
                return Err(FetchError::RateLimited);
            }

            if !status.is_success() {
                self.record_failure(url, None);
                return Err(FetchError::Http(status.as_u16()));
            }

            return match response.json::<Value>().await {
                Ok(value) => Ok(value),
                Err(e) => {
                    self.record_failure(url, None);
                    Err(FetchError::Parse(e.to_string()))
                }
            };
        }
    }

    /// Claim the next fire slot under the global throttle, sleep until it,
    /// then fire. The slot is reserved atomically under the `last_call` lock
    /// before sleeping, so concurrent senders (including retries, which skip
    /// admission) always claim distinct slots at least `min_interval` apart.
    async fn throttled_send(&self, url: &str) -> Result<reqwest::Response, reqwest::Error> {
        let fire_at = {
            let mut last_call = self.last_call.lock().expect("last_call lock poisoned");
            let now = Instant::now();
            let slot = match *last_call {
                Some(last) => (last + self.config.min_interval).max(now),
                None => now,
            };
            *last_call = Some(slot);
            slot
        };
        tokio::time::sleep_until(fire_at.into()).await;

        self.client.get(url).send().await
    }

    fn recently_failed(&self, url: &str) -> bool {
        let mut failures = self.failures.lock().expect("failures lock poisoned");
        let Some(record) = failures.get(url).copied() else {
            return false;
        };
        if record.expired(self.config.failure_ttl) {
            failures.remove(url);
            return false;
        }
        record.suppresses(self.config.failure_ttl)
    }

    fn record_failure(&self, url: &str, hold: Option<Duration>) {
        let mut failures = self.failures.lock().expect("failures lock poisoned");
        let ttl = self.config.failure_ttl;
        failures.retain(|_, record| !record.expired(ttl));
        failures.insert(
            url.to_string(),
            FailureRecord {
                recorded_at: Instant::now(),
                retry_after: hold.map(|h| Instant::now() + h),
            },
        );
    }

    fn retry_base_delay(&self) -> Duration {
        *self
            .retry_base_delay
            .lock()
            .expect("retry_base_delay lock poisoned")
    }

    /// Update the 429 backoff base at runtime.
    pub fn set_retry_base_delay(&self, delay: Duration) {
        *self
            .retry_base_delay
            .lock()
            .expect("retry_base_delay lock poisoned") = delay;
    }

    // ----- session caches -----

    #[must_use]
    pub fn cached_post(&self, id: &str) -> Option<Post> {
        self.post_details
            .lock()
            .expect("post_details lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn store_post(&self, post: Post) {
        self.post_details
            .lock()
            .expect("post_details lock poisoned")
            .insert(post.id.clone(), post);
    }

    /// Look up a whole-timeline fetch result by handle (case-insensitive).
    #[must_use]
    pub fn cached_timeline(&self, handle: &str) -> Option<Vec<Post>> {
        self.timelines
            .lock()
            .expect("timelines lock poisoned")
            .get(&handle.to_lowercase())
            .cloned()
    }

    pub fn store_timeline(&self, handle: &str, posts: Vec<Post>) {
        self.timelines
            .lock()
            .expect("timelines lock poisoned")
            .insert(handle.to_lowercase(), posts);
    }
}
