//! Error taxonomy for the fetch pipeline.

use thiserror::Error;

/// Failure modes of upstream requests and fetch orchestration.
///
/// None of these ever escape the public `fetch_user_posts` boundary - the
/// orchestrator resolves every failure to an empty or partial result. They
/// exist so intermediate layers can distinguish, in particular, a synthetic
/// [`FetchError::SkippedRecentFailure`] from a live failure that should be
/// recorded in the failure cache.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("rate limited by upstream")]
    RateLimited,

    #[error("upstream returned HTTP {0}")]
    Http(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to parse upstream response: {0}")]
    Parse(String),

    /// The endpoint failed recently; no network call was made.
    #[error("skipped recently failed endpoint")]
    SkippedRecentFailure,
}

impl FetchError {
    /// True for the synthetic fast-fail that made no network call.
    #[must_use]
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::SkippedRecentFailure)
    }
}
