//! Shared constants used across the application.

/// User agent string used for upstream proxy requests.
pub const PROXY_USER_AGENT: &str = "timeline-thread-collector/0.1";

/// Raw-page size at or above which reply pagination continues even when the
/// current page yielded no accepted replies - a large page may still bury
/// author replies behind side conversations.
pub const LARGE_REPLY_PAGE: usize = 10;

/// Reply count above which a continuation-page post qualifies for eager
/// thread enrichment.
pub const ENRICHMENT_REPLY_FLOOR: u64 = 2;

/// At most this many new posts per continuation page get enriched.
pub const CONTINUATION_ENRICHMENT_LIMIT: usize = 5;

/// Bound on reply-graph traversal depth during thread grouping.
pub const MAX_THREAD_DEPTH: usize = 10;
