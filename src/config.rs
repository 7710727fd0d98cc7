//! Configuration types.

use std::time::Duration;

/// Pipeline configuration.
///
/// The fetch limits cap matching cost on large tenants; they are tunable
/// bounds, not hard architectural limits.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum LP contacts fetched per organization when building context.
    pub lp_fetch_limit: usize,
    /// Maximum draft/active deals fetched per organization.
    pub deal_fetch_limit: usize,
    /// Concurrent workers per chunk in bulk operations.
    pub batch_size: usize,
    /// Maximum emails touched by one bulk backfill/reparse run.
    pub bulk_limit: usize,
    /// Wall-clock budget for a bulk operation; partial progress is kept.
    pub bulk_timeout: Duration,
    /// Per-email budget for one classifier call.
    pub classify_timeout: Duration,
    /// Maximum error messages included in a bulk summary response.
    pub error_sample: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lp_fetch_limit: 500,
            deal_fetch_limit: 100,
            batch_size: 5,
            bulk_limit: 500,
            bulk_timeout: Duration::from_secs(300),
            classify_timeout: Duration::from_secs(30),
            error_sample: 10,
        }
    }
}
