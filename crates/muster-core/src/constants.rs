//! TigerStyle constants for Muster
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Identifier Limits
// =============================================================================

/// Maximum length of a service name in bytes
pub const SERVICE_NAME_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of an instance ID in bytes
pub const INSTANCE_ID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a node ID in bytes
pub const NODE_ID_LENGTH_BYTES_MAX: usize = 128;

/// Maximum number of metadata entries on one instance
pub const INSTANCE_METADATA_ENTRIES_COUNT_MAX: usize = 128;

/// Maximum size of a single metadata key or value in bytes
pub const INSTANCE_METADATA_FIELD_BYTES_MAX: usize = 4 * 1024;

// =============================================================================
// Lease Limits
// =============================================================================

/// Default interval at which clients promise to renew (30 sec)
pub const LEASE_DURATION_SECS_DEFAULT: u64 = 30;

/// Minimum renewal interval a client may request
pub const LEASE_DURATION_SECS_MIN: u64 = 1;

/// Maximum renewal interval a client may request (1 hour)
pub const LEASE_DURATION_SECS_MAX: u64 = 60 * 60;

/// Default grace period without renewal before eviction (90 sec)
pub const LEASE_EVICTION_TIMEOUT_SECS_DEFAULT: u64 = 90;

/// Eviction timeout is at least this multiple of a client's requested duration
pub const LEASE_EVICTION_MULTIPLIER: u64 = 3;

/// How long a removed key is remembered for last-write-wins (5 min)
pub const LEASE_TOMBSTONE_TTL_SECS_DEFAULT: u64 = 5 * 60;

// =============================================================================
// Eviction & Self-Preservation
// =============================================================================

/// Default interval between eviction sweeps (60 sec)
pub const EVICTION_SWEEP_INTERVAL_SECS_DEFAULT: u64 = 60;

/// Minimum interval between eviction sweeps
pub const EVICTION_SWEEP_INTERVAL_SECS_MIN: u64 = 1;

/// Default fraction of expected renewals that must arrive
pub const SELF_PRESERVATION_THRESHOLD_DEFAULT: f64 = 0.85;

/// Default minimum number of leases before self-preservation can engage
pub const SELF_PRESERVATION_LEASES_COUNT_MIN_DEFAULT: usize = 2;

/// Default interval between self-preservation evaluations (60 sec)
pub const SELF_PRESERVATION_EVALUATION_INTERVAL_SECS_DEFAULT: u64 = 60;

/// Length of the trailing renewal-rate window (1 min)
pub const RENEWAL_WINDOW_SECS: u64 = 60;

// =============================================================================
// Replication Limits
// =============================================================================

/// Maximum number of peers a node replicates to
pub const CLUSTER_PEERS_COUNT_MAX: usize = 64;

/// Default depth of each per-peer replication queue
pub const REPLICATION_QUEUE_DEPTH_DEFAULT: usize = 10_000;

/// Maximum depth of each per-peer replication queue
pub const REPLICATION_QUEUE_DEPTH_MAX: usize = 1_000_000;

/// Default initial retry backoff in milliseconds
pub const REPLICATION_BACKOFF_MS_BASE_DEFAULT: u64 = 100;

/// Default cap on retry backoff in milliseconds (10 sec)
pub const REPLICATION_BACKOFF_MS_MAX_DEFAULT: u64 = 10 * 1000;

/// Default number of delivery attempts per event
pub const REPLICATION_ATTEMPTS_COUNT_MAX_DEFAULT: u32 = 5;

/// Default peer request timeout in milliseconds (5 sec)
pub const REPLICATION_REQUEST_TIMEOUT_MS_DEFAULT: u64 = 5 * 1000;

// =============================================================================
// Client Cache Feed
// =============================================================================

/// Default number of changes retained for delta queries
pub const FEED_CHANGELOG_ENTRIES_COUNT_DEFAULT: usize = 10_000;

/// Maximum number of changes retained for delta queries
pub const FEED_CHANGELOG_ENTRIES_COUNT_MAX: usize = 1_000_000;

// Compile-time assertions for constant validity
const _: () = {
    assert!(LEASE_EVICTION_TIMEOUT_SECS_DEFAULT > LEASE_DURATION_SECS_DEFAULT);
    assert!(LEASE_DURATION_SECS_MIN < LEASE_DURATION_SECS_MAX);
    assert!(LEASE_EVICTION_MULTIPLIER >= 2);
    assert!(REPLICATION_BACKOFF_MS_BASE_DEFAULT <= REPLICATION_BACKOFF_MS_MAX_DEFAULT);
    assert!(REPLICATION_QUEUE_DEPTH_DEFAULT <= REPLICATION_QUEUE_DEPTH_MAX);
    assert!(FEED_CHANGELOG_ENTRIES_COUNT_DEFAULT <= FEED_CHANGELOG_ENTRIES_COUNT_MAX);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_defaults() {
        assert_eq!(LEASE_DURATION_SECS_DEFAULT, 30);
        assert_eq!(LEASE_EVICTION_TIMEOUT_SECS_DEFAULT, 90);
        assert_eq!(EVICTION_SWEEP_INTERVAL_SECS_DEFAULT, 60);
    }

    #[test]
    fn test_threshold_is_fraction() {
        assert!(SELF_PRESERVATION_THRESHOLD_DEFAULT > 0.0);
        assert!(SELF_PRESERVATION_THRESHOLD_DEFAULT <= 1.0);
    }
}
