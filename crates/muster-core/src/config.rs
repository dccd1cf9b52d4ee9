//! Configuration for Muster
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.
//!
//! Every field has a default, so an empty (or missing) YAML file yields a
//! working standalone registry with 30 s renewals, a 90 s eviction timeout and
//! a 60 s sweep.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for a Muster registry node
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MusterConfig {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,

    /// Lease configuration
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Eviction sweep configuration
    #[serde(default)]
    pub eviction: EvictionConfig,

    /// Self-preservation configuration
    #[serde(default)]
    pub preservation: PreservationConfig,

    /// Peer replication configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Client cache feed configuration
    #[serde(default)]
    pub feed: FeedConfig,
}

impl MusterConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.node.validate()?;
        self.lease.validate()?;
        self.eviction.validate()?;
        self.preservation.validate()?;
        self.cluster.validate()?;
        self.feed.validate()?;
        Ok(())
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| Error::config_load_failed("<inline>", e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config_load_failed(&display, e.to_string()))?;

        Self::from_yaml_str(&contents).map_err(|e| match e {
            Error::ConfigLoadFailed { reason, .. } => Error::config_load_failed(display, reason),
            other => other,
        })
    }

    /// Load a YAML file if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Configuration with short timings for tests
    pub fn for_testing() -> Self {
        Self {
            node: NodeConfig {
                node_id: Some("test-node".into()),
                bind_address: "127.0.0.1:0".into(),
            },
            lease: LeaseConfig {
                renewal_interval_secs: 1,
                eviction_timeout_secs: 3,
                tombstone_ttl_secs: 10,
            },
            eviction: EvictionConfig {
                sweep_interval_secs: 1,
            },
            preservation: PreservationConfig::default(),
            cluster: ClusterConfig::for_testing(),
            feed: FeedConfig {
                changelog_entries_count_max: 100,
            },
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Node identifier (derived from hostname if not specified)
    #[serde(default)]
    pub node_id: Option<String>,

    /// Address to bind the HTTP listener (default: 0.0.0.0:8761)
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "0.0.0.0:8761".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            bind_address: default_bind_address(),
        }
    }
}

impl NodeConfig {
    fn validate(&self) -> Result<()> {
        if !self.bind_address.contains(':') {
            return Err(Error::invalid_config(
                "node.bind_address",
                "must be in host:port format",
            ));
        }
        if let Some(id) = &self.node_id {
            crate::node::NodeId::new(id.clone())
                .map_err(|e| Error::invalid_config("node.node_id", e.to_string()))?;
        }
        Ok(())
    }
}

// =============================================================================
// Lease
// =============================================================================

/// Lease configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaseConfig {
    /// Renewal interval assumed when a client does not state one
    #[serde(
        default = "default_renewal_interval_secs",
        alias = "renewalIntervalSeconds"
    )]
    pub renewal_interval_secs: u64,

    /// Time without renewal after which a lease is expired
    #[serde(
        default = "default_eviction_timeout_secs",
        alias = "evictionTimeoutSeconds"
    )]
    pub eviction_timeout_secs: u64,

    /// How long removed keys are remembered to reject older replicated writes
    #[serde(default = "default_tombstone_ttl_secs")]
    pub tombstone_ttl_secs: u64,
}

fn default_renewal_interval_secs() -> u64 {
    LEASE_DURATION_SECS_DEFAULT
}

fn default_eviction_timeout_secs() -> u64 {
    LEASE_EVICTION_TIMEOUT_SECS_DEFAULT
}

fn default_tombstone_ttl_secs() -> u64 {
    LEASE_TOMBSTONE_TTL_SECS_DEFAULT
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            renewal_interval_secs: default_renewal_interval_secs(),
            eviction_timeout_secs: default_eviction_timeout_secs(),
            tombstone_ttl_secs: default_tombstone_ttl_secs(),
        }
    }
}

impl LeaseConfig {
    fn validate(&self) -> Result<()> {
        if !(LEASE_DURATION_SECS_MIN..=LEASE_DURATION_SECS_MAX)
            .contains(&self.renewal_interval_secs)
        {
            return Err(Error::invalid_config(
                "lease.renewal_interval_secs",
                format!(
                    "{} outside [{}, {}]",
                    self.renewal_interval_secs, LEASE_DURATION_SECS_MIN, LEASE_DURATION_SECS_MAX
                ),
            ));
        }

        if self.eviction_timeout_secs <= self.renewal_interval_secs {
            return Err(Error::invalid_config(
                "lease.eviction_timeout_secs",
                "must be greater than renewal_interval_secs",
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Eviction
// =============================================================================

/// Eviction sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvictionConfig {
    /// Interval between eviction sweeps
    #[serde(
        default = "default_sweep_interval_secs",
        alias = "evictionSweepIntervalSeconds"
    )]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    EVICTION_SWEEP_INTERVAL_SECS_DEFAULT
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl EvictionConfig {
    fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs < EVICTION_SWEEP_INTERVAL_SECS_MIN {
            return Err(Error::invalid_config(
                "eviction.sweep_interval_secs",
                format!("must be at least {}", EVICTION_SWEEP_INTERVAL_SECS_MIN),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Self-Preservation
// =============================================================================

/// What the eviction sweep does while self-preservation is engaged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreservationMode {
    /// Evict nothing
    #[default]
    Suppress,
    /// Evict only while the registered count stays above the threshold fraction
    Cap,
}

/// Self-preservation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreservationConfig {
    /// Whether the controller may ever leave NORMAL
    #[serde(default = "default_true", alias = "selfPreservationEnabled")]
    pub enabled: bool,

    /// Fraction of expected renewals that must arrive, in (0, 1]
    #[serde(
        default = "default_threshold",
        alias = "selfPreservationThreshold"
    )]
    pub threshold: f64,

    /// Eviction behavior while preserving
    #[serde(default)]
    pub mode: PreservationMode,

    /// Below this many leases the controller stays NORMAL
    #[serde(default = "default_min_leases")]
    pub min_leases_count: usize,

    /// Interval between renewal-rate evaluations
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f64 {
    SELF_PRESERVATION_THRESHOLD_DEFAULT
}

fn default_min_leases() -> usize {
    SELF_PRESERVATION_LEASES_COUNT_MIN_DEFAULT
}

fn default_evaluation_interval_secs() -> u64 {
    SELF_PRESERVATION_EVALUATION_INTERVAL_SECS_DEFAULT
}

impl Default for PreservationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
            mode: PreservationMode::default(),
            min_leases_count: default_min_leases(),
            evaluation_interval_secs: default_evaluation_interval_secs(),
        }
    }
}

impl PreservationConfig {
    /// Self-preservation turned off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(Error::invalid_config(
                "preservation.threshold",
                format!("{} must be in (0, 1]", self.threshold),
            ));
        }
        if self.evaluation_interval_secs == 0 {
            return Err(Error::invalid_config(
                "preservation.evaluation_interval_secs",
                "must be positive",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Cluster
// =============================================================================

/// Peer replication configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    /// Base URLs of peer registry nodes; empty means standalone
    #[serde(default, alias = "peerNodeAddresses")]
    pub peer_node_addresses: Vec<String>,

    /// Depth of each per-peer outbound queue
    #[serde(default = "default_queue_depth")]
    pub replication_queue_depth: usize,

    /// Initial retry backoff (milliseconds)
    #[serde(default = "default_backoff_base")]
    pub retry_backoff_ms_base: u64,

    /// Retry backoff cap (milliseconds)
    #[serde(default = "default_backoff_max")]
    pub retry_backoff_ms_max: u64,

    /// Delivery attempts per event before it is dropped
    #[serde(default = "default_attempts_max")]
    pub retry_attempts_count_max: u32,

    /// Per-request timeout (milliseconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_queue_depth() -> usize {
    REPLICATION_QUEUE_DEPTH_DEFAULT
}

fn default_backoff_base() -> u64 {
    REPLICATION_BACKOFF_MS_BASE_DEFAULT
}

fn default_backoff_max() -> u64 {
    REPLICATION_BACKOFF_MS_MAX_DEFAULT
}

fn default_attempts_max() -> u32 {
    REPLICATION_ATTEMPTS_COUNT_MAX_DEFAULT
}

fn default_request_timeout() -> u64 {
    REPLICATION_REQUEST_TIMEOUT_MS_DEFAULT
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            peer_node_addresses: Vec::new(),
            replication_queue_depth: default_queue_depth(),
            retry_backoff_ms_base: default_backoff_base(),
            retry_backoff_ms_max: default_backoff_max(),
            retry_attempts_count_max: default_attempts_max(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl ClusterConfig {
    /// Small queues and fast retries for tests
    pub fn for_testing() -> Self {
        Self {
            peer_node_addresses: Vec::new(),
            replication_queue_depth: 64,
            retry_backoff_ms_base: 1,
            retry_backoff_ms_max: 8,
            retry_attempts_count_max: 3,
            request_timeout_ms: 500,
        }
    }

    /// Set peer addresses
    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peer_node_addresses = peers;
        self
    }

    /// Check if running without peers
    pub fn is_standalone(&self) -> bool {
        self.peer_node_addresses.is_empty()
    }

    fn validate(&self) -> Result<()> {
        if self.peer_node_addresses.len() > CLUSTER_PEERS_COUNT_MAX {
            return Err(Error::invalid_config(
                "cluster.peer_node_addresses",
                format!(
                    "{} peers exceeds limit {}",
                    self.peer_node_addresses.len(),
                    CLUSTER_PEERS_COUNT_MAX
                ),
            ));
        }

        if self.peer_node_addresses.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::invalid_config(
                "cluster.peer_node_addresses",
                "peer address cannot be empty",
            ));
        }

        if self.replication_queue_depth == 0
            || self.replication_queue_depth > REPLICATION_QUEUE_DEPTH_MAX
        {
            return Err(Error::invalid_config(
                "cluster.replication_queue_depth",
                format!("must be in [1, {}]", REPLICATION_QUEUE_DEPTH_MAX),
            ));
        }

        if self.retry_backoff_ms_base > self.retry_backoff_ms_max {
            return Err(Error::invalid_config(
                "cluster.retry_backoff_ms_base",
                "must not exceed retry_backoff_ms_max",
            ));
        }

        if self.retry_attempts_count_max == 0 {
            return Err(Error::invalid_config(
                "cluster.retry_attempts_count_max",
                "must be at least 1",
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(Error::invalid_config(
                "cluster.request_timeout_ms",
                "must be positive",
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Feed
// =============================================================================

/// Client cache feed configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// Number of changes retained for delta queries
    #[serde(default = "default_changelog_entries")]
    pub changelog_entries_count_max: usize,
}

fn default_changelog_entries() -> usize {
    FEED_CHANGELOG_ENTRIES_COUNT_DEFAULT
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            changelog_entries_count_max: default_changelog_entries(),
        }
    }
}

impl FeedConfig {
    fn validate(&self) -> Result<()> {
        if self.changelog_entries_count_max == 0
            || self.changelog_entries_count_max > FEED_CHANGELOG_ENTRIES_COUNT_MAX
        {
            return Err(Error::invalid_config(
                "feed.changelog_entries_count_max",
                format!("must be in [1, {}]", FEED_CHANGELOG_ENTRIES_COUNT_MAX),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MusterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lease.renewal_interval_secs, 30);
        assert_eq!(config.lease.eviction_timeout_secs, 90);
        assert_eq!(config.eviction.sweep_interval_secs, 60);
        assert!(config.preservation.enabled);
        assert!(config.cluster.is_standalone());
    }

    #[test]
    fn test_testing_config_is_valid() {
        assert!(MusterConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_eviction_timeout_must_exceed_renewal_interval() {
        let mut config = MusterConfig::default();
        config.lease.eviction_timeout_secs = 30;
        config.lease.renewal_interval_secs = 30;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfiguration { field, .. }) if field == "lease.eviction_timeout_secs"
        ));
    }

    #[test]
    fn test_threshold_bounds() {
        let mut config = MusterConfig::default();
        config.preservation.threshold = 0.0;
        assert!(config.validate().is_err());
        config.preservation.threshold = 1.5;
        assert!(config.validate().is_err());
        config.preservation.threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_ordering() {
        let mut config = MusterConfig::default();
        config.cluster.retry_backoff_ms_base = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_empty_is_default() {
        let config = MusterConfig::from_yaml_str("").unwrap();
        assert_eq!(config, MusterConfig::default());
    }

    #[test]
    fn test_yaml_partial_with_aliases() {
        let yaml = r#"
node:
  node_id: registry-a
  bind_address: "127.0.0.1:9100"
lease:
  renewalIntervalSeconds: 10
  evictionTimeoutSeconds: 40
preservation:
  selfPreservationEnabled: false
  mode: cap
cluster:
  peerNodeAddresses:
    - "http://10.0.0.2:8761"
"#;
        let config = MusterConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.node.node_id.as_deref(), Some("registry-a"));
        assert_eq!(config.lease.renewal_interval_secs, 10);
        assert_eq!(config.lease.eviction_timeout_secs, 40);
        assert!(!config.preservation.enabled);
        assert_eq!(config.preservation.mode, PreservationMode::Cap);
        assert_eq!(config.cluster.peer_node_addresses.len(), 1);
        // untouched sections keep defaults
        assert_eq!(config.eviction.sweep_interval_secs, 60);
    }

    #[test]
    fn test_yaml_rejects_invalid_values() {
        let yaml = "lease:\n  eviction_timeout_secs: 5\n";
        assert!(matches!(
            MusterConfig::from_yaml_str(yaml),
            Err(Error::InvalidConfiguration { .. })
        ));

        assert!(matches!(
            MusterConfig::from_yaml_str("lease: [1, 2"),
            Err(Error::ConfigLoadFailed { .. })
        ));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = MusterConfig::load_or_default("/nonexistent/muster.yaml").unwrap();
        assert_eq!(config, MusterConfig::default());
    }
}
