//! Registry node identity
//!
//! TigerStyle: Validated identifiers, explicit length limits.

use crate::constants::NODE_ID_LENGTH_BYTES_MAX;
use crate::error::{Error, Result};
use crate::io::TimeProvider;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one registry server in a replicated deployment
///
/// Stamped on every replication event as its origin, so it should be stable
/// across restarts: configure it explicitly or let it derive from the hostname.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Create a new NodeId with validation
    ///
    /// # Errors
    /// Returns error if id is empty, too long, or contains characters other
    /// than alphanumerics, dash, underscore, dot or colon.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidNodeId {
                id,
                reason: "node ID cannot be empty".into(),
            });
        }

        if id.len() > NODE_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidNodeId {
                reason: format!(
                    "node ID length {} exceeds limit {}",
                    id.len(),
                    NODE_ID_LENGTH_BYTES_MAX
                ),
                id,
            });
        }

        let valid = id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));

        if !valid {
            return Err(Error::InvalidNodeId {
                id,
                reason: "node ID contains invalid characters".into(),
            });
        }

        Ok(Self(id))
    }

    /// Get the node ID as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a node ID from the hostname plus a time-based suffix
    pub fn generate(time: &dyn TimeProvider) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let sanitized: String = hostname
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
            .collect();

        let suffix = (time.now_ms() as u32) ^ std::process::id();
        let mut id = format!("{}-{:08x}", sanitized, suffix);
        id.truncate(NODE_ID_LENGTH_BYTES_MAX);

        debug_assert!(!id.is_empty());
        Self(id)
    }
}

impl TryFrom<String> for NodeId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
