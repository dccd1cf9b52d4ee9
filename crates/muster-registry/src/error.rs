//! Registry error types
//!
//! TigerStyle: Explicit error variants with context.

use thiserror::Error;

/// Registry-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Missing or malformed request field
    #[error("invalid argument: {field}, reason: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// No lease exists for this instance; the client must re-register
    #[error("instance not found: {service}/{instance_id}")]
    NotFound { service: String, instance_id: String },

    /// Store and lease state disagree; healed by the next eviction sweep
    #[error("internal inconsistency for {key}: {reason}")]
    InternalInconsistency { key: String, reason: String },
}

impl RegistryError {
    /// Create an invalid argument error
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(service: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self::NotFound {
            service: service.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Create an internal inconsistency error
    pub fn inconsistency(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InternalInconsistency {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error indicates a retriable condition
    ///
    /// An inconsistency is repaired by the sweep, so retrying after it can succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::InternalInconsistency { .. })
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegistryError::not_found("billing", "billing-1");
        assert!(err.to_string().contains("billing/billing-1"));

        let err = RegistryError::invalid_argument("port", "must be non-zero");
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_error_retriable() {
        assert!(RegistryError::inconsistency("a/b", "orphan").is_retriable());
        assert!(!RegistryError::not_found("a", "b").is_retriable());
        assert!(!RegistryError::invalid_argument("x", "y").is_retriable());
    }
}
