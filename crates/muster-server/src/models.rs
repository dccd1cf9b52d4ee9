//! Request and response bodies

use muster_cluster::PeerStats;
use muster_registry::{
    InstanceStatus, Lease, RegisterRequest, RegistryStats, ServiceInstance,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registration body; the service comes from the path
///
/// Every field defaults so a missing `address` or `port` reaches the
/// registry's validation and comes back as `invalid_argument`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterInstanceBody {
    /// Optional; must match the path when present
    pub service_name: Option<String>,
    pub instance_id: String,
    pub address: String,
    pub port: u16,
    pub secure_address: Option<String>,
    pub secure_port: Option<u16>,
    pub status: Option<InstanceStatus>,
    pub metadata: BTreeMap<String, String>,
    pub duration_secs: Option<u64>,
}

impl RegisterInstanceBody {
    pub fn into_request(self, service: &str) -> RegisterRequest {
        RegisterRequest {
            service_name: service.to_string(),
            instance_id: self.instance_id,
            address: self.address,
            port: self.port,
            secure_address: self.secure_address,
            secure_port: self.secure_port,
            status: self.status,
            metadata: self.metadata,
            duration_secs: self.duration_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseResponse {
    pub ok: bool,
    pub lease: Lease,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub ok: bool,
    /// False when the instance was not registered
    pub removed: bool,
}

/// Query string for renewals: `?status=UP`
#[derive(Debug, Default, Deserialize)]
pub struct RenewQuery {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    /// Empty when missing; rejected as an unknown status
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancesResponse {
    pub service: String,
    pub instances: Vec<ServiceInstance>,
}

/// Query string for the full feed: `?since_version=V`
#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    pub since_version: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub node_id: String,
    pub uptime_seconds: u64,
}

/// Registry figures plus replication state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub registry: RegistryStats,
    pub peers: Vec<PeerStats>,
    pub uptime_seconds: u64,
}

/// Error body returned for every failed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new("invalid_argument", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_body_takes_service_from_path() {
        let body: RegisterInstanceBody = serde_json::from_str(
            r#"{"instance_id":"b-1","address":"10.0.0.1","port":8080,"metadata":{"zone":"eu-1"}}"#,
        )
        .unwrap();
        let request = body.into_request("billing");
        assert_eq!(request.service_name, "billing");
        assert_eq!(request.metadata["zone"], "eu-1");
        assert!(request.duration_secs.is_none());
    }

    #[test]
    fn test_register_body_missing_fields_default() {
        let body: RegisterInstanceBody = serde_json::from_str(r#"{"instance_id":"b-1"}"#).unwrap();
        assert_eq!(body.port, 0);
        assert!(body.address.is_empty());
        assert!(body.into_request("billing").into_instance().is_err());
    }

    #[test]
    fn test_error_response_codes() {
        assert_eq!(ErrorResponse::invalid_argument("x").code, "invalid_argument");
        assert_eq!(ErrorResponse::not_found("x").code, "not_found");
        assert_eq!(ErrorResponse::internal("x").code, "internal_error");
    }
}
