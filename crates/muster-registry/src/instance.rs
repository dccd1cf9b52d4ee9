//! Service instance types
//!
//! TigerStyle: Validated identifiers, explicit limits, no partially built records.

use crate::error::{RegistryError, RegistryResult};
use muster_core::constants::{
    INSTANCE_ID_LENGTH_BYTES_MAX, INSTANCE_METADATA_ENTRIES_COUNT_MAX,
    INSTANCE_METADATA_FIELD_BYTES_MAX, SERVICE_NAME_LENGTH_BYTES_MAX,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

fn validate_identifier(field: &str, value: &str, limit: usize) -> RegistryResult<()> {
    if value.trim().is_empty() {
        return Err(RegistryError::invalid_argument(field, "cannot be empty"));
    }
    if value.len() > limit {
        return Err(RegistryError::invalid_argument(
            field,
            format!("length {} exceeds limit {}", value.len(), limit),
        ));
    }
    if value.chars().any(|c| c == '/' || c.is_control() || c.is_whitespace()) {
        return Err(RegistryError::invalid_argument(
            field,
            "contains '/', whitespace or control characters",
        ));
    }
    Ok(())
}

// =============================================================================
// Identifiers
// =============================================================================

/// Logical service name, compared case-insensitively
///
/// Stored lowercased so `Billing`, `BILLING` and `billing` are one group.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    /// Validate and normalize a service name
    pub fn new(name: impl AsRef<str>) -> RegistryResult<Self> {
        let name = name.as_ref();
        validate_identifier("service_name", name, SERVICE_NAME_LENGTH_BYTES_MAX)?;
        Ok(Self(name.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServiceName {
    type Error = RegistryError;

    fn try_from(value: String) -> RegistryResult<Self> {
        Self::new(value)
    }
}

impl From<ServiceName> for String {
    fn from(name: ServiceName) -> Self {
        name.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Instance identifier, unique within its service
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceId(String);

impl InstanceId {
    /// Validate an instance identifier
    pub fn new(id: impl Into<String>) -> RegistryResult<Self> {
        let id = id.into();
        validate_identifier("instance_id", &id, INSTANCE_ID_LENGTH_BYTES_MAX)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InstanceId {
    type Error = RegistryError;

    fn try_from(value: String) -> RegistryResult<Self> {
        Self::new(value)
    }
}

impl From<InstanceId> for String {
    fn from(id: InstanceId) -> Self {
        id.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry key: `(service_name, instance_id)`
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub service: ServiceName,
    pub instance_id: InstanceId,
}

impl InstanceKey {
    pub fn new(service: ServiceName, instance_id: InstanceId) -> Self {
        Self {
            service,
            instance_id,
        }
    }

    /// Parse both halves from raw strings
    pub fn parse(service: &str, instance_id: &str) -> RegistryResult<Self> {
        Ok(Self::new(
            ServiceName::new(service)?,
            InstanceId::new(instance_id)?,
        ))
    }

    pub(crate) fn not_found(&self) -> RegistryError {
        RegistryError::not_found(self.service.as_str(), self.instance_id.as_str())
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.instance_id)
    }
}

// =============================================================================
// Status
// =============================================================================

/// Instance status reported by the client or an operator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Booting, not ready for traffic
    Starting,
    /// Ready for traffic
    #[default]
    Up,
    /// Failed its own health checks
    Down,
    /// Deliberately taken out of rotation
    OutOfService,
    /// Status not known
    Unknown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::OutOfService => "OUT_OF_SERVICE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> RegistryResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STARTING" => Ok(Self::Starting),
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            "OUT_OF_SERVICE" => Ok(Self::OutOfService),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(RegistryError::invalid_argument(
                "status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

// =============================================================================
// Instance
// =============================================================================

/// A registered service instance as seen by discovery clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_name: ServiceName,
    pub instance_id: InstanceId,
    pub address: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_port: Option<u16>,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ServiceInstance {
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.service_name.clone(), self.instance_id.clone())
    }

    /// Check the fields the identifier newtypes do not cover
    ///
    /// Runs for local registrations and for registrations replicated from
    /// peers, so both paths accept exactly the same records.
    pub fn validate(&self) -> RegistryResult<()> {
        if self.address.trim().is_empty() {
            return Err(RegistryError::invalid_argument("address", "cannot be empty"));
        }
        if self.port == 0 {
            return Err(RegistryError::invalid_argument("port", "must be non-zero"));
        }
        if matches!(self.secure_port, Some(0)) {
            return Err(RegistryError::invalid_argument(
                "secure_port",
                "must be non-zero when present",
            ));
        }
        validate_metadata(&self.metadata)
    }
}

/// Unvalidated registration as received from a client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub service_name: String,
    pub instance_id: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub secure_address: Option<String>,
    #[serde(default)]
    pub secure_port: Option<u16>,
    #[serde(default)]
    pub status: Option<InstanceStatus>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Renewal interval the client promises to keep
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

impl RegisterRequest {
    /// Minimal request with the required fields
    pub fn new(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            address: address.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Validate every field and build the instance
    ///
    /// Returns the instance and the requested lease duration, if any.
    pub fn into_instance(self) -> RegistryResult<(ServiceInstance, Option<u64>)> {
        let instance = ServiceInstance {
            service_name: ServiceName::new(&self.service_name)?,
            instance_id: InstanceId::new(self.instance_id)?,
            address: self.address,
            port: self.port,
            secure_address: self.secure_address,
            secure_port: self.secure_port,
            status: self.status.unwrap_or_default(),
            metadata: self.metadata,
        };
        instance.validate()?;

        if matches!(self.duration_secs, Some(0)) {
            return Err(RegistryError::invalid_argument(
                "duration_secs",
                "must be positive when present",
            ));
        }
        Ok((instance, self.duration_secs))
    }
}

fn validate_metadata(metadata: &BTreeMap<String, String>) -> RegistryResult<()> {
    if metadata.len() > INSTANCE_METADATA_ENTRIES_COUNT_MAX {
        return Err(RegistryError::invalid_argument(
            "metadata",
            format!(
                "{} entries exceeds limit {}",
                metadata.len(),
                INSTANCE_METADATA_ENTRIES_COUNT_MAX
            ),
        ));
    }
    for (k, v) in metadata {
        if k.is_empty() {
            return Err(RegistryError::invalid_argument("metadata", "empty key"));
        }
        if k.len() > INSTANCE_METADATA_FIELD_BYTES_MAX || v.len() > INSTANCE_METADATA_FIELD_BYTES_MAX
        {
            return Err(RegistryError::invalid_argument(
                "metadata",
                format!("entry '{}' exceeds {} bytes", k, INSTANCE_METADATA_FIELD_BYTES_MAX),
            ));
        }
    }
    Ok(())
}
