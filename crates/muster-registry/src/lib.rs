//! Muster Registry
//!
//! Lease-based instance registry for service discovery.
//!
//! # Overview
//!
//! The registry provides:
//! - A concurrent instance store keyed by `(service, instance_id)`
//! - Leases renewed by client heartbeats, evicted when they go silent
//! - Self-preservation against mass eviction during partitions
//! - A versioned feed for client-side caches (full or delta)
//! - Last-write-wins application of replicated peer mutations

pub mod error;
pub mod eviction;
pub mod feed;
pub mod instance;
pub mod lease;
pub mod preservation;
pub mod registry;
pub mod replication;
pub mod scheduler;
pub mod store;

pub use error::{RegistryError, RegistryResult};
pub use eviction::EvictionReport;
pub use feed::{Change, ChangeEntry, ClientFeed, FeedResponse};
pub use instance::{
    InstanceId, InstanceKey, InstanceStatus, RegisterRequest, ServiceInstance, ServiceName,
};
pub use lease::{Lease, LeaseManager, LeasePolicy};
pub use preservation::{PreservationController, PreservationState, RenewalMeter, RenewalStats};
pub use registry::{Registry, RegistryStats};
pub use replication::{ApplyOutcome, ReplicationAction, ReplicationEvent, ReplicationSink};
pub use scheduler::RegistryScheduler;
pub use store::{InstanceRecord, InstanceStore, LeaseSummary};
