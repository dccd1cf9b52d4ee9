//! Muster Core
//!
//! Core types, errors, configuration and constants for the Muster service
//! registry.
//!
//! # Overview
//!
//! Muster is a lease-based service registry: instances register, renew on an
//! interval, are evicted when they go silent, and are discovered by name. A
//! self-preservation guard keeps a network partition from looking like a mass
//! outage, and optional peers replicate every mutation with last-write-wins.
//!
//! # TigerStyle
//!
//! - Explicit limits with big-endian naming (e.g., `LEASE_DURATION_SECS_MAX`)
//! - All clock reads go through [`TimeProvider`]
//! - Configuration is validated before anything starts

pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod node;
pub mod telemetry;

pub use config::{
    ClusterConfig, EvictionConfig, FeedConfig, LeaseConfig, MusterConfig, NodeConfig,
    PreservationConfig, PreservationMode,
};
pub use constants::*;
pub use error::{Error, Result};
pub use io::{ManualClock, TimeProvider, WallClockTime};
pub use node::NodeId;
pub use telemetry::{init_telemetry, TelemetryConfig};
