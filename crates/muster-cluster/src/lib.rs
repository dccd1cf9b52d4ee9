//! Muster Cluster
//!
//! Peer replication for the Muster registry.
//!
//! # Overview
//!
//! Every node is a full replica. Local mutations are queued per peer by the
//! [`Gossiper`] and delivered through a [`PeerTransport`]; receivers apply
//! them last-write-wins and never forward them.

pub mod error;
pub mod gossiper;
pub mod transport;

pub use error::{ClusterError, ClusterResult};
pub use gossiper::{Gossiper, PeerStats, RetryPolicy};
pub use transport::{
    HttpPeerTransport, MemoryPeerTransport, PeerTransport, ReplicationAck, REPLICATE_PATH,
};
