//! Muster Server
//!
//! HTTP surface of the Muster registry: client registration and discovery,
//! peer replication intake, and operational status.

pub mod api;
pub mod models;
pub mod state;
