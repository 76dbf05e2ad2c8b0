//! Blockd - Client for the blockd Distributed Lock Server
//!
//! Acquire and release named read/write locks held by one or more remote
//! blockd servers, over a persistent line-oriented TCP connection.
//!
//! # Architecture
//!
//! A [`LockConnection`] owns one connection to one server and runs the
//! request/response exchange, including the two-step acquire where the
//! server first answers `LOCKPENDING` and later resolves the wait. A
//! [`ClusterRouter`] holds one connection per server and sends each lock to
//! exactly one of them by hashing the lock id into equal-width ranges.
//!
//! # Features
//!
//! - Plain text and JSON wire encodings behind one `Codec` trait
//! - Per-connection request serialization for concurrent callers
//! - Deterministic lock-to-node routing shared with other blockd clients
//! - Cluster-wide SHOW and RELEASEALL with per-node failure reporting
//! - Listener hooks for acquire outcomes

pub mod config;
pub mod error;
pub mod protocol;
pub mod connection;
pub mod cluster;
pub mod listener;
pub mod client;

#[cfg(test)]
pub(crate) mod testing;

pub use client::LockClient;
pub use cluster::ClusterRouter;
pub use config::BlockdConfig;
pub use connection::LockConnection;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::LockClient;
    pub use crate::cluster::{ClusterRouter, NodeDescriptor};
    pub use crate::config::BlockdConfig;
    pub use crate::connection::{ConnectionSettings, LockConnection};
    pub use crate::error::{Error, Result};
    pub use crate::listener::{ListenerId, LockListener};
    pub use crate::protocol::{CodecKind, LockMode, Status};
}
