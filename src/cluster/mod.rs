//! Cluster Module
//!
//! Hash partitioning of lock ids across a fixed set of lock servers.

pub mod hash;
mod router;

pub use hash::{compute_hash, HashKey};
pub use router::{ClusterRouter, ClusterRouterBuilder, NodeDescriptor};
