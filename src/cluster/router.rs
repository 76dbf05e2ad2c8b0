//! Cluster Router
//!
//! Routes each lock to exactly one lock server by hashing the lock id into one
//! of N equal-width ranges, and fans cluster-wide operations out to every node.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use super::hash::{bucket_for, compute_hash, node_key, HashKey};
use crate::config::BlockdConfig;
use crate::connection::{ConnectionSettings, LockConnection};
use crate::error::{Error, NodeFailure, Result};
use crate::listener::{ListenerId, LockListener};
use crate::protocol::{Codec, CodecKind, LockMode, Status};

/// Identity and routing key of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub host: String,
    pub port: u16,
    pub hash_key: HashKey,
}

impl NodeDescriptor {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            hash_key: node_key(&host, port),
            host,
            port,
        }
    }

    /// Node address (host:port)
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Node {
    descriptor: NodeDescriptor,
    connection: Arc<LockConnection>,
}

/// Collects nodes before the routing table is frozen
pub struct ClusterRouterBuilder {
    codec: Arc<dyn Codec>,
    settings: ConnectionSettings,
    nodes: Vec<NodeDescriptor>,
}

impl ClusterRouterBuilder {
    pub fn new() -> Self {
        Self {
            codec: CodecKind::default().build(),
            settings: ConnectionSettings::default(),
            nodes: Vec::new(),
        }
    }

    /// Wire encoding used by every node
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Connection settings used by every node
    pub fn settings(mut self, settings: ConnectionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Register a lock server
    pub fn add_node(mut self, host: impl Into<String>, port: u16) -> Self {
        self.nodes.push(NodeDescriptor::new(host, port));
        self
    }

    /// Freeze the routing table. Nodes whose keys collide replace earlier ones.
    pub fn build(self) -> ClusterRouter {
        let mut nodes = BTreeMap::new();

        for descriptor in self.nodes {
            let connection = Arc::new(LockConnection::new(
                descriptor.host.clone(),
                descriptor.port,
                Arc::clone(&self.codec),
                self.settings.clone(),
            ));

            let key = descriptor.hash_key;
            let node = Node { descriptor, connection };
            if let Some(replaced) = nodes.insert(key, node) {
                tracing::warn!(
                    "Node {} replaced {} (hash key {} collides)",
                    nodes[&key].descriptor.address(),
                    replaced.descriptor.address(),
                    key
                );
            }
        }

        ClusterRouter { nodes }
    }
}

impl Default for ClusterRouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Client for a fixed set of lock servers
pub struct ClusterRouter {
    /// Routing table ordered by ascending hash key
    nodes: BTreeMap<HashKey, Node>,
}

impl ClusterRouter {
    pub fn builder() -> ClusterRouterBuilder {
        ClusterRouterBuilder::new()
    }

    /// Build a router for every node in the configuration
    pub fn from_config(config: &BlockdConfig) -> Result<Self> {
        config.validate()?;

        let builder = config.nodes.iter().fold(
            Self::builder()
                .codec(config.client.codec.build())
                .settings(ConnectionSettings::from(&config.client)),
            |builder, node| builder.add_node(node.host.clone(), node.port),
        );
        Ok(builder.build())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Registered nodes in routing order
    pub fn nodes(&self) -> Vec<NodeDescriptor> {
        self.nodes.values().map(|n| n.descriptor.clone()).collect()
    }

    /// Connection for a node key
    pub fn connection(&self, key: HashKey) -> Option<&Arc<LockConnection>> {
        self.nodes.get(&key).map(|n| &n.connection)
    }

    /// Key of the node that owns `lock_id`
    pub fn which_node(&self, lock_id: &str) -> Result<HashKey> {
        if self.nodes.is_empty() {
            return Err(Error::NoNodes);
        }

        let lock_hash = compute_hash(lock_id);
        bucket_for(lock_hash, self.nodes.len())
            .and_then(|index| self.nodes.keys().nth(index).copied())
            .ok_or(Error::Routing { lock_hash })
    }

    /// Descriptor of the node that owns `lock_id`
    pub fn route(&self, lock_id: &str) -> Result<&NodeDescriptor> {
        let key = self.which_node(lock_id)?;
        Ok(&self.nodes[&key].descriptor)
    }

    fn node_for(&self, lock_id: &str) -> Result<&LockConnection> {
        let key = self.which_node(lock_id)?;
        let node = &self.nodes[&key];
        tracing::debug!("Lock {} routed to {}", lock_id, node.descriptor.address());
        Ok(node.connection.as_ref())
    }

    /// Connect every node in key order; stops at the first failure
    pub async fn connect(&self) -> Result<()> {
        for node in self.nodes.values() {
            node.connection.connect().await?;
        }
        tracing::info!("Connected to {} lock server(s)", self.nodes.len());
        Ok(())
    }

    /// True only when every node is connected
    pub fn is_connected(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.values().all(|n| n.connection.is_connected())
    }

    /// Quit every node; all are attempted
    pub async fn quit(&self) -> Result<()> {
        let (done, failures) = self
            .fan_out(|connection| async move {
                connection.quit().await?;
                Ok::<_, Error>(connection.address().to_string())
            })
            .await;
        aggregate(done, failures)?;
        Ok(())
    }

    /// Wisdom from the first node
    pub async fn wisdom(&self) -> Result<String> {
        let node = self.nodes.values().next().ok_or(Error::NoNodes)?;
        node.connection.wisdom().await
    }

    /// Locks held across the cluster, concatenated in node order
    pub async fn show(&self) -> Result<Vec<String>> {
        let (locks, failures) = self.fan_out(|connection| connection.show()).await;
        aggregate(locks.into_iter().flatten().collect(), failures)
    }

    pub async fn acquire(&self, lock_id: &str) -> Result<Status> {
        self.node_for(lock_id)?.acquire(lock_id).await
    }

    pub async fn acquire_with_timeout(&self, lock_id: &str, wait: Duration) -> Result<Status> {
        self.node_for(lock_id)?.acquire_with_timeout(lock_id, wait).await
    }

    pub async fn acquire_with_mode(
        &self,
        lock_id: &str,
        wait: Duration,
        mode: LockMode,
    ) -> Result<Status> {
        self.node_for(lock_id)?
            .acquire_with_mode(lock_id, wait, mode)
            .await
    }

    pub async fn release(&self, lock_id: &str) -> Result<Status> {
        self.node_for(lock_id)?.release(lock_id).await
    }

    /// Release everything on every node; failures on one node do not stop the rest
    pub async fn release_all(&self) -> Result<Vec<String>> {
        let (released, failures) = self.fan_out(|connection| connection.release_all()).await;
        aggregate(released.into_iter().flatten().collect(), failures)
    }

    /// Register a listener on every node
    pub async fn add_listener(&self, listener: Arc<dyn LockListener>) -> ListenerId {
        let id = ListenerId::next();
        for node in self.nodes.values() {
            node.connection
                .listeners()
                .register(id, Arc::clone(&listener))
                .await;
        }
        id
    }

    /// Unregister a listener from every node
    pub async fn remove_listener(&self, id: ListenerId) -> bool {
        let mut removed = false;
        for node in self.nodes.values() {
            removed |= node.connection.listeners().remove(id).await;
        }
        removed
    }

    /// Listeners registered through the router
    pub async fn listeners(&self) -> Vec<ListenerId> {
        match self.nodes.values().next() {
            Some(node) => node.connection.listeners().list().await,
            None => Vec::new(),
        }
    }

    /// Run `op` on every node concurrently; results come back in node order
    async fn fan_out<'a, T, F, Fut>(&'a self, op: F) -> (Vec<T>, Vec<NodeFailure>)
    where
        F: Fn(&'a LockConnection) -> Fut,
        Fut: Future<Output = Result<T>> + 'a,
    {
        let results = join_all(self.nodes.values().map(|n| op(n.connection.as_ref()))).await;

        let mut done = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (node, result) in self.nodes.values().zip(results) {
            match result {
                Ok(value) => done.push(value),
                Err(error) => {
                    tracing::warn!("Node {} failed: {}", node.descriptor.address(), error);
                    failures.push(NodeFailure {
                        node: node.descriptor.address(),
                        error,
                    });
                }
            }
        }
        (done, failures)
    }
}

fn aggregate(succeeded: Vec<String>, failures: Vec<NodeFailure>) -> Result<Vec<String>> {
    if failures.is_empty() {
        Ok(succeeded)
    } else {
        Err(Error::PartialFailure { succeeded, failures })
    }
}
