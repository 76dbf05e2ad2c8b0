//! Lock Client Trait
//!
//! Common surface of a single-node connection and a cluster router, so
//! callers can hold either behind one interface.

use std::time::Duration;

use async_trait::async_trait;

use crate::cluster::ClusterRouter;
use crate::connection::LockConnection;
use crate::error::Result;
use crate::protocol::{LockMode, Status};

/// Operations every blockd client supports
#[async_trait]
pub trait LockClient: Send + Sync {
    /// Open the connection(s) and check the greeting
    async fn connect(&self) -> Result<()>;

    /// Local connectivity check
    fn is_connected(&self) -> bool;

    /// Close the connection(s)
    async fn quit(&self) -> Result<()>;

    async fn wisdom(&self) -> Result<String>;

    /// Currently held lock ids
    async fn show(&self) -> Result<Vec<String>>;

    async fn acquire(&self, lock_id: &str) -> Result<Status>;

    async fn acquire_with_timeout(&self, lock_id: &str, wait: Duration) -> Result<Status>;

    async fn acquire_with_mode(
        &self,
        lock_id: &str,
        wait: Duration,
        mode: LockMode,
    ) -> Result<Status>;

    async fn release(&self, lock_id: &str) -> Result<Status>;

    /// Release everything held; returns the released ids
    async fn release_all(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl LockClient for LockConnection {
    async fn connect(&self) -> Result<()> {
        LockConnection::connect(self).await
    }

    fn is_connected(&self) -> bool {
        LockConnection::is_connected(self)
    }

    async fn quit(&self) -> Result<()> {
        LockConnection::quit(self).await
    }

    async fn wisdom(&self) -> Result<String> {
        LockConnection::wisdom(self).await
    }

    async fn show(&self) -> Result<Vec<String>> {
        LockConnection::show(self).await
    }

    async fn acquire(&self, lock_id: &str) -> Result<Status> {
        LockConnection::acquire(self, lock_id).await
    }

    async fn acquire_with_timeout(&self, lock_id: &str, wait: Duration) -> Result<Status> {
        LockConnection::acquire_with_timeout(self, lock_id, wait).await
    }

    async fn acquire_with_mode(
        &self,
        lock_id: &str,
        wait: Duration,
        mode: LockMode,
    ) -> Result<Status> {
        LockConnection::acquire_with_mode(self, lock_id, wait, mode).await
    }

    async fn release(&self, lock_id: &str) -> Result<Status> {
        LockConnection::release(self, lock_id).await
    }

    async fn release_all(&self) -> Result<Vec<String>> {
        LockConnection::release_all(self).await
    }
}

#[async_trait]
impl LockClient for ClusterRouter {
    async fn connect(&self) -> Result<()> {
        ClusterRouter::connect(self).await
    }

    fn is_connected(&self) -> bool {
        ClusterRouter::is_connected(self)
    }

    async fn quit(&self) -> Result<()> {
        ClusterRouter::quit(self).await
    }

    async fn wisdom(&self) -> Result<String> {
        ClusterRouter::wisdom(self).await
    }

    async fn show(&self) -> Result<Vec<String>> {
        ClusterRouter::show(self).await
    }

    async fn acquire(&self, lock_id: &str) -> Result<Status> {
        ClusterRouter::acquire(self, lock_id).await
    }

    async fn acquire_with_timeout(&self, lock_id: &str, wait: Duration) -> Result<Status> {
        ClusterRouter::acquire_with_timeout(self, lock_id, wait).await
    }

    async fn acquire_with_mode(
        &self,
        lock_id: &str,
        wait: Duration,
        mode: LockMode,
    ) -> Result<Status> {
        ClusterRouter::acquire_with_mode(self, lock_id, wait, mode).await
    }

    async fn release(&self, lock_id: &str) -> Result<Status> {
        ClusterRouter::release(self, lock_id).await
    }

    async fn release_all(&self) -> Result<Vec<String>> {
        ClusterRouter::release_all(self).await
    }
}
