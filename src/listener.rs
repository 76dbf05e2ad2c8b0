//! Lock Listeners
//!
//! Observers told about the outcome of every resolved acquire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Observer for acquire outcomes
pub trait LockListener: Send + Sync {
    /// The lock was granted
    fn lock_acquired(&self, lock_id: &str);

    /// The server refused the lock or the wait timed out
    fn lock_failed(&self, lock_id: &str);
}

/// Handle returned when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Registered listeners of one connection, notified in registration order
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn LockListener>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub async fn add(&self, listener: Arc<dyn LockListener>) -> ListenerId {
        let id = ListenerId::next();
        self.register(id, listener).await;
        id
    }

    /// Register under an id allocated elsewhere (shared across cluster nodes)
    pub(crate) async fn register(&self, id: ListenerId, listener: Arc<dyn LockListener>) {
        self.listeners.write().await.push((id, listener));
    }

    /// Unregister a listener; false if the id was unknown
    pub async fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Ids of all registered listeners
    pub async fn list(&self) -> Vec<ListenerId> {
        self.listeners.read().await.iter().map(|(id, _)| *id).collect()
    }

    pub(crate) async fn notify_acquired(&self, lock_id: &str) {
        for (_, listener) in self.listeners.read().await.iter() {
            listener.lock_acquired(lock_id);
        }
    }

    pub(crate) async fn notify_failed(&self, lock_id: &str) {
        for (_, listener) in self.listeners.read().await.iter() {
            listener.lock_failed(lock_id);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every callback as `+id` / `-id`
    #[derive(Default)]
    pub(crate) struct RecordingListener {
        pub events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl LockListener for RecordingListener {
        fn lock_acquired(&self, lock_id: &str) {
            self.events.lock().unwrap().push(format!("+{}", lock_id));
        }

        fn lock_failed(&self, lock_id: &str) {
            self.events.lock().unwrap().push(format!("-{}", lock_id));
        }
    }

    #[tokio::test]
    async fn test_add_remove_list() {
        let registry = ListenerRegistry::new();
        let first = registry.add(Arc::new(RecordingListener::default())).await;
        let second = registry.add(Arc::new(RecordingListener::default())).await;

        assert_ne!(first, second);
        assert_eq!(registry.list().await, vec![first, second]);

        assert!(registry.remove(first).await);
        assert!(!registry.remove(first).await);
        assert_eq!(registry.list().await, vec![second]);
    }

    #[tokio::test]
    async fn test_notifications_reach_every_listener() {
        let registry = ListenerRegistry::new();
        let a = Arc::new(RecordingListener::default());
        let b = Arc::new(RecordingListener::default());
        registry.add(a.clone()).await;
        let b_id = registry.add(b.clone()).await;

        registry.notify_acquired("APOLLO").await;
        registry.remove(b_id).await;
        registry.notify_failed("MICK").await;

        assert_eq!(a.events(), vec!["+APOLLO", "-MICK"]);
        assert_eq!(b.events(), vec!["+APOLLO"]);
    }
}
