//! Host-owned lookup of queues by name.

use dashmap::DashMap;
use tracing::info;

use crate::config::QueueConfig;
use crate::queue::Queue;

/// Explicit table of named queues. The host creates it and passes it to
/// whatever needs to look queues up; there is no global instance.
#[derive(Default)]
pub struct QueueRegistry {
    queues: DashMap<String, Queue>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the queue called `name`, creating it with `config` if absent.
    pub fn get_or_create(&self, name: &str, config: QueueConfig) -> Queue {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(queue = %name, "Creating queue");
                Queue::builder(name).config(config).build()
            })
            .clone()
    }

    /// Register an existing queue. Returns the queue it replaced, if any.
    pub fn register(&self, queue: Queue) -> Option<Queue> {
        self.queues.insert(queue.name().to_string(), queue)
    }

    pub fn get(&self, name: &str) -> Option<Queue> {
        self.queues.get(name).map(|entry| entry.value().clone())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Forget a queue without closing it.
    pub fn remove(&self, name: &str) -> Option<Queue> {
        self.queues.remove(name).map(|(_, queue)| queue)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Close and forget every queue.
    pub async fn close_all(&self) {
        let queues: Vec<Queue> = self.queues.iter().map(|entry| entry.value().clone()).collect();
        self.queues.clear();
        for queue in queues {
            queue.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_returns_same_queue() {
        let registry = QueueRegistry::new();
        let a = registry.get_or_create("email", QueueConfig::default());
        let b = registry.get_or_create("email", QueueConfig::default());

        a.add("welcome", serde_json::json!({}), Default::default()).await.unwrap();
        assert_eq!(b.count().await.unwrap(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_names_sorted_and_remove() {
        let registry = QueueRegistry::new();
        registry.get_or_create("video", QueueConfig::default());
        registry.register(Queue::new("audio"));

        assert_eq!(registry.names(), vec!["audio", "video"]);
        assert!(registry.remove("audio").is_some());
        assert!(registry.get("audio").is_none());
        assert!(registry.get("video").is_some());
    }

    #[tokio::test]
    async fn test_registries_are_independent() {
        let first = QueueRegistry::new();
        let second = QueueRegistry::new();
        let a = first.get_or_create("email", QueueConfig::default());
        let b = second.get_or_create("email", QueueConfig::default());

        a.add("welcome", serde_json::json!({}), Default::default()).await.unwrap();
        assert_eq!(a.count().await.unwrap(), 1);
        assert_eq!(b.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = QueueRegistry::new();
        let queue = registry.get_or_create("reports", QueueConfig::default());

        registry.close_all().await;
        assert!(registry.is_empty());
        assert!(queue.is_closed());
    }
}
