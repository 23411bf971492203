//! Deduplicating work queue
//!
//! Pending entities live in the `pending` set with their payload stored under
//! `entity-<id>`. Dispositions are recorded in the append-only `blocked` and
//! `clean` sets. Enqueueing is always safe to repeat: whether an entity gets
//! evaluated again is decided by [`DedupQueue::is_disposed`], not by queue
//! membership.

use crate::QUEUE_TARGET;
use crate::data::{Disposition, Entity};
use crate::queue::{KeyValueStore, QueueError, QueueResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const PENDING_KEY: &str = "pending";
pub const BLOCKED_KEY: &str = "blocked";
pub const CLEAN_KEY: &str = "clean";
/// How long a topic watermark survives without being advanced
pub const TOPIC_WATERMARK_TTL: Duration = Duration::from_secs(5 * 60);

#[must_use]
pub fn entity_key(id: &str) -> String {
    format!("entity-{id}")
}

#[must_use]
pub fn topic_key(topic: &str) -> String {
    format!("topic-{topic}")
}

const fn disposition_key(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Blocked => BLOCKED_KEY,
        Disposition::Clean => CLEAN_KEY,
    }
}

const fn opposite(disposition: Disposition) -> Disposition {
    match disposition {
        Disposition::Blocked => Disposition::Clean,
        Disposition::Clean => Disposition::Blocked,
    }
}

#[derive(Clone)]
pub struct DedupQueue {
    store: Arc<dyn KeyValueStore>,
}

impl DedupQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Queue an entity for evaluation, replacing any pending payload
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or the store fails.
    pub async fn enqueue(&self, entity: &Entity) -> QueueResult<()> {
        let payload = serde_json::to_string(entity)?;
        // payload first, so a pending id always has something to pop
        self.store
            .set(&entity_key(&entity.id_str), &payload, None)
            .await?;
        self.store.set_add(PENDING_KEY, &entity.id_str).await?;
        debug!(target: QUEUE_TARGET, entity = %entity, "Entity queued");
        Ok(())
    }

    /// Pop one pending entity, deleting its payload
    ///
    /// Identifiers whose payload is missing or unreadable are dropped with a
    /// warning and the next one is tried.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn dequeue_one(&self) -> QueueResult<Option<Entity>> {
        while let Some(id) = self.store.set_pop(PENDING_KEY).await? {
            let key = entity_key(&id);
            let payload = self.store.get(&key).await?;
            self.store.delete(&key).await?;

            let Some(payload) = payload else {
                warn!(target: QUEUE_TARGET, id = %id, "Pending entity has no payload, skipping");
                continue;
            };
            match serde_json::from_str::<Entity>(&payload) {
                Ok(entity) => return Ok(Some(entity)),
                Err(e) => {
                    warn!(target: QUEUE_TARGET, id = %id, error = %e, "Unreadable entity payload, skipping");
                }
            }
        }
        Ok(None)
    }

    /// Whether the entity has already been blocked or marked clean
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn is_disposed(&self, id: &str) -> QueueResult<bool> {
        Ok(self.disposition(id).await?.is_some())
    }

    /// The recorded disposition of an entity, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn disposition(&self, id: &str) -> QueueResult<Option<Disposition>> {
        for disposition in [Disposition::Blocked, Disposition::Clean] {
            if self
                .store
                .set_is_member(disposition_key(disposition), id)
                .await?
            {
                return Ok(Some(disposition));
            }
        }
        Ok(None)
    }

    /// Record an entity as blocked; returns whether this was new
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConflictingDisposition` if it is already clean.
    pub async fn mark_blocked(&self, id: &str) -> QueueResult<bool> {
        self.mark(id, Disposition::Blocked).await
    }

    /// Record an entity as clean; returns whether this was new
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConflictingDisposition` if it is already blocked.
    pub async fn mark_clean(&self, id: &str) -> QueueResult<bool> {
        self.mark(id, Disposition::Clean).await
    }

    async fn mark(&self, id: &str, disposition: Disposition) -> QueueResult<bool> {
        let other = opposite(disposition);
        if self.store.set_is_member(disposition_key(other), id).await? {
            return Err(QueueError::ConflictingDisposition {
                id: id.to_string(),
                existing: other,
            });
        }
        let added = self
            .store
            .set_add(disposition_key(disposition), id)
            .await?;
        if added {
            debug!(target: QUEUE_TARGET, id = %id, disposition = %disposition, "Disposition recorded");
        }
        Ok(added)
    }

    /// Snapshot of the pending set's size; may be stale
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn pending_count(&self) -> QueueResult<u64> {
        Ok(self.store.set_len(PENDING_KEY).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn blocked_count(&self) -> QueueResult<u64> {
        Ok(self.store.set_len(BLOCKED_KEY).await?)
    }

    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn clean_count(&self) -> QueueResult<u64> {
        Ok(self.store.set_len(CLEAN_KEY).await?)
    }

    /// Newest status id already processed for a topic, 0 if none
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn topic_watermark(&self, topic: &str) -> QueueResult<u64> {
        let value = self.store.get(&topic_key(topic)).await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Raise a topic's watermark to at least `seen_id` and renew its lifetime
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn advance_topic_watermark(&self, topic: &str, seen_id: u64) -> QueueResult<u64> {
        let watermark = self.topic_watermark(topic).await?.max(seen_id);
        self.store
            .set(
                &topic_key(topic),
                &watermark.to_string(),
                Some(TOPIC_WATERMARK_TTL),
            )
            .await?;
        Ok(watermark)
    }

    /// Ask the store to write itself to durable storage
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn flush(&self) -> QueueResult<()> {
        Ok(self.store.persist().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{MemoryStore, MockKeyValueStore, StoreError};

    fn queue() -> (DedupQueue, MemoryStore) {
        let store = MemoryStore::new();
        (DedupQueue::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_disposition_lifecycle() {
        let (queue, _) = queue();

        assert!(!queue.is_disposed("1").await.unwrap());
        assert!(queue.mark_blocked("1").await.unwrap());
        assert!(queue.is_disposed("1").await.unwrap());

        // idempotent
        assert!(!queue.mark_blocked("1").await.unwrap());
        assert_eq!(queue.blocked_count().await.unwrap(), 1);

        assert!(!queue.is_disposed("2").await.unwrap());
        assert!(queue.mark_clean("2").await.unwrap());
        assert!(!queue.mark_clean("2").await.unwrap());
        assert_eq!(queue.clean_count().await.unwrap(), 1);
        assert_eq!(queue.disposition("2").await.unwrap(), Some(Disposition::Clean));
    }

    #[tokio::test]
    async fn test_dispositions_stay_disjoint() {
        let (queue, _) = queue();
        queue.mark_clean("5").await.unwrap();

        let error = queue.mark_blocked("5").await.unwrap_err();
        assert!(matches!(
            error,
            QueueError::ConflictingDisposition {
                existing: Disposition::Clean,
                ..
            }
        ));
        assert_eq!(queue.blocked_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_round_trip() {
        let (queue, store) = queue();
        let entity = Entity::new("77", "someone")
            .with_name("Some One")
            .with_description("just here")
            .with_default_profile_image(true);

        queue.enqueue(&entity).await.unwrap();
        assert_eq!(queue.pending_count().await.unwrap(), 1);

        let popped = queue.dequeue_one().await.unwrap();
        assert_eq!(popped, Some(entity));
        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert!(!store.set_is_member(PENDING_KEY, "77").await.unwrap());
        assert_eq!(store.get(&entity_key("77")).await.unwrap(), None);
        assert_eq!(queue.dequeue_one().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reenqueue_overwrites_payload() {
        let (queue, _) = queue();
        queue
            .enqueue(&Entity::new("3", "old_handle"))
            .await
            .unwrap();
        queue
            .enqueue(&Entity::new("3", "new_handle"))
            .await
            .unwrap();

        assert_eq!(queue.pending_count().await.unwrap(), 1);
        let popped = queue.dequeue_one().await.unwrap().unwrap();
        assert_eq!(popped.screen_name, "new_handle");
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_payloads_are_skipped() {
        let (queue, store) = queue();
        store.set_add(PENDING_KEY, "orphan").await.unwrap();
        store.set_add(PENDING_KEY, "corrupt").await.unwrap();
        store.set(&entity_key("corrupt"), "not json", None).await.unwrap();

        assert_eq!(queue.dequeue_one().await.unwrap(), None);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
        assert_eq!(store.get(&entity_key("corrupt")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_topic_watermark_only_moves_forward() {
        let (queue, _) = queue();
        assert_eq!(queue.topic_watermark("#rust").await.unwrap(), 0);

        assert_eq!(queue.advance_topic_watermark("#rust", 500).await.unwrap(), 500);
        assert_eq!(queue.advance_topic_watermark("#rust", 200).await.unwrap(), 500);
        assert_eq!(queue.topic_watermark("#rust").await.unwrap(), 500);
        assert_eq!(queue.topic_watermark("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_failures_are_fatal() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_set_pop()
            .returning(|_| Err(StoreError::Connection("refused".to_string())));
        let queue = DedupQueue::new(Arc::new(store));

        let error = queue.dequeue_one().await.unwrap_err();
        assert!(error.is_fatal());
    }

    #[tokio::test]
    async fn test_flush_persists_store() {
        let mut store = MockKeyValueStore::new();
        store.expect_persist().times(1).returning(|| Ok(()));
        let queue = DedupQueue::new(Arc::new(store));

        queue.flush().await.unwrap();
    }
}
