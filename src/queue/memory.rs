//! In-process store
//!
//! Keeps everything in `DashMap`s and, when given a snapshot path, writes a
//! YAML snapshot on [`KeyValueStore::persist`] that is loaded again on start.

use crate::QUEUE_TARGET;
use crate::queue::{KeyValueStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredValue {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// On-disk layout of a snapshot
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    sets: BTreeMap<String, BTreeSet<String>>,
    values: BTreeMap<String, StoredValue>,
}

/// `DashMap`-backed store
#[derive(Clone, Default)]
pub struct MemoryStore {
    sets: Arc<DashMap<String, HashSet<String>>>,
    values: Arc<DashMap<String, StoredValue>>,
    snapshot_path: Option<PathBuf>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("sets", &self.sets.len())
            .field("values", &self.values.len())
            .field("snapshot_path", &self.snapshot_path)
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store with no durable storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a snapshot file
    ///
    /// A missing file yields an empty store that will be written there on persist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Snapshot` if the file exists but cannot be read or parsed.
    pub async fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let store = Self {
            snapshot_path: Some(path.clone()),
            ..Self::default()
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(store),
            Err(e) => return Err(StoreError::Snapshot(format!("{}: {e}", path.display()))),
        };

        let snapshot: Snapshot = serde_yaml::from_str(&content)
            .map_err(|e| StoreError::Snapshot(format!("{}: {e}", path.display())))?;

        let now = Utc::now();
        for (key, members) in snapshot.sets {
            store.sets.insert(key, members.into_iter().collect());
        }
        for (key, value) in snapshot.values {
            if !value.is_expired(now) {
                store.values.insert(key, value);
            }
        }

        info!(
            target: QUEUE_TARGET,
            path = %path.display(),
            sets = store.sets.len(),
            values = store.values.len(),
            "Loaded store snapshot"
        );
        Ok(store)
    }

    fn snapshot(&self) -> Snapshot {
        let now = Utc::now();
        Snapshot {
            sets: self
                .sets
                .iter()
                .filter(|entry| !entry.value().is_empty())
                .map(|entry| (entry.key().clone(), entry.value().iter().cloned().collect()))
                .collect(),
            values: self
                .values
                .iter()
                .filter(|entry| !entry.value().is_expired(now))
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_is_member(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .sets
            .get(key)
            .is_some_and(|members| members.contains(member)))
    }

    async fn set_len(&self, key: &str) -> StoreResult<u64> {
        Ok(self.sets.get(key).map_or(0, |members| members.len() as u64))
    }

    async fn set_pop(&self, key: &str) -> StoreResult<Option<String>> {
        let Some(mut members) = self.sets.get_mut(key) else {
            return Ok(None);
        };
        let member = members.iter().next().cloned();
        if let Some(member) = &member {
            members.remove(member);
        }
        Ok(member)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Utc::now();
        if let Some(stored) = self.values.get(key) {
            if !stored.is_expired(now) {
                return Ok(Some(stored.value.clone()));
            }
        } else {
            return Ok(None);
        }
        // expired; the read guard above is released by now
        self.values.remove_if(key, |_, stored| stored.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = match ttl {
            Some(ttl) => Some(
                Utc::now()
                    + chrono::Duration::from_std(ttl)
                        .map_err(|e| StoreError::operation("SET", e))?,
            ),
            None => None,
        };
        self.values.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.values.remove(key);
        self.sets.remove(key);
        Ok(())
    }

    async fn persist(&self) -> StoreResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Snapshot(format!("{}: {e}", parent.display())))?;
            }
        }

        let yaml = serde_yaml::to_string(&self.snapshot())
            .map_err(|e| StoreError::Snapshot(e.to_string()))?;
        tokio::fs::write(path, yaml)
            .await
            .map_err(|e| StoreError::Snapshot(format!("{}: {e}", path.display())))?;

        info!(target: QUEUE_TARGET, path = %path.display(), "Store snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();
        assert!(store.set_add("clean", "1").await.unwrap());
        assert!(!store.set_add("clean", "1").await.unwrap());
        assert!(store.set_add("clean", "2").await.unwrap());

        assert!(store.set_is_member("clean", "1").await.unwrap());
        assert!(!store.set_is_member("clean", "3").await.unwrap());
        assert!(!store.set_is_member("blocked", "1").await.unwrap());
        assert_eq!(store.set_len("clean").await.unwrap(), 2);
        assert_eq!(store.set_len("blocked").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_pop_drains() {
        let store = MemoryStore::new();
        store.set_add("pending", "a").await.unwrap();
        store.set_add("pending", "b").await.unwrap();

        let mut popped = vec![
            store.set_pop("pending").await.unwrap().unwrap(),
            store.set_pop("pending").await.unwrap().unwrap(),
        ];
        popped.sort();

        assert_eq!(popped, vec!["a", "b"]);
        assert_eq!(store.set_pop("pending").await.unwrap(), None);
        assert_eq!(store.set_pop("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_values_and_expiry() {
        let store = MemoryStore::new();
        store.set("entity-1", "{}", None).await.unwrap();
        store
            .set("topic-rust", "100", Some(Duration::from_secs(300)))
            .await
            .unwrap();
        store
            .set("topic-gone", "5", Some(Duration::ZERO))
            .await
            .unwrap();

        assert_eq!(store.get("entity-1").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(store.get("topic-rust").await.unwrap().as_deref(), Some("100"));
        assert_eq!(store.get("topic-gone").await.unwrap(), None);
        assert_eq!(store.get("nothing").await.unwrap(), None);

        store.delete("entity-1").await.unwrap();
        assert_eq!(store.get("entity-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.yaml");

        let store = MemoryStore::load(&path).await.unwrap();
        store.set_add("blocked", "10").await.unwrap();
        store.set_add("pending", "11").await.unwrap();
        store.set("entity-11", r#"{"id_str":"11"}"#, None).await.unwrap();
        store.set("topic-old", "1", Some(Duration::ZERO)).await.unwrap();
        store.persist().await.unwrap();

        let restored = MemoryStore::load(&path).await.unwrap();
        assert!(restored.set_is_member("blocked", "10").await.unwrap());
        assert_eq!(restored.set_len("pending").await.unwrap(), 1);
        assert_eq!(
            restored.get("entity-11").await.unwrap().as_deref(),
            Some(r#"{"id_str":"11"}"#)
        );
        assert_eq!(restored.get("topic-old").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");
        std::fs::write(&path, "sets: [not, a, map").unwrap();

        let error = MemoryStore::load(&path).await.unwrap_err();
        assert!(matches!(error, StoreError::Snapshot(_)));
    }

    #[tokio::test]
    async fn test_persist_without_path_is_noop() {
        let store = MemoryStore::new();
        store.set_add("clean", "1").await.unwrap();
        assert!(store.persist().await.is_ok());
    }
}
