//! In-memory ResourceStore.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::model::{Identity, Kind, ObjectMeta, Resource, ResourceRef, ResourceStatus};

use super::error::{Result, StoreError};
use super::event::Event;
use super::traits::ResourceStore;

type Key = (Kind, Identity);

/// Versioned in-memory store with broadcast change notifications.
pub struct MemoryStore {
    objects: RwLock<BTreeMap<Key, Resource>>,
    events: broadcast::Sender<Event>,
}

impl MemoryStore {
    pub fn new(events: broadcast::Sender<Event>) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(256);
        Self::new(events)
    }
}

fn not_found(kind: Kind, id: &Identity) -> StoreError {
    StoreError::NotFound(format!("{} {}", kind, id))
}

fn check_version(current: &Resource, expected: u64) -> Result<()> {
    if current.meta.resource_version != expected {
        return Err(StoreError::VersionMismatch {
            expected,
            actual: current.meta.resource_version,
        });
    }
    Ok(())
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, kind: Kind, id: &Identity) -> Result<Option<Resource>> {
        let objects = self.objects.read().await;
        Ok(objects.get(&(kind, id.clone())).cloned())
    }

    async fn list(&self, kind: Kind, namespace: Option<&str>) -> Result<Vec<Resource>> {
        let objects = self.objects.read().await;
        Ok(objects
            .iter()
            .filter(|((k, id), _)| *k == kind && namespace.is_none_or(|ns| id.namespace == ns))
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn apply(&self, kind: Kind, id: &Identity, spec: Value) -> Result<Resource> {
        let mut objects = self.objects.write().await;
        let key = (kind, id.clone());

        let resource = match objects.get_mut(&key) {
            Some(existing) => {
                if existing.meta.deletion_requested() {
                    return Err(StoreError::Conflict(format!(
                        "{} {} is being deleted",
                        kind, id
                    )));
                }
                if existing.spec == spec {
                    return Ok(existing.clone());
                }
                existing.spec = spec;
                existing.meta.generation += 1;
                existing.meta.resource_version += 1;
                existing.clone()
            }
            None => {
                let resource = Resource {
                    kind,
                    meta: ObjectMeta {
                        namespace: id.namespace.clone(),
                        name: id.name.clone(),
                        uid: uuid::Uuid::new_v4().to_string(),
                        resource_version: 1,
                        generation: 1,
                        created_at: Utc::now(),
                        deletion_timestamp: None,
                        finalizers: Vec::new(),
                    },
                    spec,
                    status: ResourceStatus::default(),
                };
                objects.insert(key, resource.clone());
                resource
            }
        };
        drop(objects);

        debug!("Applied {} {} (generation {})", kind, id, resource.meta.generation);
        self.emit(Event::Applied(resource.clone()));
        Ok(resource)
    }

    async fn delete(&self, kind: Kind, id: &Identity) -> Result<()> {
        let mut objects = self.objects.write().await;
        let key = (kind, id.clone());

        let Some(existing) = objects.get_mut(&key) else {
            return Err(not_found(kind, id));
        };

        if existing.meta.finalizers.is_empty() {
            objects.remove(&key);
            drop(objects);
            self.emit(Event::Removed(ResourceRef::new(kind, id)));
            return Ok(());
        }

        if existing.meta.deletion_requested() {
            return Ok(());
        }

        existing.meta.deletion_timestamp = Some(Utc::now());
        existing.meta.resource_version += 1;
        let resource = existing.clone();
        drop(objects);

        self.emit(Event::DeletionRequested(resource));
        Ok(())
    }

    async fn update_status(
        &self,
        kind: Kind,
        id: &Identity,
        expected_version: u64,
        status: ResourceStatus,
    ) -> Result<Resource> {
        let mut objects = self.objects.write().await;
        let existing = objects
            .get_mut(&(kind, id.clone()))
            .ok_or_else(|| not_found(kind, id))?;
        check_version(existing, expected_version)?;

        existing.status = status;
        existing.meta.resource_version += 1;
        let resource = existing.clone();
        drop(objects);

        self.emit(Event::StatusUpdated(resource.clone()));
        Ok(resource)
    }

    async fn update_finalizers(
        &self,
        kind: Kind,
        id: &Identity,
        expected_version: u64,
        finalizers: Vec<String>,
    ) -> Result<Option<Resource>> {
        let mut objects = self.objects.write().await;
        let key = (kind, id.clone());
        let existing = objects.get_mut(&key).ok_or_else(|| not_found(kind, id))?;
        check_version(existing, expected_version)?;

        if existing.meta.deletion_requested() && finalizers.is_empty() {
            objects.remove(&key);
            drop(objects);
            debug!("Released {} {}", kind, id);
            self.emit(Event::Removed(ResourceRef::new(kind, id)));
            return Ok(None);
        }

        existing.meta.finalizers = finalizers;
        existing.meta.resource_version += 1;
        let resource = existing.clone();
        drop(objects);

        self.emit(Event::StatusUpdated(resource.clone()));
        Ok(Some(resource))
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(name: &str) -> Identity {
        Identity::new("default", name)
    }

    #[tokio::test]
    async fn test_apply_creates_then_bumps_generation() {
        let store = MemoryStore::default();
        let a = store
            .apply(Kind::ApiDefinition, &id("a"), json!({"name": "a"}))
            .await
            .unwrap();
        assert_eq!(a.meta.generation, 1);
        assert_eq!(a.meta.resource_version, 1);

        let same = store
            .apply(Kind::ApiDefinition, &id("a"), json!({"name": "a"}))
            .await
            .unwrap();
        assert_eq!(same.meta.resource_version, 1);

        let b = store
            .apply(Kind::ApiDefinition, &id("a"), json!({"name": "b"}))
            .await
            .unwrap();
        assert_eq!(b.meta.generation, 2);
        assert_eq!(b.meta.resource_version, 2);
    }

    #[tokio::test]
    async fn test_update_status_version_mismatch() {
        let store = MemoryStore::default();
        let a = store
            .apply(Kind::ApiDefinition, &id("a"), json!({}))
            .await
            .unwrap();

        let status = ResourceStatus {
            remote_id: "r1".to_string(),
            ..Default::default()
        };
        store
            .update_status(Kind::ApiDefinition, &id("a"), a.meta.resource_version, status.clone())
            .await
            .unwrap();

        let err = store
            .update_status(Kind::ApiDefinition, &id("a"), a.meta.resource_version, status)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { expected: 1, actual: 2 }));
    }

    #[tokio::test]
    async fn test_delete_without_finalizers_removes() {
        let store = MemoryStore::default();
        store
            .apply(Kind::SubGraph, &id("s"), json!({}))
            .await
            .unwrap();
        store.delete(Kind::SubGraph, &id("s")).await.unwrap();
        assert!(store.get(Kind::SubGraph, &id("s")).await.unwrap().is_none());
        assert!(matches!(
            store.delete(Kind::SubGraph, &id("s")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_with_finalizer_waits_for_release() {
        let store = MemoryStore::default();
        let r = store
            .apply(Kind::SubGraph, &id("s"), json!({}))
            .await
            .unwrap();
        let r = store
            .update_finalizers(
                Kind::SubGraph,
                &id("s"),
                r.meta.resource_version,
                vec!["f".to_string()],
            )
            .await
            .unwrap()
            .unwrap();

        store.delete(Kind::SubGraph, &id("s")).await.unwrap();
        let pending = store.get(Kind::SubGraph, &id("s")).await.unwrap().unwrap();
        assert!(pending.meta.deletion_requested());
        assert!(pending.meta.resource_version > r.meta.resource_version);

        let err = store
            .apply(Kind::SubGraph, &id("s"), json!({"schema": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let released = store
            .update_finalizers(Kind::SubGraph, &id("s"), pending.meta.resource_version, vec![])
            .await
            .unwrap();
        assert!(released.is_none());
        assert!(store.get(Kind::SubGraph, &id("s")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_kind_and_namespace() {
        let store = MemoryStore::default();
        store
            .apply(Kind::ApiDefinition, &Identity::new("a", "x"), json!({}))
            .await
            .unwrap();
        store
            .apply(Kind::ApiDefinition, &Identity::new("b", "y"), json!({}))
            .await
            .unwrap();
        store
            .apply(Kind::SecurityPolicy, &Identity::new("a", "p"), json!({}))
            .await
            .unwrap();

        assert_eq!(store.list(Kind::ApiDefinition, None).await.unwrap().len(), 2);
        assert_eq!(store.list(Kind::ApiDefinition, Some("a")).await.unwrap().len(), 1);
        assert_eq!(store.list(Kind::SecurityPolicy, Some("b")).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let store = MemoryStore::default();
        let mut rx = store.subscribe();
        store
            .apply(Kind::ApiDefinition, &id("a"), json!({}))
            .await
            .unwrap();
        store.delete(Kind::ApiDefinition, &id("a")).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), Event::Applied(_)));
        match rx.recv().await.unwrap() {
            Event::Removed(r) => assert_eq!(r.name, "a"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_modify_status_applies_mutation() {
        let store = MemoryStore::default();
        store
            .apply(Kind::ApiDefinition, &id("a"), json!({}))
            .await
            .unwrap();

        let mut calls = 0;
        let updated = crate::store::modify_status(&store, Kind::ApiDefinition, &id("a"), |s| {
            calls += 1;
            s.remote_id = format!("r{}", calls);
            true
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(updated.status.remote_id, "r1");
        assert_eq!(calls, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_modify_status_concurrent_writers() {
        let store = std::sync::Arc::new(MemoryStore::default());
        store
            .apply(Kind::ApiDefinition, &id("a"), json!({}))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let link = ResourceRef::new(Kind::SecurityPolicy, &id(&format!("p{}", i)));
                crate::store::modify_status(store.as_ref(), Kind::ApiDefinition, &id("a"), |s| {
                    s.reverse_links.insert(link.clone())
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let a = store.get(Kind::ApiDefinition, &id("a")).await.unwrap().unwrap();
        assert_eq!(a.status.reverse_links.len(), 10);
    }
}
