//! In-process SparkApplication store with API-server-like semantics:
//! server-assigned uids, a global resourceVersion counter, optimistic
//! updates and a list-then-watch event stream.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use sparkctl_core::{ObjectKey, SourceEvent, SparkApplication};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{key_of, AppEventStream, AppStoreClient, StoreError};

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, SparkApplication>,
    version: u64,
}

struct Inner {
    state: Mutex<State>,
    events: broadcast::Sender<SourceEvent<SparkApplication>>,
    writes: AtomicU64,
}

/// Cheap to clone; clones share the same objects.
#[derive(Clone)]
pub struct MemoryAppStore {
    inner: Arc<Inner>,
}

impl Default for MemoryAppStore {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

impl MemoryAppStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `cap` bounds the watch backlog; a lagging watcher is relisted.
    pub fn with_capacity(cap: usize) -> Self {
        let (events, _) = broadcast::channel(cap.max(1));
        let inner = Inner { state: Mutex::new(State::default()), events, writes: AtomicU64::new(0) };
        Self { inner: Arc::new(inner) }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Create an object. A missing uid is generated; a preset one is kept.
    pub fn create(&self, mut app: SparkApplication) -> Result<SparkApplication, StoreError> {
        let key = key_of(&app)?;
        let mut st = self.lock();
        if st.objects.contains_key(&key) {
            return Err(StoreError::Conflict { key: key.to_string(), message: "already exists".into() });
        }
        st.version += 1;
        let meta = &mut app.metadata;
        meta.namespace = Some(key.namespace.clone());
        if meta.uid.as_deref().map_or(true, str::is_empty) {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        meta.resource_version = Some(st.version.to_string());
        st.objects.insert(key, app.clone());
        let _ = self.inner.events.send(SourceEvent::Applied(app.clone()));
        Ok(app)
    }

    /// Unconditional external modification (a user editing the object).
    pub fn modify<F>(&self, key: &ObjectKey, f: F) -> Result<SparkApplication, StoreError>
    where
        F: FnOnce(&mut SparkApplication),
    {
        let mut st = self.lock();
        st.version += 1;
        let version = st.version.to_string();
        let obj = st
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound { key: key.to_string() })?;
        f(obj);
        obj.metadata.resource_version = Some(version);
        let out = obj.clone();
        let _ = self.inner.events.send(SourceEvent::Applied(out.clone()));
        Ok(out)
    }

    pub fn delete(&self, key: &ObjectKey) -> Result<SparkApplication, StoreError> {
        let mut st = self.lock();
        let mut obj = st
            .objects
            .remove(key)
            .ok_or_else(|| StoreError::NotFound { key: key.to_string() })?;
        st.version += 1;
        obj.metadata.resource_version = Some(st.version.to_string());
        let _ = self.inner.events.send(SourceEvent::Deleted(obj.clone()));
        Ok(obj)
    }

    pub fn get(&self, key: &ObjectKey) -> Option<SparkApplication> {
        self.lock().objects.get(key).cloned()
    }

    /// Successful `update` calls so far.
    pub fn write_count(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    fn snapshot(&self, namespace: Option<&str>) -> Vec<SparkApplication> {
        self.versioned_snapshot(namespace).0
    }

    /// Objects plus the store version they reflect.
    fn versioned_snapshot(&self, namespace: Option<&str>) -> (Vec<SparkApplication>, u64) {
        let st = self.lock();
        let items = st
            .objects
            .iter()
            .filter(|(k, _)| namespace.map_or(true, |ns| k.namespace == ns))
            .map(|(_, v)| v.clone())
            .collect();
        (items, st.version)
    }
}

fn event_version(ev: &SourceEvent<SparkApplication>) -> Option<u64> {
    match ev {
        SourceEvent::Applied(o) | SourceEvent::Deleted(o) => o.metadata.resource_version.as_deref()?.parse().ok(),
        SourceEvent::Listed(_) => None,
    }
}

fn in_namespace(ev: &SourceEvent<SparkApplication>, namespace: Option<&str>) -> bool {
    let Some(ns) = namespace else { return true };
    match ev {
        SourceEvent::Applied(o) | SourceEvent::Deleted(o) => o.metadata.namespace.as_deref() == Some(ns),
        SourceEvent::Listed(_) => true,
    }
}

#[async_trait::async_trait]
impl AppStoreClient for MemoryAppStore {
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<SparkApplication>, StoreError> {
        Ok(self.snapshot(namespace))
    }

    async fn watch(&self, namespace: Option<&str>) -> Result<AppEventStream, StoreError> {
        // Subscribe before listing so nothing falls between the two. Backlog
        // events the list already covers are skipped by version.
        let rx = self.inner.events.subscribe();
        let (items, floor) = self.versioned_snapshot(namespace);
        let initial = SourceEvent::Listed(items);
        let store = self.clone();
        let ns = namespace.map(str::to_string);
        let tail = futures::stream::unfold((rx, store, ns, floor), |(mut rx, store, ns, mut floor)| async move {
            loop {
                match rx.recv().await {
                    Ok(ev) if event_version(&ev).map_or(false, |v| v <= floor) => continue,
                    Ok(ev) if in_namespace(&ev, ns.as_deref()) => {
                        return Some((Ok::<_, StoreError>(ev), (rx, store, ns, floor)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "memory watch lagged; relisting");
                        let (items, version) = store.versioned_snapshot(ns.as_deref());
                        floor = version;
                        return Some((Ok::<_, StoreError>(SourceEvent::Listed(items)), (rx, store, ns, floor)));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(futures::stream::iter([Ok::<_, StoreError>(initial)]).chain(tail).boxed())
    }

    async fn update(&self, app: &SparkApplication, namespace: &str) -> Result<SparkApplication, StoreError> {
        let mut key = key_of(app)?;
        key.namespace = namespace.to_string();
        let mut st = self.lock();
        let current = st
            .objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound { key: key.to_string() })?;
        if current.metadata.uid != app.metadata.uid {
            return Err(StoreError::Conflict { key: key.to_string(), message: "uid precondition failed".into() });
        }
        if current.metadata.resource_version != app.metadata.resource_version {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                message: format!(
                    "resourceVersion {} is stale (current {})",
                    app.metadata.resource_version.as_deref().unwrap_or(""),
                    current.metadata.resource_version.as_deref().unwrap_or("")
                ),
            });
        }
        st.version += 1;
        let mut stored = app.clone();
        stored.metadata.namespace = Some(key.namespace.clone());
        stored.metadata.resource_version = Some(st.version.to_string());
        st.objects.insert(key.clone(), stored.clone());
        let _ = self.inner.events.send(SourceEvent::Applied(stored.clone()));
        drop(st);
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        debug!(key = %key, "memory store updated");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparkctl_core::{SparkApplicationSpec, SparkApplicationStatus};

    fn app(ns: &str, name: &str) -> SparkApplication {
        let mut a = SparkApplication::new(name, SparkApplicationSpec::default());
        a.metadata.namespace = Some(ns.into());
        a
    }

    #[tokio::test]
    async fn create_assigns_uid_and_version() {
        let store = MemoryAppStore::new();
        let a = store.create(app("default", "job1")).unwrap();
        assert!(a.metadata.uid.is_some());
        assert_eq!(a.metadata.resource_version.as_deref(), Some("1"));
        assert!(store.create(app("default", "job1")).unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn stale_update_conflicts() {
        let store = MemoryAppStore::new();
        let a = store.create(app("default", "job1")).unwrap();
        let key = ObjectKey::new("default", "job1");
        store.modify(&key, |o| { o.spec.fields.insert("x".into(), 1.into()); }).unwrap();

        let mut stale = a.clone();
        stale.status = Some(SparkApplicationStatus { app_id: Some("job1-1".into()) });
        let err = store.update(&stale, "default").await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.write_count(), 0);
        assert!(store.get(&key).unwrap().app_id().is_none());

        let mut fresh = store.get(&key).unwrap();
        fresh.status = Some(SparkApplicationStatus { app_id: Some("job1-1".into()) });
        let out = store.update(&fresh, "default").await.unwrap();
        assert_eq!(out.app_id(), Some("job1-1"));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn update_of_missing_object_is_not_found() {
        let store = MemoryAppStore::new();
        let err = store.update(&app("default", "ghost"), "default").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn watch_lists_then_streams() {
        let store = MemoryAppStore::new();
        store.create(app("default", "a")).unwrap();
        store.create(app("other", "b")).unwrap();
        let mut stream = store.watch(Some("default")).await.unwrap();

        match stream.next().await.unwrap().unwrap() {
            SourceEvent::Listed(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].metadata.name.as_deref(), Some("a"));
            }
            other => panic!("expected list, got {:?}", other),
        }

        store.create(app("other", "c")).unwrap();
        store.create(app("default", "d")).unwrap();
        store.delete(&ObjectKey::new("default", "a")).unwrap();
        match stream.next().await.unwrap().unwrap() {
            SourceEvent::Applied(o) => assert_eq!(o.metadata.name.as_deref(), Some("d")),
            other => panic!("expected apply, got {:?}", other),
        }
        match stream.next().await.unwrap().unwrap() {
            SourceEvent::Deleted(o) => assert_eq!(o.metadata.name.as_deref(), Some("a")),
            other => panic!("expected delete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn lagging_watch_relists() {
        let store = MemoryAppStore::with_capacity(2);
        let mut stream = store.watch(None).await.unwrap();
        assert!(matches!(stream.next().await.unwrap().unwrap(), SourceEvent::Listed(l) if l.is_empty()));
        for i in 0..5 {
            store.create(app("default", &format!("j{}", i))).unwrap();
        }
        match stream.next().await.unwrap().unwrap() {
            SourceEvent::Listed(items) => assert_eq!(items.len(), 5),
            other => panic!("expected relist, got {:?}", other),
        }

        // Backlog already covered by the relist is not replayed.
        store.create(app("default", "j5")).unwrap();
        match stream.next().await.unwrap().unwrap() {
            SourceEvent::Applied(o) => {
                assert_eq!(o.metadata.name.as_deref(), Some("j5"));
                assert_eq!(o.metadata.resource_version.as_deref(), Some("6"));
            }
            other => panic!("expected j5, got {:?}", other),
        }
    }
}
