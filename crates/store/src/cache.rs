use std::sync::Arc;

use arc_swap::ArcSwap;
use kube::Resource;
use metrics::gauge;
use rustc_hash::{FxHashMap, FxHashSet};
use sparkctl_core::{ObjectKey, ResourceEvent, SourceEvent};
use tokio::sync::watch;
use tracing::{debug, warn};

type Items<K> = FxHashMap<ObjectKey, Arc<K>>;

/// Keyed view of remote state. The writer side lives in the informer;
/// readers get frozen snapshots through [`CacheReader`].
pub struct Cache<K> {
    items: Items<K>,
    snap: Arc<ArcSwap<Items<K>>>,
    epoch: u64,
    epoch_tx: watch::Sender<u64>,
}

/// Read-only handle on the latest published snapshot.
pub struct CacheReader<K> {
    snap: Arc<ArcSwap<Items<K>>>,
    epoch_rx: watch::Receiver<u64>,
}

impl<K> Clone for CacheReader<K> {
    fn clone(&self) -> Self {
        Self { snap: Arc::clone(&self.snap), epoch_rx: self.epoch_rx.clone() }
    }
}

impl<K> CacheReader<K> {
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.snap.load().get(key).cloned()
    }

    /// All cached objects, ordered by key.
    pub fn list(&self) -> Vec<Arc<K>> {
        let snap = self.snap.load();
        let mut keys: Vec<_> = snap.keys().collect();
        keys.sort();
        keys.into_iter().filter_map(|k| snap.get(k).cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.snap.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped every time a new snapshot is published.
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }
}

impl<K: Resource> Default for Cache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Resource> Cache<K> {
    pub fn new() -> Self {
        let (epoch_tx, _) = watch::channel(0u64);
        Self {
            items: FxHashMap::default(),
            snap: Arc::new(ArcSwap::from_pointee(FxHashMap::default())),
            epoch: 0,
            epoch_tx,
        }
    }

    pub fn reader(&self) -> CacheReader<K> {
        CacheReader { snap: Arc::clone(&self.snap), epoch_rx: self.epoch_tx.subscribe() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Fold one source event into the cache and return the resulting
    /// lifecycle transitions, in the order they must be delivered.
    pub fn apply(&mut self, ev: SourceEvent<K>) -> Vec<(ObjectKey, ResourceEvent<K>)> {
        let mut out = Vec::new();
        match ev {
            SourceEvent::Applied(obj) => self.upsert(obj, &mut out),
            SourceEvent::Deleted(obj) => self.remove(obj, &mut out),
            SourceEvent::Listed(objs) => self.relist(objs, &mut out),
        }
        if !out.is_empty() {
            self.publish();
        }
        out
    }

    /// `Updated(obj, obj)` for every cached object.
    pub fn resync_events(&self) -> Vec<(ObjectKey, ResourceEvent<K>)> {
        let mut out: Vec<_> = self
            .items
            .iter()
            .map(|(k, v)| (k.clone(), ResourceEvent::Updated(Arc::clone(v), Arc::clone(v))))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn upsert(&mut self, obj: K, out: &mut Vec<(ObjectKey, ResourceEvent<K>)>) {
        let Some(key) = ObjectKey::of(&obj) else {
            warn!("dropping object without metadata.name");
            return;
        };
        let new = Arc::new(obj);
        match self.items.get(&key).cloned() {
            None => {
                self.items.insert(key.clone(), Arc::clone(&new));
                out.push((key, ResourceEvent::Added(new)));
            }
            Some(old) => {
                let (om, nm) = (old.meta(), new.meta());
                if om.uid.is_some() && nm.uid.is_some() && om.uid != nm.uid {
                    // Deleted and recreated under the same name while we were not looking.
                    debug!(key = %key, "uid changed; replaying as delete + add");
                    self.items.insert(key.clone(), Arc::clone(&new));
                    out.push((key.clone(), ResourceEvent::Deleted(old)));
                    out.push((key, ResourceEvent::Added(new)));
                } else if om.resource_version.is_some() && om.resource_version == nm.resource_version {
                    // seen
                } else {
                    self.items.insert(key.clone(), Arc::clone(&new));
                    out.push((key, ResourceEvent::Updated(old, new)));
                }
            }
        }
    }

    fn remove(&mut self, obj: K, out: &mut Vec<(ObjectKey, ResourceEvent<K>)>) {
        let Some(key) = ObjectKey::of(&obj) else { return };
        if self.items.remove(&key).is_some() {
            out.push((key, ResourceEvent::Deleted(Arc::new(obj))));
        } else {
            debug!(key = %key, "delete for uncached object ignored");
        }
    }

    fn relist(&mut self, objs: Vec<K>, out: &mut Vec<(ObjectKey, ResourceEvent<K>)>) {
        let mut listed = FxHashSet::default();
        for obj in objs {
            if let Some(key) = ObjectKey::of(&obj) {
                listed.insert(key);
            }
            self.upsert(obj, out);
        }
        let mut gone: Vec<ObjectKey> = self.items.keys().filter(|k| !listed.contains(*k)).cloned().collect();
        gone.sort();
        for key in gone {
            if let Some(last) = self.items.remove(&key) {
                out.push((key, ResourceEvent::Deleted(last)));
            }
        }
    }

    fn publish(&mut self) {
        self.snap.store(Arc::new(self.items.clone()));
        self.epoch = self.epoch.saturating_add(1);
        self.epoch_tx.send_replace(self.epoch);
        gauge!("cache_objects", self.items.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparkctl_core::{SparkApplication, SparkApplicationSpec};

    fn app(name: &str, uid: &str, rv: &str) -> SparkApplication {
        let mut a = SparkApplication::new(name, SparkApplicationSpec::default());
        a.metadata.namespace = Some("default".into());
        a.metadata.uid = Some(uid.into());
        a.metadata.resource_version = Some(rv.into());
        a
    }

    fn kinds(evs: &[(ObjectKey, ResourceEvent<SparkApplication>)]) -> Vec<String> {
        evs.iter().map(|(k, e)| format!("{} {}", e.kind(), k)).collect()
    }

    #[test]
    fn add_update_and_dedup() {
        let mut c = Cache::new();
        assert_eq!(kinds(&c.apply(SourceEvent::Applied(app("a", "u1", "1")))), ["added default/a"]);
        assert!(c.apply(SourceEvent::Applied(app("a", "u1", "1"))).is_empty());
        let evs = c.apply(SourceEvent::Applied(app("a", "u1", "2")));
        assert_eq!(kinds(&evs), ["updated default/a"]);
        match &evs[0].1 {
            ResourceEvent::Updated(old, new) => {
                assert_eq!(old.metadata.resource_version.as_deref(), Some("1"));
                assert_eq!(new.metadata.resource_version.as_deref(), Some("2"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn recreated_uid_is_delete_then_add() {
        let mut c = Cache::new();
        c.apply(SourceEvent::Applied(app("a", "u1", "1")));
        let evs = c.apply(SourceEvent::Applied(app("a", "u2", "5")));
        assert_eq!(kinds(&evs), ["deleted default/a", "added default/a"]);
        assert_eq!(c.reader().get(&ObjectKey::new("default", "a")).unwrap().metadata.uid.as_deref(), Some("u2"));
    }

    #[test]
    fn delete_fires_once() {
        let mut c = Cache::new();
        c.apply(SourceEvent::Applied(app("a", "u1", "1")));
        let evs = c.apply(SourceEvent::Deleted(app("a", "u1", "2")));
        assert_eq!(kinds(&evs), ["deleted default/a"]);
        assert!(c.apply(SourceEvent::Deleted(app("a", "u1", "2"))).is_empty());
        assert!(c.reader().is_empty());
    }

    #[test]
    fn relist_dedups_and_reaps_missing() {
        let mut c = Cache::new();
        let evs = c.apply(SourceEvent::Listed(vec![app("a", "u1", "1"), app("b", "u2", "2")]));
        assert_eq!(evs.len(), 2);
        let evs = c.apply(SourceEvent::Listed(vec![app("a", "u1", "1"), app("c", "u3", "3")]));
        assert_eq!(kinds(&evs), ["added default/c", "deleted default/b"]);
        let names: Vec<_> = c.reader().list().iter().map(|o| o.metadata.name.clone().unwrap()).collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn resync_replays_every_object() {
        let mut c = Cache::new();
        c.apply(SourceEvent::Listed(vec![app("b", "u2", "2"), app("a", "u1", "1")]));
        let evs = c.resync_events();
        assert_eq!(kinds(&evs), ["updated default/a", "updated default/b"]);
        match &evs[0].1 {
            ResourceEvent::Updated(old, new) => assert!(Arc::ptr_eq(old, new)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn readers_see_published_epochs() {
        let mut c = Cache::new();
        let r = c.reader();
        let rx = r.subscribe_epoch();
        assert_eq!(*rx.borrow(), 0);
        c.apply(SourceEvent::Applied(app("a", "u1", "1")));
        c.apply(SourceEvent::Applied(app("a", "u1", "1")));
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn unnamed_objects_are_dropped() {
        let mut c = Cache::new();
        let evs = c.apply(SourceEvent::Applied(app("", "u1", "1")));
        assert!(evs.is_empty());
        assert!(c.is_empty());
    }
}
