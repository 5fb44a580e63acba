use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use rustc_hash::FxHashMap;
use sparkctl_core::{ObjectKey, ResourceEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::ResourceEventHandler;

struct Worker<K> {
    tx: mpsc::UnboundedSender<ResourceEvent<K>>,
    handle: JoinHandle<()>,
}

/// Routes events to handler callbacks with one worker task per key.
///
/// Events for one key run one at a time in arrival order; different keys
/// run concurrently. A key's worker is retired after its delete event; a
/// worker for a recreated key waits for the retired one to finish first.
pub struct Dispatcher<K: Send + Sync + 'static> {
    handler: Arc<dyn ResourceEventHandler<K>>,
    workers: FxHashMap<ObjectKey, Worker<K>>,
    retired: FxHashMap<ObjectKey, JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl<K: Send + Sync + 'static> Dispatcher<K> {
    pub fn new(handler: Arc<dyn ResourceEventHandler<K>>, shutdown: CancellationToken) -> Self {
        Self { handler, workers: FxHashMap::default(), retired: FxHashMap::default(), shutdown }
    }

    /// Keys with a live worker.
    pub fn active_keys(&self) -> usize {
        self.workers.len()
    }

    pub fn dispatch(&mut self, key: ObjectKey, ev: ResourceEvent<K>) {
        if self.shutdown.is_cancelled() {
            debug!(key = %key, kind = ev.kind(), "shutting down; event not dispatched");
            return;
        }
        let retire = matches!(ev, ResourceEvent::Deleted(_));
        let pending = match self.workers.get(&key) {
            Some(w) => w.tx.send(ev).err().map(|e| e.0),
            None => Some(ev),
        };
        if let Some(ev) = pending {
            let predecessor = match self.workers.remove(&key) {
                Some(dead) => {
                    warn!(key = %key, "worker exited unexpectedly; respawning");
                    counter!("dispatch_worker_respawns_total", 1u64);
                    Some(dead.handle)
                }
                None => self.retired.remove(&key),
            };
            let worker = self.spawn_worker(key.clone(), predecessor);
            let _ = worker.tx.send(ev);
            self.workers.insert(key.clone(), worker);
        }
        if retire {
            if let Some(w) = self.workers.remove(&key) {
                self.retired.insert(key, w.handle);
            }
        }
        self.retired.retain(|_, h| !h.is_finished());
    }

    /// Close every worker's queue and wait for all of them to finish.
    ///
    /// Callbacks already running complete; events still queued after the
    /// shutdown token fired are dropped by the workers.
    pub async fn drain(self) {
        let mut handles: Vec<(ObjectKey, JoinHandle<()>)> =
            self.workers.into_iter().map(|(key, w)| (key, w.handle)).collect();
        handles.extend(self.retired);
        debug!(workers = handles.len(), "draining dispatcher");
        for (key, handle) in handles {
            if let Err(e) = handle.await {
                warn!(key = %key, error = %e, "worker failed while draining");
            }
        }
    }

    fn spawn_worker(&self, key: ObjectKey, predecessor: Option<JoinHandle<()>>) -> Worker<K> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(
            key,
            rx,
            Arc::clone(&self.handler),
            predecessor,
            self.shutdown.clone(),
        ));
        Worker { tx, handle }
    }
}

async fn run_worker<K: Send + Sync + 'static>(
    key: ObjectKey,
    mut rx: mpsc::UnboundedReceiver<ResourceEvent<K>>,
    handler: Arc<dyn ResourceEventHandler<K>>,
    predecessor: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
) {
    if let Some(prev) = predecessor {
        if let Err(e) = prev.await {
            warn!(key = %key, error = %e, "previous worker for key failed");
        }
    }
    while let Some(ev) = rx.recv().await {
        if shutdown.is_cancelled() {
            break;
        }
        let kind = ev.kind();
        counter!("dispatch_events_total", 1u64, "kind" => kind);
        let call = async {
            match ev {
                ResourceEvent::Added(obj) => handler.on_add(obj).await,
                ResourceEvent::Updated(old, new) => handler.on_update(old, new).await,
                ResourceEvent::Deleted(obj) => handler.on_delete(obj).await,
            }
        };
        // A panicking callback costs its own event only.
        if AssertUnwindSafe(call).catch_unwind().await.is_err() {
            error!(key = %key, kind, "handler panicked");
            counter!("dispatch_handler_panics_total", 1u64);
        }
    }
    debug!(key = %key, "worker stopped");
}
