use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use kube::Resource;
use metrics::counter;
use rustc_hash::FxHashSet;
use sparkctl_core::{ObjectKey, ResourceEvent, SourceEvent};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Cache, CacheReader, Dispatcher, ResourceEventHandler};

#[derive(Debug, thiserror::Error)]
pub enum InformerError {
    #[error("event source stream ended")]
    SourceEnded,
}

/// Asks the informer to hand a key back to `on_add` on its next event.
///
/// A handler that could not finish its add work (a failed write-back, say)
/// requests the key again. The next change to that key, or the next resync,
/// is then delivered as an add instead of an update. One request buys one
/// redelivery.
#[derive(Clone)]
pub struct Requeue {
    tx: mpsc::UnboundedSender<ObjectKey>,
}

impl Requeue {
    pub fn channel() -> (Self, RequeueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, RequeueReceiver(rx))
    }

    pub fn request(&self, key: ObjectKey) {
        if self.tx.send(key).is_err() {
            debug!("informer gone; requeue ignored");
        }
    }
}

pub struct RequeueReceiver(mpsc::UnboundedReceiver<ObjectKey>);

/// Drives a list/watch stream into the cache and out to the handler.
pub struct Informer<K: Send + Sync + 'static> {
    cache: Cache<K>,
    dispatcher: Dispatcher<K>,
    resync_period: Duration,
    shutdown: CancellationToken,
    requeue_rx: Option<RequeueReceiver>,
    requeued: FxHashSet<ObjectKey>,
}

impl<K> Informer<K>
where
    K: Resource + Send + Sync + 'static,
{
    /// `resync_period` of zero disables periodic resync.
    pub fn new(
        handler: Arc<dyn ResourceEventHandler<K>>,
        resync_period: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cache: Cache::new(),
            dispatcher: Dispatcher::new(handler, shutdown.clone()),
            resync_period,
            shutdown,
            requeue_rx: None,
            requeued: FxHashSet::default(),
        }
    }

    pub fn with_requeue(mut self, rx: RequeueReceiver) -> Self {
        self.requeue_rx = Some(rx);
        self
    }

    pub fn reader(&self) -> CacheReader<K> {
        self.cache.reader()
    }

    /// Run until the shutdown token fires (`Ok`) or the stream ends (`Err`).
    /// Stream errors are logged and skipped; the source is expected to
    /// recover on its own. Either way, callbacks already running are
    /// awaited before this returns.
    pub async fn run<S, E>(mut self, mut stream: S) -> Result<(), InformerError>
    where
        S: Stream<Item = Result<SourceEvent<K>, E>> + Unpin + Send,
        E: Display + Send,
    {
        let shutdown = self.shutdown.clone();
        let mut resync = (!self.resync_period.is_zero()).then(|| {
            let mut iv = interval_at(Instant::now() + self.resync_period, self.resync_period);
            iv.set_missed_tick_behavior(MissedTickBehavior::Delay);
            iv
        });
        let mut requeue_rx = self.requeue_rx.take();
        info!(resync = ?self.resync_period, "informer started");
        let res = loop {
            // An always-ready source must not pin this worker thread.
            tokio::task::coop::consume_budget().await;
            // Resync is polled ahead of the stream so a busy source cannot
            // starve it.
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!(cached = self.cache.len(), "informer stopping");
                    break Ok(());
                }
                key = next_requeue(&mut requeue_rx) => match key {
                    Some(key) => {
                        debug!(key = %key, "key requeued");
                        counter!("informer_requeues_total", 1u64);
                        self.requeued.insert(key);
                    }
                    None => requeue_rx = None,
                },
                _ = next_resync(&mut resync) => {
                    let events = self.cache.resync_events();
                    debug!(count = events.len(), "resync");
                    counter!("informer_resyncs_total", 1u64);
                    for (key, rev) in events {
                        self.deliver(key, rev);
                    }
                }
                next = stream.next() => match next {
                    Some(Ok(ev)) => {
                        for (key, rev) in self.cache.apply(ev) {
                            counter!("informer_events_total", 1u64, "kind" => rev.kind());
                            self.deliver(key, rev);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "event source error");
                        counter!("informer_source_errors_total", 1u64);
                    }
                    None => {
                        warn!("event source stream ended");
                        break Err(InformerError::SourceEnded);
                    }
                },
            }
        };
        self.dispatcher.drain().await;
        res
    }

    fn deliver(&mut self, key: ObjectKey, rev: ResourceEvent<K>) {
        let rev = match rev {
            ResourceEvent::Updated(_, new) if self.requeued.remove(&key) => ResourceEvent::Added(new),
            ResourceEvent::Deleted(obj) => {
                self.requeued.remove(&key);
                ResourceEvent::Deleted(obj)
            }
            other => other,
        };
        self.dispatcher.dispatch(key, rev);
    }
}

async fn next_requeue(rx: &mut Option<RequeueReceiver>) -> Option<ObjectKey> {
    match rx {
        Some(rx) => rx.0.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_resync(resync: &mut Option<Interval>) {
    match resync {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
