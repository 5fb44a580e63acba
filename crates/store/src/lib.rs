//! sparkctl store: the local cache of remote resources, the per-key event
//! dispatcher and the informer loop that feeds both from an event source.
//!
//! Data flow: source stream -> [`Cache::apply`] -> [`Dispatcher::dispatch`]
//! -> [`ResourceEventHandler`]. The cache is updated before the handler for
//! the corresponding event runs.

#![forbid(unsafe_code)]

use std::sync::Arc;

mod cache;
mod dispatch;
mod informer;

pub use cache::{Cache, CacheReader};
pub use dispatch::Dispatcher;
pub use informer::{Informer, InformerError, Requeue, RequeueReceiver};

/// Callbacks for resource lifecycle transitions.
///
/// Snapshots are shared with the cache: read them, never mutate them. Any
/// write-back must go through an explicit deep copy.
#[async_trait::async_trait]
pub trait ResourceEventHandler<K: Send + Sync + 'static>: Send + Sync {
    async fn on_add(&self, obj: Arc<K>);
    async fn on_update(&self, old: Arc<K>, new: Arc<K>);
    async fn on_delete(&self, obj: Arc<K>);
}
