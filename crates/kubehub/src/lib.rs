//! sparkctl kubehub: typed access to the SparkApplication collection.
//!
//! [`AppStoreClient`] is the seam between the controller and the cluster
//! state store. [`KubeAppClient`] talks to the API server through kube-rs;
//! [`memory::MemoryAppStore`] keeps everything in process.

#![forbid(unsafe_code)]

use anyhow::Result;
use futures::stream::BoxStream;
use sparkctl_core::{ObjectKey, SourceEvent, SparkApplication};

mod kube_client;
pub mod memory;

pub use kube_client::KubeAppClient;

/// Stream of list/watch items for one collection.
pub type AppEventStream = BoxStream<'static, Result<SourceEvent<SparkApplication>, StoreError>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The resource changed remotely since it was read.
    #[error("conflict writing {key}: {message}")]
    Conflict { key: String, message: String },

    #[error("{key} not found")]
    NotFound { key: String },

    #[error("failed to copy {key}: {message}")]
    Copy { key: String, message: String },

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("watch failed: {0}")]
    Watch(String),

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Typed read/update access to the SparkApplication collection.
///
/// `namespace = None` addresses all namespaces.
#[async_trait::async_trait]
pub trait AppStoreClient: Send + Sync {
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<SparkApplication>, StoreError>;

    /// Register a watch. The stream starts with a full `Listed` item and then
    /// yields incremental changes; it may relist after a desync.
    async fn watch(&self, namespace: Option<&str>) -> Result<AppEventStream, StoreError>;

    /// Write `app` back. The object's resourceVersion is the precondition:
    /// a stale version yields [`StoreError::Conflict`], never an overwrite.
    async fn update(&self, app: &SparkApplication, namespace: &str) -> Result<SparkApplication, StoreError>;

    /// Independent, fully detached copy of a cached snapshot.
    fn deep_copy(&self, app: &SparkApplication) -> Result<SparkApplication, StoreError> {
        Ok(app.clone())
    }
}

pub async fn get_kube_client() -> Result<kube::Client> {
    Ok(kube::Client::try_default().await?)
}

pub(crate) fn key_of(app: &SparkApplication) -> Result<ObjectKey, StoreError> {
    ObjectKey::of(app).ok_or_else(|| StoreError::Invalid("object missing metadata.name".into()))
}
