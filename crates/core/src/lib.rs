//! sparkctl core types: the SparkApplication resource, cache keys and the
//! event variants flowing from the event source to the reconciler.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use kube::{CustomResource, Resource};
use serde::{Deserialize, Serialize};

pub mod app_id;

pub use app_id::compute_app_id;

/// Spec of a SparkApplication. Opaque to the controller; consumed by the
/// submission subsystem only.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "sparkoperator.k8s.io",
    version = "v1alpha1",
    kind = "SparkApplication",
    plural = "sparkapplications",
    namespaced,
    status = "SparkApplicationStatus",
    derive = "PartialEq",
    schema = "disabled"
)]
pub struct SparkApplicationSpec {
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SparkApplicationStatus {
    /// Derived identifier; set once per uid by the reconciler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
}

impl SparkApplication {
    pub fn app_id(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.app_id.as_deref())
    }

    /// Self link if the server still sets one, else `ns/name`.
    pub fn display_ref(&self) -> String {
        match self.metadata.self_link.as_deref() {
            Some(link) if !link.is_empty() => link.to_string(),
            _ => ObjectKey::of(self).map(|k| k.to_string()).unwrap_or_default(),
        }
    }
}

/// Cache key of a live resource. Namespace is empty for cluster-scoped kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    /// Key of an object; `None` when the object has no name yet.
    pub fn of<K: Resource>(obj: &K) -> Option<Self> {
        let meta = obj.meta();
        let name = meta.name.as_deref().filter(|n| !n.is_empty())?;
        Some(Self::new(meta.namespace.clone().unwrap_or_default(), name))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Items produced by an event source: a full (re)list followed by
/// incremental changes.
#[derive(Debug, Clone)]
pub enum SourceEvent<K> {
    Listed(Vec<K>),
    Applied(K),
    Deleted(K),
}

/// Lifecycle transition delivered to handlers. Payloads are shared cached
/// snapshots and must never be mutated.
#[derive(Debug)]
pub enum ResourceEvent<K> {
    Added(Arc<K>),
    Updated(Arc<K>, Arc<K>),
    Deleted(Arc<K>),
}

impl<K> Clone for ResourceEvent<K> {
    fn clone(&self) -> Self {
        match self {
            Self::Added(o) => Self::Added(Arc::clone(o)),
            Self::Updated(old, new) => Self::Updated(Arc::clone(old), Arc::clone(new)),
            Self::Deleted(o) => Self::Deleted(Arc::clone(o)),
        }
    }
}

impl<K> ResourceEvent<K> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Updated(..) => "updated",
            Self::Deleted(_) => "deleted",
        }
    }

    /// Most recent snapshot carried by the event.
    pub fn object(&self) -> &Arc<K> {
        match self {
            Self::Added(o) | Self::Deleted(o) => o,
            Self::Updated(_, new) => new,
        }
    }
}

pub mod prelude {
    pub use super::{
        compute_app_id, ObjectKey, ResourceEvent, SourceEvent, SparkApplication, SparkApplicationSpec,
        SparkApplicationStatus,
    };
}
