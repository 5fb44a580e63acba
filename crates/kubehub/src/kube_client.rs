use futures::{StreamExt, TryStreamExt};
use metrics::counter;
use kube::{
    api::{Api, ListParams, PostParams},
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client,
};
use sparkctl_core::{SourceEvent, SparkApplication};
use tracing::{debug, info};

use crate::{key_of, AppEventStream, AppStoreClient, StoreError};

/// SparkApplication client backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeAppClient {
    client: Client,
    status_subresource: bool,
}

impl KubeAppClient {
    pub fn new(client: Client) -> Self {
        Self { client, status_subresource: false }
    }

    /// Write `status` through the status subresource instead of replacing the
    /// whole object. Needed when the CRD declares `subresources.status`.
    pub fn with_status_subresource(mut self, on: bool) -> Self {
        self.status_subresource = on;
        self
    }

    fn api(&self, namespace: Option<&str>) -> Api<SparkApplication> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

fn map_write_err(key: String, e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict { key, message: ae.message },
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound { key },
        other => StoreError::Kube(other),
    }
}

#[async_trait::async_trait]
impl AppStoreClient for KubeAppClient {
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<SparkApplication>, StoreError> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn watch(&self, namespace: Option<&str>) -> Result<AppEventStream, StoreError> {
        let api = self.api(namespace);
        // Fail fast on RBAC/CRD problems; the watcher itself retries forever.
        api.list(&ListParams::default().limit(1))
            .await
            .map_err(|e| StoreError::Watch(e.to_string()))?;
        info!(ns = ?namespace, "sparkapplication watcher started");
        let stream = watcher::watcher(api, watcher::Config::default())
            .default_backoff()
            .map_err(|e| StoreError::Watch(e.to_string()))
            .map_ok(|ev| match ev {
                Event::Applied(o) => SourceEvent::Applied(o),
                Event::Deleted(o) => SourceEvent::Deleted(o),
                Event::Restarted(list) => {
                    debug!(count = list.len(), "watch restart");
                    SourceEvent::Listed(list)
                }
            });
        Ok(stream.boxed())
    }

    async fn update(&self, app: &SparkApplication, namespace: &str) -> Result<SparkApplication, StoreError> {
        let key = key_of(app)?;
        if app.metadata.resource_version.is_none() {
            return Err(StoreError::Invalid(format!("{} has no resourceVersion", key)));
        }
        let api = self.api(Some(namespace));
        let pp = PostParams::default();
        let res = if self.status_subresource {
            let body = serde_json::to_vec(app).map_err(|e| StoreError::Invalid(e.to_string()))?;
            api.replace_status(&key.name, &pp, body).await
        } else {
            api.replace(&key.name, &pp, app).await
        };
        counter!("store_update_attempts_total", 1u64);
        res.map_err(|e| {
            let err = map_write_err(key.to_string(), e);
            if err.is_conflict() {
                counter!("store_update_conflicts_total", 1u64);
            }
            err
        })
    }
}
