use std::sync::Arc;

use metrics::counter;
use sparkctl_core::{compute_app_id, ObjectKey, SparkApplication};
use sparkctl_kubehub::AppStoreClient;
use sparkctl_store::{Requeue, ResourceEventHandler};
use tracing::{debug, error, info, warn};

/// Result of handling one add event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Assigned(String),
    AlreadyAssigned,
    CopyFailed,
    MissingIdentity,
    WriteConflict,
    WriteFailed,
}

impl AddOutcome {
    /// The add did not complete and deserves another attempt.
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::CopyFailed | Self::WriteConflict | Self::WriteFailed)
    }
}

/// SparkApplication event callbacks.
///
/// Only `on_add` writes: it stamps `status.appId` on a deep copy and sends
/// it back with the read resourceVersion as precondition. `on_update`
/// never writes, so our own write-back cannot feed another write.
///
/// With a [`Requeue`] attached, an add that failed asks the informer to
/// deliver the key's next update or resync as another add. Retries only
/// ever run through `on_add` and its already-assigned guard.
pub struct AppReconciler<C> {
    client: Arc<C>,
    requeue: Option<Requeue>,
}

impl<C: AppStoreClient> AppReconciler<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client, requeue: None }
    }

    pub fn with_requeue(mut self, requeue: Requeue) -> Self {
        self.requeue = Some(requeue);
        self
    }

    pub async fn reconcile_add(&self, app: &SparkApplication) -> AddOutcome {
        // Cached snapshots are shared and read-only; work on a detached copy.
        let mut copy = match self.client.deep_copy(app) {
            Ok(c) => c,
            Err(e) => {
                error!(app = %app.display_ref(), error = %e, "failed to create a deep copy");
                counter!("reconcile_copy_failures_total", 1u64);
                return AddOutcome::CopyFailed;
            }
        };
        if let Some(id) = copy.app_id() {
            debug!(app = %app.display_ref(), app_id = id, "app id already assigned");
            counter!("reconcile_appid_skipped_total", 1u64);
            return AddOutcome::AlreadyAssigned;
        }
        let (Some(name), Some(uid)) = (copy.metadata.name.clone(), copy.metadata.uid.clone()) else {
            warn!(app = %app.display_ref(), "object has no name or uid; cannot derive app id");
            return AddOutcome::MissingIdentity;
        };
        let namespace = copy.metadata.namespace.clone().unwrap_or_default();
        let app_id = compute_app_id(&name, &namespace, &uid);
        copy.status.get_or_insert_with(Default::default).app_id = Some(app_id.clone());

        match self.client.update(&copy, &namespace).await {
            Ok(_) => {
                info!(app = %app.display_ref(), app_id = %app_id, "assigned app id");
                counter!("reconcile_appid_assigned_total", 1u64);
                AddOutcome::Assigned(app_id)
            }
            Err(e) if e.is_conflict() => {
                warn!(app = %app.display_ref(), error = %e, "app id write-back conflicted");
                counter!("reconcile_write_conflicts_total", 1u64);
                AddOutcome::WriteConflict
            }
            Err(e) => {
                error!(app = %app.display_ref(), error = %e, "app id write-back failed");
                counter!("reconcile_write_failures_total", 1u64);
                AddOutcome::WriteFailed
            }
        }
    }
}

#[async_trait::async_trait]
impl<C: AppStoreClient + 'static> ResourceEventHandler<SparkApplication> for AppReconciler<C> {
    async fn on_add(&self, app: Arc<SparkApplication>) {
        info!(app = %app.display_ref(), "OnAdd");
        counter!("reconcile_add_total", 1u64);
        let outcome = self.reconcile_add(&app).await;
        if outcome.should_retry() {
            if let (Some(requeue), Some(key)) = (&self.requeue, ObjectKey::of(&*app)) {
                debug!(key = %key, outcome = ?outcome, "requeueing for another add");
                requeue.request(key);
            }
        }
    }

    async fn on_update(&self, old: Arc<SparkApplication>, new: Arc<SparkApplication>) {
        info!(
            old = %old.display_ref(),
            new = %new.display_ref(),
            old_rv = old.metadata.resource_version.as_deref().unwrap_or(""),
            new_rv = new.metadata.resource_version.as_deref().unwrap_or(""),
            "OnUpdate"
        );
        counter!("reconcile_update_total", 1u64);
        if let (Some(before), after) = (old.app_id(), new.app_id()) {
            if after != Some(before) {
                warn!(app = %new.display_ref(), before, after = ?after, "app id changed outside the controller");
            }
        }
    }

    async fn on_delete(&self, app: Arc<SparkApplication>) {
        info!(app = %app.display_ref(), "OnDelete");
        counter!("reconcile_delete_total", 1u64);
    }
}
