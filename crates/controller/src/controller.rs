use std::sync::Arc;

use sparkctl_core::SparkApplication;
use sparkctl_kubehub::AppStoreClient;
use sparkctl_store::{Informer, Requeue, ResourceEventHandler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{AppReconciler, ControllerConfig, ControllerError};

/// Why [`Controller::run`] returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Cancelled,
}

/// Manages SparkApplication objects: watches the collection and runs the
/// reconciler for every lifecycle event.
pub struct Controller<C> {
    client: Arc<C>,
    config: ControllerConfig,
}

impl<C: AppStoreClient + 'static> Controller<C> {
    pub fn new(client: Arc<C>, config: ControllerConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Register the watch and block until `shutdown` fires.
    ///
    /// Events are handled on separate tasks; this call does no work of its
    /// own. A failed watch registration is returned before anything starts.
    /// Callbacks that are running when shutdown begins finish before this
    /// returns.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<Shutdown, ControllerError> {
        let ns = self.config.namespace.as_deref();
        let stream = match self.client.watch(ns).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to register watch for SparkApplication resources");
                return Err(ControllerError::WatchRegistration(e));
            }
        };

        let (requeue, requeue_rx) = Requeue::channel();
        let handler: Arc<dyn ResourceEventHandler<SparkApplication>> =
            Arc::new(AppReconciler::new(Arc::clone(&self.client)).with_requeue(requeue));
        let informer_token = shutdown.child_token();
        let informer = Informer::new(handler, self.config.resync_period, informer_token.clone())
            .with_requeue(requeue_rx);
        let mut task = tokio::spawn(informer.run(stream));
        info!(ns = ?ns, resync = ?self.config.resync_period, "controller running");

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested; no further events will be dispatched");
                if let Err(e) = task.await {
                    warn!(error = %e, "informer task ended abnormally during shutdown");
                }
                Ok(Shutdown::Cancelled)
            }
            res = &mut task => {
                informer_token.cancel();
                match res {
                    Ok(Ok(())) => Ok(Shutdown::Cancelled),
                    Ok(Err(e)) => {
                        error!(error = %e, "informer stopped");
                        Err(ControllerError::EventSource(e))
                    }
                    Err(e) => Err(ControllerError::InformerTask(e.to_string())),
                }
            }
        }
    }
}
