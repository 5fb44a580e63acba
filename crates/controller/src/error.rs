use sparkctl_kubehub::StoreError;
use sparkctl_store::InformerError;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("failed to register watch for SparkApplication resources: {0}")]
    WatchRegistration(#[source] StoreError),

    #[error("event source stopped: {0}")]
    EventSource(#[from] InformerError),

    #[error("informer task failed: {0}")]
    InformerTask(String),
}
