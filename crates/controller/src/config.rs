use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces.
    pub namespace: Option<String>,
    /// Period of full cache resyncs. Zero disables resync.
    pub resync_period: Duration,
    /// Write `status.appId` through the status subresource.
    pub status_subresource: bool,
}

impl ControllerConfig {
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    pub fn resync_period(mut self, period: Duration) -> Self {
        self.resync_period = period;
        self
    }

    pub fn status_subresource(mut self, on: bool) -> Self {
        self.status_subresource = on;
        self
    }
}
