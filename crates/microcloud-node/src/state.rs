use std::sync::Arc;

use microcloud_common::auth::AuthConfig;

use crate::metrics::SharedCollectorStatus;
use crate::provision::Provisioner;

#[derive(Clone)]
pub struct AppState {
    pub provisioner: Arc<Provisioner>,
    /// Present when this process also runs the metrics collector.
    pub collector: Option<SharedCollectorStatus>,
    pub auth: AuthConfig,
}

impl AsRef<AuthConfig> for AppState {
    fn as_ref(&self) -> &AuthConfig {
        &self.auth
    }
}
