use std::sync::Arc;

use microcloud_common::auth::AuthConfig;

use crate::fleet::FleetDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub fleet: Arc<FleetDispatcher>,
    pub auth: AuthConfig,
}

impl AsRef<AuthConfig> for AppState {
    fn as_ref(&self) -> &AuthConfig {
        &self.auth
    }
}
