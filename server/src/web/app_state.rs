use std::sync::Arc;

use crate::config::AuthSection;
use crate::engine::hub::Hub;

/// Shared state handed to every axum handler.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub auth_config: AuthSection,
}

impl AppState {
    pub fn new(hub: Arc<Hub>) -> Self {
        let auth_config = hub.config().auth.clone();
        Self { hub, auth_config }
    }
}
