//! Application state

use std::sync::Arc;

use parley_core::Services;

use crate::client::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::hub::HubHandle;

/// Shared by every request handler.
pub struct AppState {
    pub hub: HubHandle,
    pub dispatcher: Arc<Dispatcher>,
    pub client_config: ClientConfig,
}

impl AppState {
    pub fn new(hub: HubHandle, services: Services, client_config: ClientConfig) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(hub.clone(), services)),
            hub,
            client_config,
        }
    }
}
