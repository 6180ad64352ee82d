//! Parley Core
//!
//! The state-changing chat and template actions. Both the server's websocket
//! dispatcher and the CLI run these, so a change made from either surface
//! produces the same server messages; only the [`EventSink`] differs.

pub mod actions;
mod error;
mod naming;
pub mod resolver;

use std::sync::Arc;

use async_trait::async_trait;
use parley_protocol::ServerMessage;
use parley_provider::ProviderRegistry;
use parley_store::Store;

pub use error::ActionError;
pub use naming::title_from_first_prompt;
pub use resolver::{resolve_template, ResolveError};

/// Receives the server messages an action produces, in order.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ServerMessage);
}

/// Collaborators every action needs (cheap to Clone).
#[derive(Clone)]
pub struct Services {
    pub store: Store,
    pub providers: Arc<ProviderRegistry>,
}

impl Services {
    pub fn new(store: Store, providers: Arc<ProviderRegistry>) -> Self {
        Self { store, providers }
    }
}
