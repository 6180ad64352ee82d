use parley_provider::ProviderError;
use parley_store::StoreError;
use thiserror::Error;

use crate::resolver::ResolveError;

/// Why a chat or template action failed.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("chat {0} not found")]
    ChatNotFound(i64),

    #[error("template `{0}` not found")]
    TemplateNotFound(String),

    #[error("template `{0}` already exists")]
    TemplateExists(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Template(#[from] ResolveError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ActionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ChatNotFound(id) => ActionError::ChatNotFound(id),
            StoreError::TemplateExists(name) => ActionError::TemplateExists(name),
            other => ActionError::Store(other),
        }
    }
}

impl ActionError {
    /// Stable machine-readable code carried in `error` envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            ActionError::ChatNotFound(_) | ActionError::TemplateNotFound(_) => "not_found",
            ActionError::TemplateExists(_) => "conflict",
            ActionError::Invalid(_) => "invalid_request",
            ActionError::Template(ResolveError::Store(_)) => "store_error",
            ActionError::Template(_) => "template_error",
            ActionError::Provider(_) => "provider_error",
            ActionError::Store(_) => "store_error",
        }
    }
}
