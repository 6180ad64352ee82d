use async_trait::async_trait;
use parley_protocol::Role;

use crate::{Completion, CompletionProvider, CompletionRequest, ProviderError};

/// Offline provider that answers with the last user turn. Used as the
/// default when nothing else is configured, and in tests.
#[derive(Debug, Clone)]
pub struct EchoProvider {
    name: String,
}

impl EchoProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new("echo")
    }
}

#[async_trait]
impl CompletionProvider for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .ok_or(ProviderError::EmptyResponse)?;

        Ok(Completion {
            provider: self.name.clone(),
            model: request.model,
            content: last_user.content.clone(),
        })
    }
}
