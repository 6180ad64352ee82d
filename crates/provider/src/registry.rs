//! Provider registry, constructed once at startup and passed to whoever
//! needs to run completions.

use std::collections::HashMap;
use std::sync::Arc;

use parley_protocol::{CompletionParams, Message};
use tracing::info;

use crate::{
    Completion, CompletionProvider, CompletionRequest, EchoProvider, OpenAiProvider,
    ProviderError, ProviderKind, ProviderSettings,
};

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn CompletionProvider>>,
    default_provider: String,
}

impl ProviderRegistry {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Build every provider listed in `settings`.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let mut registry = Self::new(settings.default_provider.clone());
        for (name, entry) in &settings.providers {
            let provider: Arc<dyn CompletionProvider> = match entry.kind {
                ProviderKind::Echo => Arc::new(EchoProvider::new(name.clone())),
                ProviderKind::Openai => Arc::new(OpenAiProvider::new(
                    name.clone(),
                    entry.base_url.clone(),
                    entry.api_key_env.clone(),
                    entry.default_model.clone(),
                )?),
            };
            registry.register(provider);
        }

        if !registry.providers.contains_key(&registry.default_provider) {
            return Err(ProviderError::UnknownProvider(
                registry.default_provider.clone(),
            ));
        }

        info!(
            component = "provider",
            event = "provider.registry.built",
            default = %registry.default_provider,
            count = registry.providers.len(),
            "Provider registry ready"
        );
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn CompletionProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CompletionProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// The provider `params` selects, or the default one.
    pub fn provider_for(&self, params: &CompletionParams) -> Result<Arc<dyn CompletionProvider>, ProviderError> {
        let name = params
            .provider
            .as_deref()
            .unwrap_or(&self.default_provider);
        self.get(name)
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))
    }

    /// Run one completion over `messages`, picking the provider and model
    /// from `params` or the defaults.
    pub async fn complete(
        &self,
        params: &CompletionParams,
        messages: Vec<Message>,
    ) -> Result<Completion, ProviderError> {
        let provider = self.provider_for(params)?;

        let request = CompletionRequest {
            model: params
                .model
                .clone()
                .unwrap_or_else(|| provider.default_model().to_string()),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };
        provider.complete(request).await
    }
}
