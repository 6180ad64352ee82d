//! Parley completion providers
//!
//! One trait for "turn a conversation into the next assistant message", a
//! registry built once at startup and shared by reference, and the built-in
//! providers.

mod echo;
mod openai;
mod registry;
mod settings;

pub use echo::EchoProvider;
pub use openai::OpenAiProvider;
pub use registry::ProviderRegistry;
pub use settings::{ProviderEntry, ProviderKind, ProviderSettings};

use async_trait::async_trait;
use parley_protocol::Message;
use thiserror::Error;

/// Everything a provider needs for one completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// The assistant turn produced by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub provider: String,
    pub model: String,
    pub content: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider `{0}`")]
    UnknownProvider(String),

    #[error("provider `{provider}` needs an API key in ${env}")]
    MissingApiKey { provider: String, env: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("provider returned no completion")]
    EmptyResponse,

    #[error("invalid provider settings: {0}")]
    Settings(#[from] toml::de::Error),

    #[error("could not read provider settings: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Registry key of this provider.
    fn name(&self) -> &str;

    /// Model used when the caller does not pick one.
    fn default_model(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;
}
