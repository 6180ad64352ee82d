//! `providers.toml`: which providers exist and which one is the default.
//!
//! ```toml
//! default_provider = "openai"
//!
//! [providers.openai]
//! kind = "openai"
//! base_url = "https://api.openai.com/v1"
//! api_key_env = "OPENAI_API_KEY"
//! default_model = "gpt-4o-mini"
//!
//! [providers.local]
//! kind = "openai"
//! base_url = "http://127.0.0.1:11434/v1"
//! default_model = "llama3.2"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Openai,
    Echo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub kind: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub default_provider: String,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderEntry>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "echo".to_string(),
            ProviderEntry {
                kind: ProviderKind::Echo,
                base_url: None,
                api_key_env: None,
                default_model: None,
            },
        );
        providers.insert(
            "openai".to_string(),
            ProviderEntry {
                kind: ProviderKind::Openai,
                base_url: Some(crate::openai::DEFAULT_BASE_URL.to_string()),
                api_key_env: Some("OPENAI_API_KEY".to_string()),
                default_model: Some(crate::openai::DEFAULT_MODEL.to_string()),
            },
        );
        Self {
            default_provider: "echo".to_string(),
            providers,
        }
    }
}

impl ProviderSettings {
    /// Load settings from `path`, falling back to the defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self, ProviderError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ProviderError> {
        Ok(toml::from_str(raw)?)
    }
}
