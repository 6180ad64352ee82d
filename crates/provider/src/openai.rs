//! OpenAI-compatible `/chat/completions` provider (OpenAI itself, Ollama,
//! vLLM, LM Studio, ...).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Completion, CompletionProvider, CompletionRequest, ProviderError};

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiProvider {
    name: String,
    base_url: String,
    api_key_env: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: Option<String>,
        api_key_env: Option<String>,
        default_model: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key_env,
            default_model: default_model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            client,
        })
    }

    fn api_key(&self) -> Result<Option<String>, ProviderError> {
        let Some(env) = &self.api_key_env else {
            return Ok(None);
        };
        match std::env::var(env) {
            Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
            _ => Err(ProviderError::MissingApiKey {
                provider: self.name.clone(),
                env: env.clone(),
            }),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let body = ChatRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| ChatTurn {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = self.api_key()? {
            builder = builder.bearer_auth(key);
        }

        debug!(
            component = "provider",
            event = "provider.request",
            provider = %self.name,
            model = %request.model,
            turns = request.messages.len(),
            "Sending completion request"
        );

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ProviderError::EmptyResponse)?;

        Ok(Completion {
            provider: self.name.clone(),
            model: parsed.model.unwrap_or(request.model),
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use parley_protocol::{Message, Role};
    use serde_json::{json, Value};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1", addr)
    }

    fn request(content: &str) -> CompletionRequest {
        CompletionRequest {
            model: "tiny".into(),
            messages: vec![Message::draft(1, Role::User, content)],
            temperature: Some(0.2),
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "tiny");
                assert_eq!(body["messages"][0]["role"], "user");
                assert!(body.get("max_tokens").is_none());
                Json(json!({
                    "model": "tiny-2024",
                    "choices": [{"message": {"role": "assistant", "content": "pong"}}]
                }))
            }),
        );
        let base_url = serve(app).await;
        let provider = OpenAiProvider::new("local", Some(base_url), None, None).unwrap();

        let completion = provider.complete(request("ping")).await.unwrap();
        assert_eq!(completion.content, "pong");
        assert_eq!(completion.model, "tiny-2024");
        assert_eq!(completion.provider, "local");
    }

    #[tokio::test]
    async fn non_success_status_is_an_api_error() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let base_url = serve(app).await;
        let provider = OpenAiProvider::new("local", Some(base_url), None, None).unwrap();

        let err = provider.complete(request("ping")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 429, ref body } if body == "slow down"));
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_sending() {
        let provider = OpenAiProvider::new(
            "openai",
            Some("http://127.0.0.1:9".into()),
            Some("PARLEY_TEST_KEY_THAT_IS_NEVER_SET".into()),
            None,
        )
        .unwrap();
        let err = provider.complete(request("ping")).await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingApiKey { .. }));
    }
}
