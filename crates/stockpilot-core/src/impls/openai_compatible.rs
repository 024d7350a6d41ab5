//! OpenAI-compatible chat-completions provider.
//!
//! Works against any endpoint that speaks the `/chat/completions` shape
//! (DeepSeek, Qwen compatible mode, OpenAI itself). Every failure is
//! classified into an `ErrorKind`; nothing is retried here.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::domain::{ErrorKind, Outcome, Subject};
use crate::ports::LlmProvider;

/// Default endpoint when `base_url` is not configured.
pub const DEFAULT_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiCompatibleProvider {
    name: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: impl Into<String>, config: &ProviderConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;
        let model = if config.model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.model.clone()
        };
        Ok(Self {
            name: name.into(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_CHAT_COMPLETIONS_URL.to_string()),
            model,
            api_key: config.resolve_api_key(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client,
        })
    }

    fn build_request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": false,
            "messages": [
                { "role": "user", "content": prompt }
            ],
        })
    }

    fn parse_response(&self, body: &str, elapsed: Duration) -> Outcome {
        let response: ChatCompletionResponse = match serde_json::from_str(body) {
            Ok(response) => response,
            Err(e) => {
                return Outcome::failure(ErrorKind::Parse, format!("{}: failed to parse response: {e}", self.name));
            }
        };
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty());
        let Some(content) = content else {
            return Outcome::failure(ErrorKind::Parse, format!("{}: response has no content", self.name));
        };
        Outcome::success(content)
            .with_tokens(response.usage.and_then(|u| u.total_tokens))
            .with_model(response.model.unwrap_or_else(|| self.model.clone()))
            .with_response_time_ms(elapsed.as_millis() as u64)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: Option<u64>,
}

/// Map a non-2xx HTTP status to an `ErrorKind`.
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Auth,
        429 => ErrorKind::RateLimit,
        _ => ErrorKind::Api,
    }
}

/// Map a transport error to an `ErrorKind`.
pub fn classify_transport(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ErrorKind::Network
    } else if err.is_decode() {
        ErrorKind::Parse
    } else {
        ErrorKind::Unknown
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, subject: &Subject) -> Outcome {
        let Some(api_key) = self.api_key.as_deref() else {
            return Outcome::failure(ErrorKind::Auth, format!("API key not configured for {}", self.name));
        };

        tracing::debug!(provider = %self.name, subject = %subject.key, prompt_chars = prompt.chars().count(), "sending chat completion");
        let started = Instant::now();
        let response = match self
            .client
            .post(&self.base_url)
            .bearer_auth(api_key)
            .json(&self.build_request_body(prompt))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return Outcome::failure(classify_transport(&e), format!("{}: {e}", self.name)),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Outcome::failure(classify_transport(&e), format!("{}: {e}", self.name)),
        };

        if !status.is_success() {
            return Outcome::failure(
                classify_status(status.as_u16()),
                format!("{}: HTTP {}: {}", self.name, status.as_u16(), truncate(&body, 200)),
            );
        }

        self.parse_response(&body, started.elapsed())
    }
}
