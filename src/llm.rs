use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Completion token cap. Anthropic requires one; the others accept it.
const MAX_OUTPUT_TOKENS: u32 = 1500;
const TEMPERATURE: f32 = 0.7;

/// AI services a summary can be requested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(alias = "anthropic")]
    Claude,
    /// Mistral and any other model routed through OpenRouter.
    #[serde(alias = "mistral")]
    OpenRouter,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Claude, Provider::OpenRouter];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Claude => "claude",
            Provider::OpenRouter => "openrouter",
        }
    }

    /// Environment variable holding this provider's key for local use.
    pub fn env_key(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Claude => "ANTHROPIC_API_KEY",
            Provider::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Claude => "Claude",
            Provider::OpenRouter => "Mistral / OpenRouter",
        }
    }

    pub fn default_model(self) -> &'static str {
        self.models()[0]
    }

    /// Known models for the provider. OpenRouter also accepts any custom id.
    pub fn models(self) -> &'static [&'static str] {
        match self {
            Provider::OpenAi => &["gpt-4", "gpt-4-turbo", "gpt-3.5-turbo"],
            Provider::Claude => &["claude-3-opus", "claude-3-sonnet", "claude-2.1"],
            Provider::OpenRouter => &[
                "mistralai/mixtral-8x7b-instruct",
                "mistralai/mistral-7b-instruct",
                "openai/gpt-4",
                "anthropic/claude-3-opus",
            ],
        }
    }

    fn endpoint(self) -> &'static str {
        match self {
            Provider::OpenAi => OPENAI_URL,
            Provider::Claude => ANTHROPIC_URL,
            Provider::OpenRouter => OPENROUTER_URL,
        }
    }

    /// Normalise a user supplied model id for this provider's endpoint.
    ///
    /// Native endpoints take bare model names, so a vendor prefix such as
    /// `openai/` or `anthropic/` is dropped. OpenRouter routes on the full id.
    pub fn resolve_model(self, model: &str) -> String {
        let model = model.trim();
        if model.is_empty() {
            return self.default_model().to_string();
        }
        match self {
            Provider::OpenAi => model.strip_prefix("openai/").unwrap_or(model).to_string(),
            Provider::Claude => model.strip_prefix("anthropic/").unwrap_or(model).to_string(),
            Provider::OpenRouter => model.to_string(),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "claude" | "anthropic" => Ok(Provider::Claude),
            "openrouter" | "mistral" => Ok(Provider::OpenRouter),
            other => Err(AppError::InvalidInput(format!(
                "Unknown provider '{}', expected one of openai, claude, mistral",
                other
            ))),
        }
    }
}

/// A single prompt to send to a provider.
#[derive(Clone)]
pub struct CompletionRequest {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub system: Option<String>,
    pub prompt: String,
}

impl fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("prompt_chars", &self.prompt.len())
            .finish()
    }
}

/// Text completion capability shared by every provider.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    max_tokens: u32,
}

/// HTTP client for the provider completion endpoints.
#[derive(Clone)]
pub struct HttpCompletionClient {
    client: Client,
    site_url: Option<String>,
    site_name: Option<String>,
}

impl HttpCompletionClient {
    pub fn new(timeout: Duration, site_url: Option<String>, site_name: Option<String>) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            site_url,
            site_name,
        })
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let provider = request.provider;
        let mut builder = self.client.post(provider.endpoint());

        builder = match provider {
            Provider::Claude => builder
                .header("x-api-key", &request.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&anthropic_body(&request)),
            Provider::OpenAi => builder.bearer_auth(&request.api_key).json(&chat_body(&request)),
            Provider::OpenRouter => {
                let mut b = builder.bearer_auth(&request.api_key).json(&chat_body(&request));
                // Add optional headers if provided
                if let Some(url) = &self.site_url {
                    b = b.header("HTTP-Referer", url);
                }
                if let Some(name) = &self.site_name {
                    b = b.header("X-Title", name);
                }
                b
            }
        };

        tracing::debug!(provider = %provider, model = %request.model, "sending completion request");

        let res = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Provider(format!("{} request timed out", provider.display_name()))
            } else {
                AppError::Provider(format!("{} request failed: {}", provider.display_name(), e))
            }
        })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify_failure(provider, status, &body));
        }

        let json: serde_json::Value = res.json().await.map_err(|e| {
            AppError::Provider(format!("Invalid JSON from {}: {}", provider.display_name(), e))
        })?;

        parse_reply(provider, &json)
    }
}

fn chat_body(request: &CompletionRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = &request.system {
        messages.push(Message {
            role: "system".into(),
            content: system.clone(),
        });
    }
    messages.push(Message {
        role: "user".into(),
        content: request.prompt.clone(),
    });

    ChatRequest {
        model: request.model.clone(),
        messages,
        max_tokens: MAX_OUTPUT_TOKENS,
        temperature: TEMPERATURE,
    }
}

fn anthropic_body(request: &CompletionRequest) -> AnthropicRequest {
    AnthropicRequest {
        model: request.model.clone(),
        system: request.system.clone(),
        messages: vec![Message {
            role: "user".into(),
            content: request.prompt.clone(),
        }],
        max_tokens: MAX_OUTPUT_TOKENS,
    }
}

fn classify_failure(provider: Provider, status: StatusCode, body: &str) -> AppError {
    let snippet: String = body.chars().take(300).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::Auth(format!(
            "Invalid API key for {}",
            provider.display_name()
        )),
        StatusCode::TOO_MANY_REQUESTS => AppError::Provider(format!(
            "Rate limit exceeded for {}",
            provider.display_name()
        )),
        _ => AppError::Provider(format!(
            "{} returned {}: {}",
            provider.display_name(),
            status,
            snippet
        )),
    }
}

fn parse_reply(provider: Provider, json: &serde_json::Value) -> Result<String> {
    let reply = match provider {
        Provider::Claude => json["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<String>()
            }),
        Provider::OpenAi | Provider::OpenRouter => json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string),
    };

    let reply = reply.ok_or_else(|| {
        AppError::Provider(format!(
            "Invalid response format from {}",
            provider.display_name()
        ))
    })?;

    let reply = reply.trim();
    if reply.is_empty() {
        let reason = json["choices"][0]["finish_reason"]
            .as_str()
            .or_else(|| json["stop_reason"].as_str())
            .unwrap_or("unknown");
        return Err(AppError::Provider(format!(
            "{} returned empty content (finish reason: {})",
            provider.display_name(),
            reason
        )));
    }

    Ok(reply.to_string())
}

/// Provider output for one conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub text: String,
    pub provider: Provider,
    pub model: String,
}

pub fn build_summary_prompt(content: &str) -> String {
    let mut result = String::with_capacity(content.len() + 400);
    result.push_str(
        "The following is a conversation between a user and an AI assistant. \
         Summarise what was explored and learned so it can become a short LinkedIn post. \
         Focus on:\n\
         1. The core problem or question\n\
         2. Key insights and technical details worth sharing\n\
         3. Practical takeaways for a professional audience\n\n\
         Write plain paragraphs and at most five bullet points. \
         Do not add a title, hashtags or commentary about this request.\n\nConversation:\n\n",
    );
    result.push_str(content);
    result
}

/// Summarise conversation text with the selected provider.
///
/// The key is checked before anything goes over the wire.
pub async fn summarize(
    completions: &dyn CompletionProvider,
    text: &str,
    provider: Provider,
    model: &str,
    api_key: &str,
) -> Result<Summary> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(AppError::Auth(format!(
            "{} API key is required",
            provider.display_name()
        )));
    }
    if text.trim().is_empty() {
        return Err(AppError::InvalidInput(
            "Conversation text is empty".to_string(),
        ));
    }

    let model = provider.resolve_model(model);
    let request = CompletionRequest {
        provider,
        model: model.clone(),
        api_key: api_key.to_string(),
        system: Some("You are an expert technical writer who distils conversations into clear insights.".to_string()),
        prompt: build_summary_prompt(text),
    };

    let text = completions.complete(request).await?;

    Ok(Summary {
        text,
        provider,
        model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionProvider for CountingProvider {
        async fn complete(&self, request: CompletionRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("summary via {}", request.model))
        }
    }

    #[tokio::test]
    async fn empty_key_fails_without_calling_provider() {
        let fake = CountingProvider { calls: AtomicUsize::new(0) };
        let err = summarize(&fake, "hello there", Provider::OpenAi, "gpt-4", "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn summarize_resolves_model_before_dispatch() {
        let fake = CountingProvider { calls: AtomicUsize::new(0) };
        let summary = summarize(&fake, "hello there", Provider::Claude, "anthropic/claude-3-opus", "key")
            .await
            .unwrap();
        assert_eq!(summary.model, "claude-3-opus");
        assert_eq!(summary.text, "summary via claude-3-opus");
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn provider_parsing_accepts_aliases() {
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("anthropic".parse::<Provider>().unwrap(), Provider::Claude);
        assert_eq!("mistral".parse::<Provider>().unwrap(), Provider::OpenRouter);
        assert!(matches!("gemini".parse::<Provider>(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn provider_serde_names() {
        assert_eq!(serde_json::to_value(Provider::OpenAi).unwrap(), json!("openai"));
        let p: Provider = serde_json::from_value(json!("mistral")).unwrap();
        assert_eq!(p, Provider::OpenRouter);
    }

    #[test]
    fn resolve_model_strips_vendor_prefix_for_native_endpoints() {
        assert_eq!(Provider::OpenAi.resolve_model("openai/gpt-4"), "gpt-4");
        assert_eq!(Provider::OpenRouter.resolve_model("openai/gpt-4"), "openai/gpt-4");
        assert_eq!(Provider::Claude.resolve_model(""), "claude-3-opus");
    }

    #[test]
    fn anthropic_body_carries_system_and_max_tokens() {
        let req = CompletionRequest {
            provider: Provider::Claude,
            model: "claude-3-opus".into(),
            api_key: "k".into(),
            system: Some("sys".into()),
            prompt: "hi".into(),
        };
        let body = serde_json::to_value(anthropic_body(&req)).unwrap();
        assert_eq!(body["system"], "sys");
        assert_eq!(body["max_tokens"], MAX_OUTPUT_TOKENS);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn chat_body_puts_system_message_first() {
        let req = CompletionRequest {
            provider: Provider::OpenAi,
            model: "gpt-4".into(),
            api_key: "k".into(),
            system: Some("sys".into()),
            prompt: "hi".into(),
        };
        let body = serde_json::to_value(chat_body(&req)).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn parse_reply_handles_both_formats() {
        let openai = json!({"choices": [{"message": {"content": "  done  "}}]});
        assert_eq!(parse_reply(Provider::OpenAi, &openai).unwrap(), "done");

        let claude = json!({"type": "message", "content": [
            {"type": "text", "text": "part one "},
            {"type": "tool_use", "name": "x"},
            {"type": "text", "text": "part two"}
        ]});
        assert_eq!(parse_reply(Provider::Claude, &claude).unwrap(), "part one part two");
    }

    #[test]
    fn parse_reply_rejects_empty_or_malformed() {
        let empty = json!({"choices": [{"message": {"content": ""}, "finish_reason": "content_filter"}]});
        let err = parse_reply(Provider::OpenRouter, &empty).unwrap_err();
        assert!(err.to_string().contains("content_filter"));

        let malformed = json!({"error": "nope"});
        assert!(matches!(parse_reply(Provider::OpenAi, &malformed), Err(AppError::Provider(_))));
    }

    #[test]
    fn unauthorized_maps_to_auth_error() {
        assert!(matches!(
            classify_failure(Provider::OpenAi, StatusCode::UNAUTHORIZED, ""),
            AppError::Auth(_)
        ));
        assert!(matches!(
            classify_failure(Provider::OpenAi, StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            AppError::Provider(_)
        ));
    }

    #[test]
    fn request_debug_redacts_key() {
        let req = CompletionRequest {
            provider: Provider::OpenAi,
            model: "gpt-4".into(),
            api_key: "sk-very-secret".into(),
            system: None,
            prompt: "hi".into(),
        };
        assert!(!format!("{:?}", req).contains("sk-very-secret"));
    }
}
