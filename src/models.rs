use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ConfigService;
use crate::session::{Message, Role, TokenUsage};
use crate::settings::OpenAIParameters;

pub const MISSING_API_KEY_MESSAGE: &str =
    "Please configure your OpenAI API key in the settings to use the chat.";
pub const EMPTY_RESPONSE_MESSAGE: &str = "No response generated";

/// A role/content pair as sent to the model, with no local metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for ChatMessage {
    fn from(m: &Message) -> Self {
        Self { role: m.role, content: m.content.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Completion {
    pub content: String,
    pub token_usage: TokenUsage,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage], params: &OpenAIParameters) -> anyhow::Result<Completion>;
}

#[derive(Clone)]
pub struct OpenAICompatible {
    config: Arc<ConfigService>,
    http: reqwest::Client,
}

impl OpenAICompatible {
    pub fn new(config: Arc<ConfigService>) -> Self {
        Self { config, http: reqwest::Client::new() }
    }
}

#[derive(Debug, Serialize)]
struct OaiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct OaiChatResponse {
    choices: Vec<OaiChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Debug, Deserialize)]
struct OaiChoice { message: OaiMessage }

#[derive(Debug, Deserialize)]
struct OaiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OaiUsage {
    #[serde(default)] prompt_tokens: u64,
    #[serde(default)] completion_tokens: u64,
    #[serde(default)] total_tokens: u64,
}

impl OaiChatResponse {
    fn into_completion(self) -> Completion {
        let content = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| EMPTY_RESPONSE_MESSAGE.into());
        let usage = self.usage.unwrap_or_default();
        Completion {
            content,
            token_usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAICompatible {
    async fn generate(&self, messages: &[ChatMessage], params: &OpenAIParameters) -> anyhow::Result<Completion> {
        let config = self.config.current();
        let Some(key) = config.api_key() else {
            return Ok(Completion { content: MISSING_API_KEY_MESSAGE.into(), token_usage: TokenUsage::default() });
        };

        let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        let body = OaiChatRequest {
            model: &params.model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
        };
        let resp = self.http.post(url).bearer_auth(key).json(&body).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("model call failed: {}", resp.status());
        }
        let v: OaiChatResponse = resp.json().await?;
        Ok(v.into_completion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::AppConfigPatch;
    use crate::storage::MemoryStore;

    #[test]
    fn chat_messages_strip_local_metadata() {
        let msg = Message::assistant("hello").with_model("gpt-4").with_token_usage(TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        });
        let v = serde_json::to_value(ChatMessage::from(&msg)).unwrap();
        assert_eq!(v, serde_json::json!({"role": "assistant", "content": "hello"}));
    }

    #[test]
    fn response_parsing_fills_defaults() {
        let v: OaiChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"hi there"}}],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
        )
        .unwrap();
        let c = v.into_completion();
        assert_eq!(c.content, "hi there");
        assert_eq!(c.token_usage.total_tokens, 7);

        let v: OaiChatResponse = serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).unwrap();
        let c = v.into_completion();
        assert_eq!(c.content, EMPTY_RESPONSE_MESSAGE);
        assert_eq!(c.token_usage, TokenUsage::default());
    }

    #[test]
    fn request_uses_openai_field_names() {
        let params = OpenAIParameters::default();
        let messages = vec![ChatMessage { role: Role::User, content: "hi".into() }];
        let body = OaiChatRequest {
            model: &params.model,
            messages: &messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["max_tokens"], 2048);
        assert_eq!(v["top_p"], 1.0);
        assert_eq!(v["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn missing_key_short_circuits_without_network() {
        let config = ConfigService::load(Arc::new(MemoryStore::new()), AppConfigPatch::default()).unwrap();
        let client = OpenAICompatible::new(Arc::new(config));
        let out = client
            .generate(&[ChatMessage { role: Role::User, content: "hi".into() }], &OpenAIParameters::default())
            .await
            .unwrap();
        assert_eq!(out.content, MISSING_API_KEY_MESSAGE);
        assert_eq!(out.token_usage, TokenUsage::default());
    }
}
