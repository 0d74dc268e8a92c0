use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::settings::OpenAIParameters;

pub const DEFAULT_CHAT_NAME: &str = "New Chat";
pub const DEFAULT_SYSTEM_MESSAGE: &str =
    "You are a helpful assistant. Respond in a clear and concise manner.";

/// Time-ordered unique id. Lexical order of the string matches creation order.
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            content: content.into(),
            role,
            timestamp: Utc::now(),
            model: None,
            token_usage: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_token_usage(mut self, usage: TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub name: String,
    pub messages: Vec<Message>,
    pub system_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "openAIParameters")]
    pub openai_parameters: OpenAIParameters,
}

impl Chat {
    /// A fresh chat holding only the default system message.
    pub fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: DEFAULT_CHAT_NAME.into(),
            messages: vec![Message::system(DEFAULT_SYSTEM_MESSAGE)],
            system_message: DEFAULT_SYSTEM_MESSAGE.into(),
            created_at: now,
            updated_at: now,
            openai_parameters: OpenAIParameters::default(),
        }
    }

    pub fn system_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::System).count()
    }

    /// Summed token usage over every message that reports one.
    pub fn token_totals(&self) -> TokenUsage {
        self.messages
            .iter()
            .filter_map(|m| m.token_usage)
            .fold(TokenUsage::default(), |acc, u| acc + u)
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatList {
    pub chats: BTreeMap<String, Chat>,
    #[serde(default)]
    pub active_id: Option<String>,
}

impl ChatList {
    pub fn active(&self) -> Option<&Chat> {
        self.active_id.as_ref().and_then(|id| self.chats.get(id))
    }

    /// Chats ordered by last update, newest first.
    pub fn chats_by_recent(&self) -> Vec<&Chat> {
        let mut chats: Vec<&Chat> = self.chats.values().collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        chats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_chat_has_single_default_system_message() {
        let chat = Chat::new(new_id());
        assert_eq!(chat.name, DEFAULT_CHAT_NAME);
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.system_message_count(), 1);
        assert_eq!(chat.messages[0].content, DEFAULT_SYSTEM_MESSAGE);
        assert_eq!(chat.system_message, DEFAULT_SYSTEM_MESSAGE);
    }

    #[test]
    fn ids_are_unique_and_time_ordered() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert!(a < b, "{a} should sort before {b}");
    }

    #[test]
    fn message_wire_shape_is_camel_case_and_skips_absent_fields() {
        let msg = Message::user("hi");
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "user");
        assert!(v["timestamp"].is_string());
        assert!(v.get("model").is_none());
        assert!(v.get("tokenUsage").is_none());

        let msg = Message::assistant("yo")
            .with_model("gpt-4o-mini")
            .with_token_usage(TokenUsage { prompt_tokens: 5, completion_tokens: 1, total_tokens: 6 });
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["model"], "gpt-4o-mini");
        assert_eq!(v["tokenUsage"]["totalTokens"], 6);
    }

    #[test]
    fn parses_javascript_style_timestamps() {
        let raw = r#"{"id":"1700000000000","content":"hi","role":"user","timestamp":"2024-03-01T10:20:30.123Z"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.timestamp.to_rfc3339(), "2024-03-01T10:20:30.123+00:00");
    }

    #[test]
    fn token_totals_sum_reported_usage() {
        let mut chat = Chat::new(new_id());
        chat.messages.push(Message::user("a"));
        chat.messages.push(Message::assistant("b").with_token_usage(TokenUsage {
            prompt_tokens: 5,
            completion_tokens: 1,
            total_tokens: 6,
        }));
        chat.messages.push(Message::assistant("c").with_token_usage(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 4,
            total_tokens: 14,
        }));
        let totals = chat.token_totals();
        assert_eq!(totals.prompt_tokens, 15);
        assert_eq!(totals.completion_tokens, 5);
        assert_eq!(totals.total_tokens, 20);
    }

    #[test]
    fn chats_by_recent_orders_newest_first() {
        let mut list = ChatList::default();
        let mut older = Chat::new(new_id());
        older.updated_at = Utc::now() - chrono::Duration::hours(1);
        let newer = Chat::new(new_id());
        list.chats.insert(older.id.clone(), older.clone());
        list.chats.insert(newer.id.clone(), newer.clone());
        let ids: Vec<&str> = list.chats_by_recent().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str()]);
    }
}
