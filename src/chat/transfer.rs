//! Versioned JSON export/import of a message list.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::ImportError;
use crate::manager::SessionStore;
use crate::session::Message;

pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Serialize)]
struct ExportPayload<'a> {
    version: &'static str,
    timestamp: String,
    messages: &'a [Message],
}

pub fn encode_messages(messages: &[Message], exported_at: DateTime<Utc>) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&ExportPayload {
        version: EXPORT_VERSION,
        timestamp: exported_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        messages,
    })
}

/// Accepts any JSON object with a `messages` array whose entries are all
/// valid messages. `version` is not checked.
pub fn decode_messages(payload: &str) -> Result<Vec<Message>, ImportError> {
    let data: Value = serde_json::from_str(payload).map_err(ImportError::Parse)?;
    let Some(Value::Array(items)) = data.get("messages") else {
        return Err(ImportError::MissingMessages);
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            Message::deserialize(item).map_err(|source| ImportError::InvalidMessage { index, source })
        })
        .collect()
}

/// The active chat's messages in export form, or `{}` with no active chat.
pub fn export_chat(sessions: &SessionStore) -> Result<String, serde_json::Error> {
    match sessions.get_active_chat() {
        None => Ok("{}".to_string()),
        Some(chat) => encode_messages(&chat.messages, Utc::now()),
    }
}

/// Replaces the active chat's messages with the payload's. Nothing changes
/// unless the whole payload is valid and a chat is active.
pub fn import_chat(sessions: &SessionStore, payload: &str) -> Result<(), ImportError> {
    let result = decode_messages(payload).and_then(|messages| {
        let chat = sessions.get_active_chat().ok_or(ImportError::NoActiveChat)?;
        sessions.update_chat_messages(&chat.id, messages)?;
        Ok(())
    });
    if let Err(e) = &result {
        warn!(error = %e, "chat import rejected");
    }
    result
}
