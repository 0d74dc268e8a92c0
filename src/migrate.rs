//! Versioned migrations for the persisted chat list blob.
//!
//! The blob carries a `schemaVersion` field; blobs written before versioning
//! existed have none and are treated as version 0. Each entry in
//! [`MIGRATIONS`] lifts the blob by exactly one version.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::session::{DEFAULT_CHAT_NAME, DEFAULT_SYSTEM_MESSAGE};
use crate::settings::OpenAIParameters;

pub const SCHEMA_VERSION_FIELD: &str = "schemaVersion";
pub const CURRENT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("chat list blob is not an object with a `chats` map")]
    Shape,

    #[error("schema version {0} is newer than supported version {CURRENT_SCHEMA_VERSION}")]
    UnsupportedVersion(u64),

    #[error("chat `{0}` is not an object")]
    ChatShape(String),
}

type Migration = fn(&mut Map<String, Value>) -> Result<(), MigrationError>;

/// `MIGRATIONS[n]` moves a blob from version `n` to `n + 1`.
const MIGRATIONS: &[Migration] = &[v0_fill_missing_chat_fields];

pub fn schema_version(blob: &Value) -> u64 {
    blob.get(SCHEMA_VERSION_FIELD).and_then(Value::as_u64).unwrap_or(0)
}

/// Brings `blob` up to [`CURRENT_SCHEMA_VERSION`]. Returns the version it started at.
pub fn migrate(blob: &mut Value) -> Result<u64, MigrationError> {
    let from = schema_version(blob);
    if from > CURRENT_SCHEMA_VERSION {
        return Err(MigrationError::UnsupportedVersion(from));
    }
    let root = blob.as_object_mut().ok_or(MigrationError::Shape)?;
    if !root.get("chats").is_some_and(Value::is_object) {
        return Err(MigrationError::Shape);
    }
    for (version, step) in MIGRATIONS.iter().enumerate().skip(from as usize) {
        step(root)?;
        tracing::debug!(from = version, to = version + 1, "migrated chat list schema");
    }
    root.insert(SCHEMA_VERSION_FIELD.into(), Value::from(CURRENT_SCHEMA_VERSION));
    Ok(from)
}

fn chats_mut(root: &mut Map<String, Value>) -> Result<&mut Map<String, Value>, MigrationError> {
    root.get_mut("chats").and_then(Value::as_object_mut).ok_or(MigrationError::Shape)
}

fn v0_fill_missing_chat_fields(root: &mut Map<String, Value>) -> Result<(), MigrationError> {
    let defaults = serde_json::to_value(OpenAIParameters::default())
        .map_err(|_| MigrationError::Shape)?;

    for (id, chat) in chats_mut(root)?.iter_mut() {
        let chat = chat.as_object_mut().ok_or_else(|| MigrationError::ChatShape(id.clone()))?;

        if chat.get("openAIParameters").is_none_or(Value::is_null) {
            chat.insert("openAIParameters".into(), defaults.clone());
        }
        if !chat.contains_key("id") {
            chat.insert("id".into(), Value::String(id.clone()));
        }
        if chat.get("name").and_then(Value::as_str).is_none_or(|n| n.trim().is_empty()) {
            chat.insert("name".into(), Value::String(DEFAULT_CHAT_NAME.into()));
        }
        if !chat.get("systemMessage").is_some_and(Value::is_string) {
            let derived = chat
                .get("messages")
                .and_then(Value::as_array)
                .and_then(|msgs| {
                    msgs.iter()
                        .find(|m| m.get("role").and_then(Value::as_str) == Some("system"))
                        .and_then(|m| m.get("content"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.into());
            chat.insert("systemMessage".into(), Value::String(derived));
        }
    }
    Ok(())
}
