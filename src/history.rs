use std::sync::Arc;

use chrono::Utc;
use tracing::{error, warn};

use crate::chat::transfer::{decode_messages, encode_messages};
use crate::error::{ImportError, StorageError};
use crate::session::Message;
use crate::storage::{KeyValueStore, CHAT_HISTORY_KEY};

/// Flat single-conversation message history, kept under its own key for
/// clients that predate multiple chats.
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self { Self { store } }

    pub fn save_messages(&self, messages: &[Message]) -> Result<(), StorageError> {
        self.store.set(CHAT_HISTORY_KEY, &serde_json::to_string(messages)?)
    }

    /// Missing or unreadable history yields an empty list.
    pub fn load_messages(&self) -> Result<Vec<Message>, StorageError> {
        let raw = match self.store.get(CHAT_HISTORY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(Vec::new()),
            Err(e) if e.is_corrupt() => {
                error!(error = %e, "discarding unreadable message history");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        match serde_json::from_str(&raw) {
            Ok(messages) => Ok(messages),
            Err(e) => {
                error!(error = %e, "discarding unreadable message history");
                Ok(Vec::new())
            }
        }
    }

    pub fn export_chat(&self) -> Result<String, StorageError> {
        let messages = self.load_messages()?;
        Ok(encode_messages(&messages, Utc::now())?)
    }

    pub fn import_chat(&self, payload: &str) -> Result<(), ImportError> {
        let messages = decode_messages(payload).inspect_err(|e| warn!(error = %e, "history import rejected"))?;
        self.save_messages(&messages)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(CHAT_HISTORY_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};

    #[test]
    fn save_load_clear() {
        let history = HistoryStore::new(Arc::new(MemoryStore::new()));
        assert!(history.load_messages().unwrap().is_empty());

        let messages = vec![Message::system("sys"), Message::user("hi"), Message::assistant("hello")];
        history.save_messages(&messages).unwrap();
        assert_eq!(history.load_messages().unwrap(), messages);

        history.clear().unwrap();
        assert!(history.load_messages().unwrap().is_empty());
    }

    #[test]
    fn unreadable_history_loads_empty() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(CHAT_HISTORY_KEY, "{\"oops\":").unwrap();
        let history = HistoryStore::new(kv);
        assert!(history.load_messages().unwrap().is_empty());
    }

    #[test]
    fn non_utf8_history_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(FileStore::open(dir.path()).unwrap());
        std::fs::write(dir.path().join("chat_history.json"), [0xff, 0xfe, b'[']).unwrap();
        let history = HistoryStore::new(kv);
        assert!(history.load_messages().unwrap().is_empty());

        history.save_messages(&[Message::user("again")]).unwrap();
        assert_eq!(history.load_messages().unwrap().len(), 1);
    }

    #[test]
    fn export_import_between_stores() {
        let source = HistoryStore::new(Arc::new(MemoryStore::new()));
        let messages = vec![Message::user("hi"), Message::assistant("hello").with_model("gpt-4")];
        source.save_messages(&messages).unwrap();
        let exported = source.export_chat().unwrap();

        let target = HistoryStore::new(Arc::new(MemoryStore::new()));
        target.import_chat(&exported).unwrap();
        assert_eq!(target.load_messages().unwrap(), messages);

        assert!(matches!(target.import_chat(r#"{"messages":{}}"#), Err(ImportError::MissingMessages)));
        assert_eq!(target.load_messages().unwrap(), messages);
    }
}
