//! The session store: every chat, the active pointer, and their persistence.
//!
//! Each mutation works on a copy of the current [`ChatList`], writes the copy
//! to the key/value store and only then swaps it in and publishes it to
//! subscribers. A failed write leaves the in-memory state untouched.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{ChatError, StorageError};
use crate::migrate::{self, CURRENT_SCHEMA_VERSION};
use crate::session::{new_id, Chat, ChatList, Message, Role, DEFAULT_CHAT_NAME, DEFAULT_SYSTEM_MESSAGE};
use crate::settings::OpenAIParameters;
use crate::storage::{KeyValueStore, CHAT_LIST_KEY};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedChatList<'a> {
    schema_version: u64,
    #[serde(flatten)]
    list: &'a ChatList,
}

pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<ChatList>,
    tx: watch::Sender<ChatList>,
}

impl SessionStore {
    /// An empty store. Call [`SessionStore::load`] once before use.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let (tx, _rx) = watch::channel(ChatList::default());
        Self { store, state: Mutex::new(ChatList::default()), tx }
    }

    /// Reads the persisted chat list, migrating older layouts. A blob that
    /// cannot be read is dropped and the store starts over with one fresh chat.
    /// A repaired active pointer is written back.
    pub fn load(&self) -> Result<(), StorageError> {
        let mut list = match self.store.get(CHAT_LIST_KEY) {
            Ok(None) => ChatList::default(),
            Ok(Some(raw)) => match decode_chat_list(&raw) {
                Ok(list) => list,
                Err(e) => {
                    error!(error = %e, "discarding unreadable chat list");
                    ChatList::default()
                }
            },
            Err(e) if e.is_corrupt() => {
                error!(error = %e, "discarding unreadable chat list");
                ChatList::default()
            }
            Err(e) => return Err(e),
        };

        let mut repaired = false;
        if let Some(active) = list.active_id.clone() {
            if !list.chats.contains_key(&active) {
                warn!(active_id = %active, "active chat missing from stored list");
                list.active_id = None;
            }
        }
        if list.active_id.is_none() && !list.chats.is_empty() {
            list.active_id = list.chats.keys().next().cloned();
            repaired = true;
        }
        debug!(chats = list.chats.len(), "loaded chat list");

        let empty = list.chats.is_empty();
        {
            let mut state = self.lock();
            *state = list.clone();
            self.tx.send_replace(list);
        }

        if empty {
            self.create_new_chat()?;
        } else if repaired {
            self.commit(|_| Some(()))?;
        }
        Ok(())
    }

    /// Live view of the chat list; the receiver sees every persisted snapshot.
    /// Dropping it ends the subscription.
    pub fn get_chat_list(&self) -> watch::Receiver<ChatList> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ChatList {
        self.lock().clone()
    }

    pub fn get_active_chat(&self) -> Option<Chat> {
        self.lock().active().cloned()
    }

    pub fn get_chat(&self, id: &str) -> Option<Chat> {
        self.lock().chats.get(id).cloned()
    }

    pub fn create_new_chat(&self) -> Result<String, StorageError> {
        let id = new_id();
        self.commit(|list| {
            list.chats.insert(id.clone(), Chat::new(id.clone()));
            list.active_id = Some(id.clone());
            Some(())
        })?;
        info!(chat_id = %id, "created chat");
        Ok(id)
    }

    pub fn update_chat_name(&self, id: &str, name: &str) -> Result<(), StorageError> {
        let name = match name.trim() {
            "" => DEFAULT_CHAT_NAME.to_string(),
            trimmed => trimmed.to_string(),
        };
        self.update_chat(id, |chat| chat.name = name)
    }

    pub fn update_system_message(&self, id: &str, text: &str) -> Result<(), StorageError> {
        self.update_chat(id, |chat| {
            let mut messages = Vec::with_capacity(chat.messages.len() + 1);
            messages.push(Message::system(text));
            messages.extend(chat.messages.drain(..).filter(|m| m.role != Role::System));
            chat.messages = messages;
            chat.system_message = text.to_string();
        })
    }

    /// Rejects parameters outside the catalog or allowed ranges.
    pub fn update_openai_parameters(&self, id: &str, params: OpenAIParameters) -> Result<(), ChatError> {
        params.validate()?;
        self.update_chat(id, |chat| chat.openai_parameters = params)?;
        Ok(())
    }

    /// Replaces the whole message list. Only the first system message is kept
    /// and it becomes the chat's system message.
    pub fn update_chat_messages(&self, id: &str, messages: Vec<Message>) -> Result<(), StorageError> {
        let mut seen_system = false;
        let messages: Vec<Message> = messages
            .into_iter()
            .filter(|m| {
                if m.role != Role::System {
                    return true;
                }
                let keep = !seen_system;
                seen_system = true;
                keep
            })
            .collect();
        let system_message = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string());

        self.update_chat(id, |chat| {
            chat.messages = messages;
            chat.system_message = system_message;
        })
    }

    /// Removes a chat. If it was active the first remaining chat takes over;
    /// deleting the last chat leaves a fresh one in its place.
    pub fn delete_chat(&self, id: &str) -> Result<(), StorageError> {
        let replacement = self.commit(|list| {
            list.chats.remove(id)?;
            if list.active_id.as_deref() != Some(id) {
                return Some(None);
            }
            if let Some(next) = list.chats.keys().next().cloned() {
                list.active_id = Some(next);
                return Some(None);
            }
            let fresh = Chat::new(new_id());
            let fresh_id = fresh.id.clone();
            list.chats.insert(fresh_id.clone(), fresh);
            list.active_id = Some(fresh_id.clone());
            Some(Some(fresh_id))
        })?;

        if let Some(outcome) = replacement {
            info!(chat_id = %id, "deleted chat");
            if let Some(fresh) = outcome {
                info!(chat_id = %fresh, "created chat to replace the last one");
            }
        }
        Ok(())
    }

    pub fn set_active_chat(&self, id: &str) -> Result<(), StorageError> {
        self.commit(|list| {
            if !list.chats.contains_key(id) {
                return None;
            }
            list.active_id = Some(id.to_string());
            Some(())
        })?;
        Ok(())
    }

    fn update_chat(&self, id: &str, f: impl FnOnce(&mut Chat)) -> Result<(), StorageError> {
        let applied = self.commit(|list| {
            let chat = list.chats.get_mut(id)?;
            f(chat);
            chat.touch();
            Some(())
        })?;
        if applied.is_none() {
            debug!(chat_id = %id, "ignoring update for unknown chat");
        }
        Ok(())
    }

    /// Runs `f` on a copy of the list. `None` from `f` means nothing changed
    /// and nothing is written.
    fn commit<T>(&self, f: impl FnOnce(&mut ChatList) -> Option<T>) -> Result<Option<T>, StorageError> {
        let mut state = self.lock();
        let mut next = state.clone();
        let Some(out) = f(&mut next) else { return Ok(None) };

        let raw = serde_json::to_string(&PersistedChatList {
            schema_version: CURRENT_SCHEMA_VERSION,
            list: &next,
        })?;
        self.store.set(CHAT_LIST_KEY, &raw)?;

        // Publish under the lock so subscribers see snapshots in write order.
        *state = next.clone();
        self.tx.send_replace(next);
        Ok(Some(out))
    }

    fn lock(&self) -> MutexGuard<'_, ChatList> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn decode_chat_list(raw: &str) -> anyhow::Result<ChatList> {
    let mut blob: serde_json::Value = serde_json::from_str(raw)?;
    let from = migrate::migrate(&mut blob)?;
    if from != CURRENT_SCHEMA_VERSION {
        info!(from, to = CURRENT_SCHEMA_VERSION, "upgraded stored chat list");
    }
    Ok(serde_json::from_value(blob)?)
}
