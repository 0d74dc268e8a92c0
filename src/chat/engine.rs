use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::{error, info};

use crate::chat::transfer;
use crate::error::{ChatError, ImportError};
use crate::manager::SessionStore;
use crate::models::{ChatMessage, CompletionClient};
use crate::session::{Message, DEFAULT_SYSTEM_MESSAGE};

pub const SEND_FAILURE_MESSAGE: &str = "Sorry, there was an error processing your request.";

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// There was no active chat to send to.
    NoActiveChat,
    Completed(Message),
    /// The completion client failed; the fallback message was appended instead.
    Failed(Message),
}

impl SendOutcome {
    pub fn reply(&self) -> Option<&Message> {
        match self {
            SendOutcome::NoActiveChat => None,
            SendOutcome::Completed(m) | SendOutcome::Failed(m) => Some(m),
        }
    }
}

/// Drives user turns against the active chat.
pub struct ChatEngine {
    sessions: Arc<SessionStore>,
    client: Arc<dyn CompletionClient>,
    in_flight: Mutex<HashSet<String>>,
    loading: watch::Sender<bool>,
}

/// Marks a chat as sending until dropped.
struct InFlight<'a> {
    engine: &'a ChatEngine,
    chat_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.engine.in_flight();
        in_flight.remove(&self.chat_id);
        let busy = !in_flight.is_empty();
        drop(in_flight);
        self.engine.set_loading(busy);
    }
}

impl ChatEngine {
    pub fn new(sessions: Arc<SessionStore>, client: Arc<dyn CompletionClient>) -> Self {
        let (loading, _rx) = watch::channel(false);
        Self { sessions, client, in_flight: Mutex::new(HashSet::new()), loading }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> { &self.sessions }

    /// True while any chat has a send outstanding.
    pub fn loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    pub fn is_sending(&self, chat_id: &str) -> bool {
        self.in_flight().contains(chat_id)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.sessions.get_active_chat().map(|c| c.messages).unwrap_or_default()
    }

    pub fn system_message(&self) -> String {
        self.sessions
            .get_active_chat()
            .map(|c| c.system_message)
            .unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string())
    }

    pub fn update_system_message(&self, content: &str) -> Result<(), ChatError> {
        if let Some(chat) = self.sessions.get_active_chat() {
            self.sessions.update_system_message(&chat.id, content)?;
        }
        Ok(())
    }

    /// Sends `content` as a user turn of the active chat and appends the
    /// reply. Completion failures become a fallback assistant message; only
    /// storage errors and a concurrent send to the same chat are returned.
    pub async fn send_message(&self, content: &str) -> Result<SendOutcome, ChatError> {
        let Some(chat) = self.sessions.get_active_chat() else {
            return Ok(SendOutcome::NoActiveChat);
        };
        let _guard = self.begin(&chat.id)?;

        let mut messages = chat.messages;
        messages.push(Message::user(content));
        self.sessions.update_chat_messages(&chat.id, messages.clone())?;
        self.set_loading(true);

        let history: Vec<ChatMessage> = messages.iter().map(ChatMessage::from).collect();
        let params = chat.openai_parameters;
        let outcome = match self.client.generate(&history, &params).await {
            Ok(completion) => {
                info!(
                    chat_id = %chat.id,
                    model = %params.model,
                    total_tokens = completion.token_usage.total_tokens,
                    "completion received"
                );
                SendOutcome::Completed(
                    Message::assistant(completion.content)
                        .with_model(params.model.clone())
                        .with_token_usage(completion.token_usage),
                )
            }
            Err(e) => {
                error!(chat_id = %chat.id, error = %e, "completion failed");
                SendOutcome::Failed(Message::assistant(SEND_FAILURE_MESSAGE))
            }
        };

        if let Some(reply) = outcome.reply() {
            messages.push(reply.clone());
        }
        self.sessions.update_chat_messages(&chat.id, messages)?;
        Ok(outcome)
    }

    /// Resets the active chat to a single default system message.
    pub fn clear_chat(&self) -> Result<(), ChatError> {
        if let Some(chat) = self.sessions.get_active_chat() {
            self.sessions
                .update_chat_messages(&chat.id, vec![Message::system(DEFAULT_SYSTEM_MESSAGE)])?;
        }
        Ok(())
    }

    pub fn export_chat(&self) -> Result<String, serde_json::Error> {
        transfer::export_chat(&self.sessions)
    }

    pub fn import_chat(&self, payload: &str) -> Result<(), ImportError> {
        transfer::import_chat(&self.sessions, payload)
    }

    fn begin(&self, chat_id: &str) -> Result<InFlight<'_>, ChatError> {
        let mut in_flight = self.in_flight();
        if !in_flight.insert(chat_id.to_string()) {
            return Err(ChatError::SendInProgress(chat_id.to_string()));
        }
        Ok(InFlight { engine: self, chat_id: chat_id.to_string() })
    }

    /// Notifies subscribers only when the flag actually flips.
    fn set_loading(&self, busy: bool) {
        self.loading.send_if_modified(|current| {
            let changed = *current != busy;
            *current = busy;
            changed
        });
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}
