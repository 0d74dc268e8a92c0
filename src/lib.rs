pub mod chat;
pub mod config;
pub mod error;
pub mod history;
pub mod manager;
pub mod migrate;
pub mod models;
pub mod session;
pub mod settings;
pub mod storage;

pub use chat::{ChatEngine, SendOutcome};
pub use config::ConfigService;
pub use error::{ChatError, ImportError, StorageError};
pub use manager::SessionStore;
pub use models::{ChatMessage, Completion, CompletionClient, OpenAICompatible};
pub use session::{Chat, ChatList, Message, Role, TokenUsage};
pub use settings::{AppConfig, AppConfigPatch, OpenAIParameters};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
