pub mod engine;
pub mod transfer;

pub use engine::{ChatEngine, SendOutcome, SEND_FAILURE_MESSAGE};
pub use transfer::{export_chat, import_chat};
