//! Conversation history stores and session usage tracking.

pub mod history;
pub mod store;

pub use history::{HistoryStore, InMemoryHistory, JsonlHistory, StoredMessage};
pub use store::{SessionEntry, SessionStore};
