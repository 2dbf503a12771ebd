//! Session tracking: stable session identity plus per-session usage
//! counters.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use casc_domain::trace::Session;

/// A single tracked session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session: Session,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub turns: u64,
}

/// In-process session table keyed by session id.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the session, creating it (with a fresh trace) on first use.
    pub fn resolve(&self, session_id: &str) -> Session {
        if let Some(entry) = self.sessions.read().get(session_id) {
            return entry.session.clone();
        }
        let mut sessions = self.sessions.write();
        let entry = sessions.entry(session_id.to_string()).or_insert_with(|| {
            let now = Utc::now();
            SessionEntry {
                session: Session::new(session_id),
                created_at: now,
                updated_at: now,
                input_tokens: 0,
                output_tokens: 0,
                total_tokens: 0,
                turns: 0,
            }
        });
        entry.session.clone()
    }

    /// Record one run's usage against a session.
    pub fn record_usage(&self, session_id: &str, input_tokens: u64, output_tokens: u64, turns: u64) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.input_tokens += input_tokens;
            entry.output_tokens += output_tokens;
            entry.total_tokens += input_tokens + output_tokens;
            entry.turns += turns;
            entry.updated_at = Utc::now();
        }
    }

    /// Attach the vendor-assigned conversation id once known.
    pub fn set_conversation_id(&self, session_id: &str, conversation_id: impl Into<String>) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.session.conversation_id = Some(conversation_id.into());
            entry.updated_at = Utc::now();
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_stable() {
        let store = SessionStore::new();
        let first = store.resolve("s1");
        let second = store.resolve("s1");
        assert_eq!(first.trace.trace_id, second.trace.trace_id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn usage_accumulates() {
        let store = SessionStore::new();
        store.resolve("s1");
        store.record_usage("s1", 10, 5, 1);
        store.record_usage("s1", 2, 3, 2);
        let entry = store.get("s1").unwrap();
        assert_eq!(entry.input_tokens, 12);
        assert_eq!(entry.output_tokens, 8);
        assert_eq!(entry.total_tokens, 20);
        assert_eq!(entry.turns, 3);
    }

    #[test]
    fn conversation_id_attaches() {
        let store = SessionStore::new();
        store.resolve("s1");
        store.set_conversation_id("s1", "conv_99");
        assert_eq!(
            store.get("s1").unwrap().session.conversation_id.as_deref(),
            Some("conv_99")
        );
    }

    #[test]
    fn remove_unknown_is_false() {
        let store = SessionStore::new();
        assert!(!store.remove("nope"));
    }
}
