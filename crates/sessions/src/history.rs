//! Conversation history stores.
//!
//! Append-only, per-user, capped, optionally age-filtered. The
//! contract is identical for every backend: chronological reads,
//! oldest-first eviction at capacity, and no partial writes visible to
//! concurrent readers.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use casc_domain::error::{Error, Result};
use casc_domain::message::Message;

/// A message plus its storage timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub timestamp: DateTime<Utc>,
    pub message: Message,
}

/// Conversation history contract shared by every backend.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one message to a user's log.
    async fn add(&self, user_id: &str, message: Message) -> Result<()>;

    /// Read a user's history in chronological order. `max_messages`
    /// keeps the most recent N; `max_age`, when set, drops entries
    /// older than the window.
    async fn get(
        &self,
        user_id: &str,
        max_messages: usize,
        max_age: Option<Duration>,
    ) -> Result<Vec<Message>>;

    /// Drop a user's entire history.
    async fn clear(&self, user_id: &str) -> Result<()>;

    /// Remove every entry older than `max_age`, across all users.
    /// Returns the number of removed messages.
    async fn cleanup_expired(&self, max_age: Duration) -> Result<usize>;
}

fn cutoff(max_age: Duration) -> DateTime<Utc> {
    Utc::now() - max_age
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory history with a per-user capacity cap.
pub struct InMemoryHistory {
    capacity: usize,
    users: RwLock<HashMap<String, VecDeque<StoredMessage>>>,
}

impl InMemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            users: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn add(&self, user_id: &str, message: Message) -> Result<()> {
        let mut users = self.users.write();
        let log = users.entry(user_id.to_string()).or_default();
        if log.len() >= self.capacity {
            log.pop_front(); // oldest first
        }
        log.push_back(StoredMessage {
            timestamp: Utc::now(),
            message,
        });
        Ok(())
    }

    async fn get(
        &self,
        user_id: &str,
        max_messages: usize,
        max_age: Option<Duration>,
    ) -> Result<Vec<Message>> {
        let users = self.users.read();
        let Some(log) = users.get(user_id) else {
            return Ok(Vec::new());
        };
        let floor = max_age.map(cutoff);
        let fresh: Vec<&StoredMessage> = log
            .iter()
            .filter(|entry| floor.map_or(true, |f| entry.timestamp >= f))
            .collect();
        let skip = fresh.len().saturating_sub(max_messages);
        Ok(fresh
            .into_iter()
            .skip(skip)
            .map(|entry| entry.message.clone())
            .collect())
    }

    async fn clear(&self, user_id: &str) -> Result<()> {
        self.users.write().remove(user_id);
        Ok(())
    }

    async fn cleanup_expired(&self, max_age: Duration) -> Result<usize> {
        let floor = cutoff(max_age);
        let mut removed = 0usize;
        let mut users = self.users.write();
        for log in users.values_mut() {
            let before = log.len();
            log.retain(|entry| entry.timestamp >= floor);
            removed += before - log.len();
        }
        users.retain(|_, log| !log.is_empty());
        Ok(removed)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSONL backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// File-backed history: one append-only `<user>.jsonl` per user.
///
/// Writes go through a store-wide lock so a reader never observes a
/// half-written line set during rewrites.
pub struct JsonlHistory {
    base_dir: PathBuf,
    capacity: usize,
    io: Mutex<()>,
}

impl JsonlHistory {
    pub fn new(base_dir: &Path, capacity: usize) -> Result<Self> {
        std::fs::create_dir_all(base_dir).map_err(Error::Io)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            capacity: capacity.max(1),
            io: Mutex::new(()),
        })
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        let safe: String = user_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base_dir.join(format!("{safe}.jsonl"))
    }

    fn read_lines(&self, path: &Path) -> Result<Vec<StoredMessage>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        let mut entries = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredMessage>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed history line");
                }
            }
        }
        Ok(entries)
    }

    fn write_lines(&self, path: &Path, entries: &[StoredMessage]) -> Result<()> {
        if entries.is_empty() {
            if path.exists() {
                std::fs::remove_file(path).map_err(Error::Io)?;
            }
            return Ok(());
        }
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        std::fs::write(path, buf).map_err(Error::Io)
    }
}

#[async_trait]
impl HistoryStore for JsonlHistory {
    async fn add(&self, user_id: &str, message: Message) -> Result<()> {
        let _guard = self.io.lock();
        let path = self.path_for(user_id);
        let mut entries = self.read_lines(&path)?;
        entries.push(StoredMessage {
            timestamp: Utc::now(),
            message,
        });
        // Capacity cap, oldest first.
        let overflow = entries.len().saturating_sub(self.capacity);
        if overflow > 0 {
            entries.drain(..overflow);
        }
        self.write_lines(&path, &entries)
    }

    async fn get(
        &self,
        user_id: &str,
        max_messages: usize,
        max_age: Option<Duration>,
    ) -> Result<Vec<Message>> {
        let _guard = self.io.lock();
        let entries = self.read_lines(&self.path_for(user_id))?;
        let floor = max_age.map(cutoff);
        let fresh: Vec<StoredMessage> = entries
            .into_iter()
            .filter(|entry| floor.map_or(true, |f| entry.timestamp >= f))
            .collect();
        let skip = fresh.len().saturating_sub(max_messages);
        Ok(fresh.into_iter().skip(skip).map(|e| e.message).collect())
    }

    async fn clear(&self, user_id: &str) -> Result<()> {
        let _guard = self.io.lock();
        let path = self.path_for(user_id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(Error::Io)?;
        }
        Ok(())
    }

    async fn cleanup_expired(&self, max_age: Duration) -> Result<usize> {
        let _guard = self.io.lock();
        let floor = cutoff(max_age);
        let mut removed = 0usize;
        let dir = std::fs::read_dir(&self.base_dir).map_err(Error::Io)?;
        for entry in dir {
            let path = entry.map_err(Error::Io)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let entries = self.read_lines(&path)?;
            let kept: Vec<StoredMessage> = entries
                .iter()
                .filter(|e| e.timestamp >= floor)
                .cloned()
                .collect();
            removed += entries.len() - kept.len();
            self.write_lines(&path, &kept)?;
        }
        Ok(removed)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
