//! Sliding-window flood detection per user.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Detects message floods: more than `max_messages` within `window`
/// marks the user as flooding until the window slides past.
pub struct FloodDetector {
    window: Duration,
    max_messages: usize,
    timestamps: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl FloodDetector {
    pub fn new(window: Duration, max_messages: usize) -> Self {
        Self {
            window,
            max_messages: max_messages.max(1),
            timestamps: Mutex::new(HashMap::new()),
        }
    }

    /// Record one inbound message and report whether the user is now
    /// flooding.
    pub fn record(&self, user_id: &str) -> bool {
        let now = Instant::now();
        let mut users = self.timestamps.lock();
        let stamps = users.entry(user_id.to_string()).or_default();
        Self::prune(stamps, now, self.window);
        stamps.push_back(now);
        stamps.len() >= self.max_messages
    }

    /// Whether the user is currently flooding. Prunes expired entries,
    /// so a quiet user decays back to zero.
    pub fn is_flooding(&self, user_id: &str) -> bool {
        let now = Instant::now();
        let mut users = self.timestamps.lock();
        let Some(stamps) = users.get_mut(user_id) else {
            return false;
        };
        Self::prune(stamps, now, self.window);
        if stamps.is_empty() {
            users.remove(user_id);
            return false;
        }
        stamps.len() >= self.max_messages
    }

    /// Messages currently counted inside the window for a user.
    pub fn message_count(&self, user_id: &str) -> usize {
        let now = Instant::now();
        let mut users = self.timestamps.lock();
        match users.get_mut(user_id) {
            Some(stamps) => {
                Self::prune(stamps, now, self.window);
                stamps.len()
            }
            None => 0,
        }
    }

    /// Forget a user entirely.
    pub fn reset(&self, user_id: &str) {
        self.timestamps.lock().remove(user_id);
    }

    fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while stamps
            .front()
            .is_some_and(|t| now.duration_since(*t) > window)
        {
            stamps.pop_front();
        }
    }
}
