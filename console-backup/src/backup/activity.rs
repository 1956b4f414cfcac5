use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub level: ActivityLevel,
    pub message: String,
}

/// Cumulative, timestamped operator log for one backup or restore run.
///
/// Every entry is also written to the `log` facade under `tag`, and fanned out
/// to live subscribers. A subscriber whose channel is full or closed is
/// dropped.
pub struct ActivityLog {
    tag: &'static str,
    entries: Mutex<Vec<ActivityEntry>>,
    subscribers: DashMap<String, mpsc::Sender<ActivityEntry>>,
}

impl ActivityLog {
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            entries: Mutex::new(Vec::new()),
            subscribers: DashMap::new(),
        }
    }

    /// Subscribe to live entries and return (subscriber_id, receiver)
    pub fn subscribe(&self) -> (String, mpsc::Receiver<ActivityEntry>) {
        let subscriber_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(100);
        self.subscribers.insert(subscriber_id.clone(), tx);
        (subscriber_id, rx)
    }

    pub fn unsubscribe(&self, subscriber_id: &str) {
        self.subscribers.remove(subscriber_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(ActivityLevel::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(ActivityLevel::Success, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(ActivityLevel::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(ActivityLevel::Error, message.into());
    }

    pub fn push(&self, level: ActivityLevel, message: String) {
        match level {
            ActivityLevel::Info | ActivityLevel::Success => log::info!("{} {}", self.tag, message),
            ActivityLevel::Warning => log::warn!("{} {}", self.tag, message),
            ActivityLevel::Error => log::error!("{} {}", self.tag, message),
        }

        let entry = ActivityEntry {
            timestamp: Utc::now(),
            level,
            message,
        };

        let mut closed = Vec::new();
        for subscriber in self.subscribers.iter() {
            if subscriber.value().try_send(entry.clone()).is_err() {
                closed.push(subscriber.key().clone());
            }
        }
        for subscriber_id in closed {
            self.subscribers.remove(&subscriber_id);
            log::debug!("{} Dropped activity subscriber {}", self.tag, subscriber_id);
        }

        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    /// Copy of everything logged so far.
    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, level: ActivityLevel) -> usize {
        self.entries
            .lock()
            .map(|e| e.iter().filter(|entry| entry.level == level).count())
            .unwrap_or(0)
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new("[Activity]")
    }
}
