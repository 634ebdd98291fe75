//! Durable bot state.
//!
//! Everything the bot must remember across restarts lives in one JSON
//! document: tracked interrupts, per-user conversation state, and the time
//! of the last successful poll. The whole aggregate is rewritten through a
//! temp-file rename on every mutation, so the file on disk is always a
//! complete document.
//!
//! ```text
//! {
//!   "interrupts":   { "<thread_id>": { data, status, timestamp, message_id, chat_id } },
//!   "user_state":   { "<user_id>": { "<key>": <value> } },
//!   "last_checked": "2025-06-05T14:30:00Z",
//!   "version": 1
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::Result;

/// Format version stamped into fresh state files.
const STATE_VERSION: u32 = 1;

// ─── State Types ─────────────────────────────────────────────────────────────

/// Lifecycle of a tracked interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptStatus {
    /// Known locally, not yet delivered to the chat.
    Pending,
    /// Delivered as a chat message.
    Sent,
    /// A typed reply from the user is expected.
    AwaitingResponse,
    /// Resolved; kept until explicitly removed.
    Completed,
}

/// A tracked interrupt and its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptRecord {
    /// Opaque payload supplied by the caller. The store never looks inside.
    pub data: Value,

    pub status: InterruptStatus,

    /// When the record was created. Not touched by later updates.
    pub timestamp: DateTime<Utc>,

    /// Chat message carrying this interrupt, once delivered.
    pub message_id: Option<i32>,

    /// Chat the message went to, once delivered.
    pub chat_id: Option<i64>,
}

/// The persisted aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BotState {
    interrupts: HashMap<String, InterruptRecord>,
    user_state: HashMap<String, HashMap<String, Value>>,
    last_checked: Option<DateTime<Utc>>,
    version: u32,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            interrupts: HashMap::new(),
            user_state: HashMap::new(),
            last_checked: None,
            version: STATE_VERSION,
        }
    }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// File-backed store shared across bot tasks.
///
/// All operations take `&self`; reads and read-modify-write-persist cycles
/// serialize through one internal lock, so concurrent callers never
/// interleave a mutation with a write-out.
pub struct StateStore {
    path: PathBuf,
    state: Mutex<BotState>,
}

impl StateStore {
    /// Open the store, loading persisted state when present.
    ///
    /// A missing file starts empty. An unreadable or corrupt file is logged
    /// and replaced with a fresh aggregate; the bot keeps running either way.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = load_or_default(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BotState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Serialize the aggregate and swap it into place.
    fn persist(&self, state: &BotState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(state)?;

        // Write to temp file first
        let temp = self.path.with_extension("tmp");
        fs::write(&temp, &contents)?;

        // Atomic rename - prevents a half-written file if the process dies mid-write
        fs::rename(&temp, &self.path)?;
        Ok(())
    }

    // ─── Interrupts ──────────────────────────────────────────────────────────

    /// Create or overwrite the record for a thread.
    ///
    /// Always resets to `Pending` with a fresh timestamp and empty delivery
    /// fields, so re-adding a known thread restarts its lifecycle.
    pub fn add_interrupt(&self, thread_id: &str, data: Value) -> Result<()> {
        let mut state = self.lock();
        state.interrupts.insert(
            thread_id.to_string(),
            InterruptRecord {
                data,
                status: InterruptStatus::Pending,
                timestamp: Utc::now(),
                message_id: None,
                chat_id: None,
            },
        );
        self.persist(&state)
    }

    pub fn get_interrupt(&self, thread_id: &str) -> Option<InterruptRecord> {
        self.lock().interrupts.get(thread_id).cloned()
    }

    pub fn all_interrupts(&self) -> HashMap<String, InterruptRecord> {
        self.lock().interrupts.clone()
    }

    pub fn pending_interrupts(&self) -> HashMap<String, InterruptRecord> {
        self.interrupts_with_status(InterruptStatus::Pending)
    }

    pub fn awaiting_response_interrupts(&self) -> HashMap<String, InterruptRecord> {
        self.interrupts_with_status(InterruptStatus::AwaitingResponse)
    }

    fn interrupts_with_status(&self, status: InterruptStatus) -> HashMap<String, InterruptRecord> {
        self.lock()
            .interrupts
            .iter()
            .filter(|(_, record)| record.status == status)
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Update delivery state for a thread. Unknown threads are quietly
    /// ignored so a stale button press cannot fail. `message_id` and
    /// `chat_id` overwrite only when given; `None` leaves the stored value.
    pub fn update_interrupt_status(
        &self,
        thread_id: &str,
        status: InterruptStatus,
        message_id: Option<i32>,
        chat_id: Option<i64>,
    ) -> Result<()> {
        let mut state = self.lock();
        let Some(record) = state.interrupts.get_mut(thread_id) else {
            return Ok(());
        };
        record.status = status;
        if let Some(id) = message_id {
            record.message_id = Some(id);
        }
        if let Some(id) = chat_id {
            record.chat_id = Some(id);
        }
        self.persist(&state)
    }

    /// Remove a thread's record. Removing an absent id is a no-op and does
    /// not touch the file.
    pub fn remove_interrupt(&self, thread_id: &str) -> Result<()> {
        let mut state = self.lock();
        if state.interrupts.remove(thread_id).is_none() {
            return Ok(());
        }
        self.persist(&state)
    }

    // ─── User State ──────────────────────────────────────────────────────────

    /// Set one key in a user's conversation state, creating the user's map
    /// on first write.
    pub fn set_user_state(&self, user_id: u64, key: &str, value: Value) -> Result<()> {
        let mut state = self.lock();
        state
            .user_state
            .entry(user_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        self.persist(&state)
    }

    pub fn get_user_state(&self, user_id: u64, key: &str) -> Option<Value> {
        self.lock()
            .user_state
            .get(&user_id.to_string())
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    pub fn get_user_state_or(&self, user_id: u64, key: &str, default: Value) -> Value {
        self.get_user_state(user_id, key).unwrap_or(default)
    }

    /// Reset a user's conversation state to empty. Unknown users are a
    /// no-op without touching the file.
    pub fn clear_user_state(&self, user_id: u64) -> Result<()> {
        let mut state = self.lock();
        let Some(entries) = state.user_state.get_mut(&user_id.to_string()) else {
            return Ok(());
        };
        entries.clear();
        self.persist(&state)
    }

    // ─── Poll Bookkeeping ────────────────────────────────────────────────────

    /// Record that a poll completed now.
    pub fn touch_last_checked(&self) -> Result<()> {
        let mut state = self.lock();
        state.last_checked = Some(Utc::now());
        self.persist(&state)
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.lock().last_checked
    }
}

fn load_or_default(path: &Path) -> BotState {
    if !path.exists() {
        return BotState::default();
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!("Could not read state file {} ({e}), starting fresh", path.display());
            return BotState::default();
        }
    };
    match serde_json::from_str(&contents) {
        Ok(state) => state,
        Err(e) => {
            warn!("State file {} is corrupt ({e}), starting fresh", path.display());
            BotState::default()
        }
    }
}
