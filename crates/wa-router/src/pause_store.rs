//! Per-tenant conversation pause state.
//!
//! Lives next to the session directory (never inside it) so a session wipe
//! keeps the tenant's pauses. Every mutation is persisted before it becomes
//! visible in memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use wa_core::{current_unix_timestamp_ms, load_json_or_default, write_json_atomic};
use wa_session::tenant_state_dir;

pub const CONVERSATION_PAUSES_FILE_NAME: &str = "conversation-pauses.json";
const CONVERSATION_PAUSES_SCHEMA_VERSION: u32 = 1;

fn conversation_pauses_schema_version() -> u32 {
    CONVERSATION_PAUSES_SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `ConversationPauseFile` persisted per tenant.
pub struct ConversationPauseFile {
    #[serde(default = "conversation_pauses_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub global_paused_unix_ms: Option<u64>,
    /// Conversation key to the unix ms it was paused at.
    #[serde(default)]
    pub paused_conversations: BTreeMap<String, u64>,
}

impl Default for ConversationPauseFile {
    fn default() -> Self {
        Self {
            schema_version: CONVERSATION_PAUSES_SCHEMA_VERSION,
            global_paused_unix_ms: None,
            paused_conversations: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct ConversationPauseStore {
    path: PathBuf,
    state: Mutex<ConversationPauseFile>,
}

impl ConversationPauseStore {
    pub fn load(path: PathBuf) -> Result<Self> {
        let state = load_json_or_default(&path)?;
        Ok(Self::with_state(path, state))
    }

    /// Empty store that will overwrite whatever is at `path` on first change.
    pub fn empty(path: PathBuf) -> Self {
        Self::with_state(path, ConversationPauseFile::default())
    }

    fn with_state(path: PathBuf, state: ConversationPauseFile) -> Self {
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path_for_tenant(state_dir: &Path, tenant_id: &str) -> PathBuf {
        tenant_state_dir(state_dir, tenant_id).join(CONVERSATION_PAUSES_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&ConversationPauseFile) -> T) -> T {
        match self.state.lock() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    /// Applies `change` to a copy, persists the copy, then publishes it.
    fn update<T>(&self, change: impl FnOnce(&mut ConversationPauseFile) -> T) -> Result<T> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = state.clone();
        let result = change(&mut next);
        if next != *state {
            write_json_atomic(&self.path, &next)?;
            *state = next;
        }
        Ok(result)
    }

    /// True when the conversation or the whole tenant is paused.
    pub fn is_paused(&self, conversation: &str) -> bool {
        self.read(|state| {
            state.global_paused_unix_ms.is_some()
                || state.paused_conversations.contains_key(conversation)
        })
    }

    pub fn is_conversation_paused(&self, conversation: &str) -> bool {
        self.read(|state| state.paused_conversations.contains_key(conversation))
    }

    pub fn is_globally_paused(&self) -> bool {
        self.read(|state| state.global_paused_unix_ms.is_some())
    }

    pub fn paused_conversation_count(&self) -> usize {
        self.read(|state| state.paused_conversations.len())
    }

    /// Returns false when the conversation was already paused.
    pub fn pause_conversation(&self, conversation: &str) -> Result<bool> {
        self.update(|state| {
            if state.paused_conversations.contains_key(conversation) {
                return false;
            }
            state
                .paused_conversations
                .insert(conversation.to_string(), current_unix_timestamp_ms());
            true
        })
    }

    /// Returns false when the conversation was not paused.
    pub fn resume_conversation(&self, conversation: &str) -> Result<bool> {
        self.update(|state| state.paused_conversations.remove(conversation).is_some())
    }

    /// Returns false when the tenant was already globally paused.
    pub fn pause_all(&self) -> Result<bool> {
        self.update(|state| {
            if state.global_paused_unix_ms.is_some() {
                return false;
            }
            state.global_paused_unix_ms = Some(current_unix_timestamp_ms());
            true
        })
    }

    /// Clears the global pause and every conversation pause. Returns how many
    /// pauses were removed.
    pub fn resume_all(&self) -> Result<usize> {
        self.update(|state| {
            let cleared = state.paused_conversations.len()
                + usize::from(state.global_paused_unix_ms.is_some());
            state.paused_conversations.clear();
            state.global_paused_unix_ms = None;
            cleared
        })
    }
}
