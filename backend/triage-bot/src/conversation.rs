//! Per-(user, chat) conversation state.
//!
//! A submitter whose proof was accepted is asked for a short incident
//! description; their next text message in the same chat is that
//! description. State lives in memory only and is lost on restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::project::Project;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub user_id: i64,
    pub chat_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingDescription,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingDescription { project: Project },
}

impl ConversationState {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::AwaitingDescription { .. } => Phase::AwaitingDescription,
        }
    }

    #[cfg(test)]
    pub fn pending_project(&self) -> Option<&Project> {
        match self {
            Self::Idle => None,
            Self::AwaitingDescription { project } => Some(project),
        }
    }
}

/// In-memory conversation table. Idle keys have no entry.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    inner: Arc<Mutex<HashMap<ConversationKey, ConversationState>>>,
}

/// Puts the working state back into the table when dropped, including
/// while unwinding out of a panicking mutation.
struct WriteBack<'a> {
    table: &'a mut HashMap<ConversationKey, ConversationState>,
    key: ConversationKey,
    state: ConversationState,
}

impl Drop for WriteBack<'_> {
    fn drop(&mut self) {
        match std::mem::take(&mut self.state) {
            ConversationState::Idle => {
                self.table.remove(&self.key);
            }
            state => {
                self.table.insert(self.key, state);
            }
        }
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the state for `key`, let `mutate` change it, and persist the
    /// result on every exit path.
    pub fn transaction<R>(
        &self,
        key: ConversationKey,
        mutate: impl FnOnce(&mut ConversationState) -> R,
    ) -> R {
        let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let state = table.remove(&key).unwrap_or_default();
        let mut write_back = WriteBack {
            table: &mut *table,
            key,
            state,
        };
        mutate(&mut write_back.state)
    }

    /// Move `key` to `AwaitingDescription` for `project`.
    ///
    /// Returns the project of a still-pending earlier submission that this
    /// call replaced, if any.
    pub fn begin_description(&self, key: ConversationKey, project: Project) -> Option<Project> {
        self.transaction(key, |state| {
            match std::mem::replace(state, ConversationState::AwaitingDescription { project }) {
                ConversationState::Idle => None,
                ConversationState::AwaitingDescription { project } => Some(project),
            }
        })
    }

    /// Move `key` back to `Idle`, returning the project that was waiting for
    /// a description. `None` if the key was already idle.
    pub fn take_pending(&self, key: ConversationKey) -> Option<Project> {
        self.transaction(key, |state| match std::mem::take(state) {
            ConversationState::Idle => None,
            ConversationState::AwaitingDescription { project } => Some(project),
        })
    }

    pub fn phase(&self, key: ConversationKey) -> Phase {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .map_or(Phase::Idle, ConversationState::phase)
    }

    /// Number of keys currently mid-conversation.
    pub fn active(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
impl ConversationStore {
    pub fn get(&self, key: ConversationKey) -> ConversationState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }
}
