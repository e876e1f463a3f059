//! In-memory forge for tests and `--dry-run`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Forge, OpenChangeRequest};
use crate::domain::error::{GateError, Result};

/// A stored status message or comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: u64,
    pub body: String,
}

/// A stored issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIssue {
    pub number: u64,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct ForgeState {
    next_id: u64,
    messages: BTreeMap<u64, Vec<StoredMessage>>,
    issues: Vec<StoredIssue>,
    open: BTreeMap<u64, OpenChangeRequest>,
}

/// Forge backed by in-process maps.
///
/// `set_failing(true)` makes every call fail with `GateError::Forge`, which
/// is how tests simulate an unavailable platform.
#[derive(Debug, Default)]
pub struct MemoryForge {
    state: Mutex<ForgeState>,
    failing: AtomicBool,
}

impl MemoryForge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open change request whose head is `head_commit`.
    pub fn add_open_change_request(&self, id: u64, head_commit: impl Into<String>) {
        self.lock()
            .open
            .insert(id, OpenChangeRequest::new(id, head_commit));
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self, change_request: u64) -> Vec<StoredMessage> {
        self.lock()
            .messages
            .get(&change_request)
            .cloned()
            .unwrap_or_default()
    }

    pub fn issues(&self) -> Vec<StoredIssue> {
        self.lock().issues.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ForgeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GateError::Forge("forge unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Forge for MemoryForge {
    async fn find_message(&self, change_request: u64, marker: &str) -> Result<Option<u64>> {
        self.check_available()?;
        Ok(self
            .lock()
            .messages
            .get(&change_request)
            .and_then(|msgs| msgs.iter().filter(|m| m.body.contains(marker)).map(|m| m.id).max()))
    }

    async fn create_message(&self, change_request: u64, body: &str) -> Result<u64> {
        self.check_available()?;
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state
            .messages
            .entry(change_request)
            .or_default()
            .push(StoredMessage {
                id,
                body: body.to_string(),
            });
        Ok(id)
    }

    async fn update_message(&self, change_request: u64, message_id: u64, body: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.lock();
        let message = state
            .messages
            .get_mut(&change_request)
            .and_then(|msgs| msgs.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(|| {
                GateError::Forge(format!(
                    "message {message_id} not found on change request {change_request}"
                ))
            })?;
        message.body = body.to_string();
        Ok(())
    }

    async fn open_issue(&self, title: &str, body: &str) -> Result<u64> {
        self.check_available()?;
        let mut state = self.lock();
        let number = state.issues.len() as u64 + 1;
        state.issues.push(StoredIssue {
            number,
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(number)
    }

    async fn open_change_requests(&self) -> Result<Vec<OpenChangeRequest>> {
        self.check_available()?;
        Ok(self.lock().open.values().cloned().collect())
    }
}
