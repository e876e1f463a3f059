//! Change-request notifications.
//!
//! The [`Forge`] trait abstracts the code-hosting platform (status messages,
//! issues, open change requests). [`Notifier`] layers idempotent
//! post-or-update on top of it: one status message per change request,
//! located by a hidden marker and edited in place on later runs.
//!
//! Notification failures never propagate. They are logged, counted and
//! reported as [`NotificationStatus::Degraded`].

pub mod github;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::change_request::ChangeRequest;
use crate::domain::error::Result;
use crate::metrics::METRICS;
use crate::obs;

pub use github::GitHubForge;
pub use memory::MemoryForge;

/// Hidden marker embedded in every status message.
pub const STATUS_MARKER: &str = "<!-- gatekeep:status -->";

/// Code-hosting platform operations used by the gate.
#[async_trait]
pub trait Forge: Send + Sync {
    /// Newest message on `change_request` whose body contains `marker`.
    async fn find_message(&self, change_request: u64, marker: &str) -> Result<Option<u64>>;

    /// Post a new message and return its id.
    async fn create_message(&self, change_request: u64, body: &str) -> Result<u64>;

    /// Replace the body of an existing message.
    async fn update_message(&self, change_request: u64, message_id: u64, body: &str)
        -> Result<()>;

    /// Open an issue and return its number.
    async fn open_issue(&self, title: &str, body: &str) -> Result<u64>;

    /// All open change requests with their current heads.
    async fn open_change_requests(&self) -> Result<Vec<OpenChangeRequest>>;
}

/// An open change request as reported by the forge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenChangeRequest {
    pub id: u64,
    pub head_commit: String,
    /// Remote ref carrying the head, fetched when the commit is not local.
    pub head_ref: String,
}

impl OpenChangeRequest {
    pub fn new(id: u64, head_commit: impl Into<String>) -> Self {
        Self {
            id,
            head_commit: head_commit.into(),
            head_ref: format!("refs/pull/{id}/head"),
        }
    }
}

/// Result of a notification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NotificationStatus {
    Posted { message_id: u64 },
    Updated { message_id: u64 },
    /// Nothing to notify (e.g. integration-branch flow).
    Skipped,
    Degraded { error: String },
}

impl NotificationStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, NotificationStatus::Degraded { .. })
    }
}

/// Idempotent status reporting on top of a [`Forge`].
#[derive(Clone)]
pub struct Notifier {
    forge: Arc<dyn Forge>,
}

impl Notifier {
    pub fn new(forge: Arc<dyn Forge>) -> Self {
        Self { forge }
    }

    pub fn forge(&self) -> &Arc<dyn Forge> {
        &self.forge
    }

    /// Post the status message for `cr`, or update it if one exists.
    ///
    /// The message id is remembered on the change request. An existing
    /// message is found by id first, then by [`STATUS_MARKER`]. A failed
    /// update is not retried as a create, so a flaky forge cannot produce
    /// duplicate messages.
    pub async fn post_or_update(&self, cr: &mut ChangeRequest, body: &str) -> NotificationStatus {
        let body = if body.contains(STATUS_MARKER) {
            body.to_string()
        } else {
            format!("{STATUS_MARKER}\n{body}")
        };

        match self.upsert(cr, &body).await {
            Ok(status) => status,
            Err(err) => self.degraded(cr.id, err),
        }
    }

    async fn upsert(&self, cr: &mut ChangeRequest, body: &str) -> Result<NotificationStatus> {
        let existing = match cr.status_message_id {
            Some(id) => Some(id),
            None => self.forge.find_message(cr.id, STATUS_MARKER).await?,
        };

        match existing {
            Some(message_id) => {
                debug!(change_request = cr.id, message_id, "updating status message");
                self.forge.update_message(cr.id, message_id, body).await?;
                cr.status_message_id = Some(message_id);
                Ok(NotificationStatus::Updated { message_id })
            }
            None => {
                let message_id = self.forge.create_message(cr.id, body).await?;
                debug!(change_request = cr.id, message_id, "posted status message");
                cr.status_message_id = Some(message_id);
                Ok(NotificationStatus::Posted { message_id })
            }
        }
    }

    /// Post a one-off message (no marker, never updated).
    pub async fn post(&self, change_request: u64, body: &str) -> NotificationStatus {
        match self.forge.create_message(change_request, body).await {
            Ok(message_id) => NotificationStatus::Posted { message_id },
            Err(err) => self.degraded(change_request, err),
        }
    }

    fn degraded(&self, change_request: u64, err: crate::domain::error::GateError) -> NotificationStatus {
        obs::emit_notification_degraded(change_request, &err);
        METRICS.inc_notifications_degraded();
        NotificationStatus::Degraded {
            error: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cr(id: u64) -> ChangeRequest {
        ChangeRequest::new(id, format!("refs/pull/{id}/head"), "dmz", "abc1234")
    }

    #[tokio::test]
    async fn second_post_updates_in_place() {
        let forge = Arc::new(MemoryForge::new());
        let notifier = Notifier::new(forge.clone());
        let mut change = cr(7);

        let first = notifier.post_or_update(&mut change, "validating").await;
        let second = notifier.post_or_update(&mut change, "passed").await;

        let NotificationStatus::Posted { message_id } = first else {
            panic!("expected post, got {first:?}");
        };
        assert_eq!(second, NotificationStatus::Updated { message_id });
        let messages = forge.messages(7);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].body.contains("passed"));
        assert!(messages[0].body.starts_with(STATUS_MARKER));
    }

    #[tokio::test]
    async fn finds_existing_message_by_marker() {
        let forge = Arc::new(MemoryForge::new());
        let id = forge
            .create_message(9, &format!("{STATUS_MARKER}\nold status"))
            .await
            .unwrap();
        let notifier = Notifier::new(forge.clone());

        // a fresh ChangeRequest knows no message id
        let mut change = cr(9);
        let status = notifier.post_or_update(&mut change, "new status").await;

        assert_eq!(status, NotificationStatus::Updated { message_id: id });
        assert_eq!(change.status_message_id, Some(id));
        assert_eq!(forge.messages(9).len(), 1);
    }

    #[tokio::test]
    async fn failure_degrades_without_error() {
        let forge = Arc::new(MemoryForge::new());
        forge.set_failing(true);
        let notifier = Notifier::new(forge.clone());
        let mut change = cr(3);

        let status = notifier.post_or_update(&mut change, "body").await;

        assert!(status.is_degraded());
        assert!(change.status_message_id.is_none());
    }

    #[tokio::test]
    async fn failed_update_is_not_retried_as_create() {
        let forge = Arc::new(MemoryForge::new());
        let notifier = Notifier::new(forge.clone());
        let mut change = cr(4);
        notifier.post_or_update(&mut change, "one").await;

        forge.set_failing(true);
        let status = notifier.post_or_update(&mut change, "two").await;
        forge.set_failing(false);

        assert!(status.is_degraded());
        assert_eq!(forge.messages(4).len(), 1);
    }
}
