//! Approval notifications.
//!
//! Approvals enqueue an [`ApprovalNotice`] on a bounded channel; a
//! background worker hands each notice to the configured [`Notifier`].
//! Delivery is strictly best-effort — a failed or dropped notification
//! never affects the committed approval.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::observability;

/// Everything a delivery channel needs to tell a user their booking was
/// approved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalNotice {
    pub email: String,
    pub name: String,
    pub room_no: String,
    pub description: Option<String>,
}

/// A delivery channel for approval notices (SMTP, webhook, …).
/// Returns whether delivery succeeded.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_approval(&self, notice: &ApprovalNotice) -> bool;
}

/// A notifier that only logs. Used when no delivery channel is
/// configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_approval(&self, notice: &ApprovalNotice) -> bool {
        info!(
            email = %notice.email,
            room_no = %notice.room_no,
            "approval notice (no delivery channel configured)"
        );
        true
    }
}

/// Drain the notice queue until all senders are gone.
pub async fn run_notifier(mut rx: mpsc::Receiver<ApprovalNotice>, notifier: Arc<dyn Notifier>) {
    while let Some(notice) = rx.recv().await {
        if notifier.notify_approval(&notice).await {
            observability::record_notification("sent");
        } else {
            warn!(email = %notice.email, "approval notification delivery failed");
            observability::record_notification("failed");
        }
    }
}
