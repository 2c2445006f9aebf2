//! Notification seam: the invitation email sent after a successful admission.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    LedgerResult,
    types::{AssignmentId, CompanyId},
};

/// Everything a mail transport needs to invite a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEmail {
    pub company_id: CompanyId,
    pub assignment_id: AssignmentId,
    pub candidate_email: String,
    pub candidate_name: String,
    pub access_link: String,
    pub note: Option<String>,
}

/// Outcome of one dispatch attempt, reported next to the admitted assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum NotificationStatus {
    Sent,
    Failed { reason: String },
    TimedOut,
}

impl NotificationStatus {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// Mail transport. Failures are reported, never propagated into admission.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_assignment_email(&self, email: &AssignmentEmail) -> LedgerResult<()>;
}

/// Dispatcher that only logs; the default when no transport is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send_assignment_email(&self, email: &AssignmentEmail) -> LedgerResult<()> {
        info!(
            company_id = %email.company_id,
            assignment_id = %email.assignment_id,
            to = %email.candidate_email,
            link = %email.access_link,
            "assignment invitation (log transport)"
        );
        Ok(())
    }
}
