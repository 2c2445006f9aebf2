use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AssignmentId, CompanyId};

/// Structured ledger events for observability and out-of-band reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum LedgerEvent {
    /// A company's ledger row was created or replaced
    Subscribed {
        company_id: CompanyId,
        package_code: String,
        carry_over: u32,
        at: DateTime<Utc>,
    },

    /// An assignment was admitted and consumption incremented
    Admitted {
        company_id: CompanyId,
        assignment_id: AssignmentId,
        consumed: u32,
        total_allowance: u32,
        at: DateTime<Utc>,
    },

    /// Admission was refused for lack of quota
    QuotaRejected {
        company_id: CompanyId,
        total_allowance: u32,
        at: DateTime<Utc>,
    },

    /// The invitation email was handed to the dispatcher
    NotificationSent {
        company_id: CompanyId,
        assignment_id: AssignmentId,
        at: DateTime<Utc>,
    },

    /// Dispatch failed or timed out; the assignment itself stands
    NotificationFailed {
        company_id: CompanyId,
        assignment_id: AssignmentId,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl LedgerEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Subscribed { .. } => "subscribed",
            Self::Admitted { .. } => "admitted",
            Self::QuotaRejected { .. } => "quotaRejected",
            Self::NotificationSent { .. } => "notificationSent",
            Self::NotificationFailed { .. } => "notificationFailed",
        }
    }

    /// Get the company the event belongs to
    pub fn company_id(&self) -> &CompanyId {
        match self {
            Self::Subscribed { company_id, .. }
            | Self::Admitted { company_id, .. }
            | Self::QuotaRejected { company_id, .. }
            | Self::NotificationSent { company_id, .. }
            | Self::NotificationFailed { company_id, .. } => company_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Subscribed { at, .. }
            | Self::Admitted { at, .. }
            | Self::QuotaRejected { at, .. }
            | Self::NotificationSent { at, .. }
            | Self::NotificationFailed { at, .. } => at,
        }
    }
}
