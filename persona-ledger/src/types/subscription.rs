use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CompanyId, Package, PackageId};

/// Subscription lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// The single ledger row a company owns.
///
/// Replaced wholesale on every package change; `consumed` is only ever
/// moved by admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub company_id: CompanyId,

    pub package_id: PackageId,

    /// Assignments admitted in the current period
    pub consumed: u32,

    /// Unused allowance brought over from the previous package
    pub carry_over: u32,

    pub period_start: DateTime<Utc>,

    pub period_end: DateTime<Utc>,

    pub status: SubscriptionStatus,

    /// Bumped on every package change; admission writes are guarded by it
    pub revision: u64,

    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Ledger row joined with its package, plus the derived usage figures the
/// dashboard renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    #[serde(flatten)]
    pub subscription: Subscription,

    pub package: Package,

    /// `package.monthly_allowance + carry_over`
    pub total_allowance: u32,

    /// Never negative, even for a company left over its limit by a downgrade
    pub remaining: u32,
}

/// Guard for the conditional consumption write.
///
/// The write applies only while the row is still at `revision` and
/// `consumed < total_allowance`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeGuard {
    pub company_id: CompanyId,
    pub revision: u64,
    pub total_allowance: u32,
}

/// Row state observed before computing a replacement; the upsert is a
/// compare-and-swap against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedLedger {
    pub revision: u64,
    pub consumed: u32,
}

impl From<&Subscription> for ExpectedLedger {
    fn from(subscription: &Subscription) -> Self {
        Self {
            revision: subscription.revision,
            consumed: subscription.consumed,
        }
    }
}
