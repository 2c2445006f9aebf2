//! Quota arithmetic. Pure functions only; no store access.

use chrono::{DateTime, Months, Utc};

use crate::types::{CompanyId, Package, Subscription, SubscriptionStatus};

/// Unused allowance carried into a new package.
///
/// `max(0, previous allowance - consumed)`. Earlier carry-over is not
/// compounded and nothing decays; over-consumption floors at zero.
pub fn compute_carry_over(existing: Option<(&Subscription, &Package)>) -> u32 {
    match existing {
        None => 0,
        Some((subscription, package)) => package.monthly_allowance.saturating_sub(subscription.consumed),
    }
}

/// Package allowance plus carry-over
pub fn total_allowance(subscription: &Subscription, package: &Package) -> u32 {
    package.monthly_allowance.saturating_add(subscription.carry_over)
}

/// Admissions left before the gate closes
pub fn remaining(subscription: &Subscription, package: &Package) -> u32 {
    total_allowance(subscription, package).saturating_sub(subscription.consumed)
}

/// Replacement ledger row for a package change.
///
/// Consumption survives the switch, the period restarts at `now` for one
/// calendar month and the row becomes active. `revision` is left at zero for
/// the ledger to stamp.
pub fn build_new_subscription(
    company_id: &CompanyId,
    package: &Package,
    carry_over: u32,
    existing_consumed: u32,
    now: DateTime<Utc>,
) -> Subscription {
    Subscription {
        company_id: company_id.clone(),
        package_id: package.id.clone(),
        consumed: existing_consumed,
        carry_over,
        period_start: now,
        period_end: period_end(now),
        status: SubscriptionStatus::Active,
        revision: 0,
        updated_at: now,
    }
}

fn period_end(start: DateTime<Utc>) -> DateTime<Utc> {
    // Month arithmetic clamps to the last valid day (Jan 31 -> Feb 28/29);
    // overflow is out of chrono's range and falls back to 30 days.
    start
        .checked_add_months(Months::new(1))
        .unwrap_or_else(|| start + chrono::Duration::days(30))
}
