use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::{
    LedgerError, LedgerResult,
    accountant,
    backend::LedgerBackend,
    config::LedgerConfig,
    observability::EventHub,
    types::{CompanyCtx, ExpectedLedger, LedgerEvent, Package, Subscription, SubscriptionView},
};

/// The company's single subscription row: reads and package changes
pub struct SubscriptionLedger<'a> {
    backend: &'a dyn LedgerBackend,
    config: &'a LedgerConfig,
    events: &'a EventHub,
}

pub(crate) fn view(subscription: Subscription, package: Package) -> SubscriptionView {
    SubscriptionView {
        total_allowance: accountant::total_allowance(&subscription, &package),
        remaining: accountant::remaining(&subscription, &package),
        subscription,
        package,
    }
}

impl<'a> SubscriptionLedger<'a> {
    pub(crate) fn new(backend: &'a dyn LedgerBackend, config: &'a LedgerConfig, events: &'a EventHub) -> Self {
        Self { backend, config, events }
    }

    /// Current row joined with its package.
    ///
    /// `None` for a company that never subscribed: zero allowance, not a fault.
    pub async fn current(&self, ctx: &CompanyCtx) -> LedgerResult<Option<SubscriptionView>> {
        let row = self.backend.load_subscription(&ctx.company_id).await?;
        Ok(row.map(|(subscription, package)| view(subscription, package)))
    }

    /// Switch the company to `package_code`, carrying over unused allowance.
    ///
    /// The replacement is a compare-and-swap against the row observed when the
    /// carry-over was computed; a concurrent admission or package change forces
    /// a recomputation.
    #[instrument(skip(self, ctx), fields(company_id = %ctx.company_id))]
    pub async fn subscribe_package(&self, ctx: &CompanyCtx, package_code: &str) -> LedgerResult<SubscriptionView> {
        let code = package_code.trim();
        let package = self
            .backend
            .package_by_code(code)
            .await?
            .ok_or_else(|| LedgerError::PackageNotFound(code.to_string()))?;

        if !package.active {
            return Err(LedgerError::PackageInactive(package.code));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;

            match self.try_replace(ctx, &package).await {
                Ok(Some(next)) => {
                    info!(
                        package = %package.code,
                        carry_over = next.carry_over,
                        consumed = next.consumed,
                        revision = next.revision,
                        "subscription replaced"
                    );
                    self.events.emit(LedgerEvent::Subscribed {
                        company_id: ctx.company_id.clone(),
                        package_code: package.code.clone(),
                        carry_over: next.carry_over,
                        at: next.updated_at,
                    });
                    return Ok(view(next, package));
                }
                Ok(None) if self.config.may_retry(attempt) => {
                    debug!(attempt, "ledger row moved underneath package change, retrying");
                }
                Ok(None) => return Err(LedgerError::ConcurrencyConflict),
                Err(err) if err.is_transient() && self.config.may_retry(attempt) => {
                    debug!(attempt, error = %err, "transient store fault during package change, retrying");
                }
                Err(err) => return Err(err),
            }

            self.config.backoff(attempt).await;
        }
    }

    /// One optimistic round: read, compute, conditional upsert
    async fn try_replace(&self, ctx: &CompanyCtx, package: &Package) -> LedgerResult<Option<Subscription>> {
        let existing = self.backend.load_subscription(&ctx.company_id).await?;
        let previous = existing.as_ref().map(|(subscription, current)| (subscription, current));

        let carry_over = accountant::compute_carry_over(previous);
        let consumed = previous.map_or(0, |(subscription, _)| subscription.consumed);

        let mut next = accountant::build_new_subscription(&ctx.company_id, package, carry_over, consumed, Utc::now());
        next.revision = previous.map_or(1, |(subscription, _)| subscription.revision + 1);

        let expected = previous.map(|(subscription, _)| ExpectedLedger::from(subscription));
        let applied = self.backend.replace_subscription(next.clone(), expected).await?;
        Ok(applied.then_some(next))
    }
}
