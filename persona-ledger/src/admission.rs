use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::{
    LedgerError, LedgerResult,
    accountant,
    backend::LedgerBackend,
    config::LedgerConfig,
    notify::{AssignmentEmail, NotificationDispatcher, NotificationStatus},
    observability::EventHub,
    test_catalog::TestCatalog,
    types::{
        AdmitRequest, Assignment, AssignmentId, AssignmentStatus, AssignmentView, CompanyCtx,
        ConsumeGuard, LedgerEvent, Page, TestId,
    },
};

/// A committed admission plus what happened to its invitation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub assignment: Assignment,
    pub access_link: String,
    pub notification: NotificationStatus,
}

/// Result of re-sending an invitation for an existing assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationReport {
    pub assignment_id: AssignmentId,
    pub access_link: String,
    pub notification: NotificationStatus,
}

/// Quota-checked creation of assignments and the company-scoped reads over them
pub struct AdmissionController<'a> {
    backend: &'a dyn LedgerBackend,
    tests: &'a dyn TestCatalog,
    dispatcher: &'a dyn NotificationDispatcher,
    config: &'a LedgerConfig,
    events: &'a EventHub,
}

impl<'a> AdmissionController<'a> {
    pub(crate) fn new(
        backend: &'a dyn LedgerBackend,
        tests: &'a dyn TestCatalog,
        dispatcher: &'a dyn NotificationDispatcher,
        config: &'a LedgerConfig,
        events: &'a EventHub,
    ) -> Self {
        Self {
            backend,
            tests,
            dispatcher,
            config,
            events,
        }
    }

    /// Admit one candidate against the company's remaining allowance.
    ///
    /// The quota check and the assignment insert commit together or not at
    /// all. The invitation is sent only after commit, and its failure is
    /// reported in the result instead of undoing the admission. The whole call
    /// returns within `admit_timeout + notify_timeout`.
    #[instrument(skip(self, ctx, request), fields(company_id = %ctx.company_id, request_id = ctx.request_id.as_deref()))]
    pub async fn admit(&self, ctx: &CompanyCtx, request: AdmitRequest) -> LedgerResult<Admission> {
        let request = request.normalized();
        request.validate()?;

        let assignment = tokio::time::timeout(self.config.admit_timeout, self.admit_locked(ctx, &request))
            .await
            .map_err(|_| LedgerError::Timeout("admission".to_string()))??;

        let access_link = self.config.access_link(assignment.id.as_str());
        let email = AssignmentEmail {
            company_id: ctx.company_id.clone(),
            assignment_id: assignment.id.clone(),
            candidate_email: assignment.candidate_email.clone(),
            candidate_name: assignment.candidate_name.clone(),
            access_link: access_link.clone(),
            note: request.note.clone(),
        };
        let notification = self.dispatch(&email).await;

        Ok(Admission {
            assignment,
            access_link,
            notification,
        })
    }

    /// The critical section: check remaining allowance, then consume one unit
    /// and insert the assignment under the observed revision.
    async fn admit_locked(&self, ctx: &CompanyCtx, request: &AdmitRequest) -> LedgerResult<Assignment> {
        let test_id = TestId::from(request.test_id.as_str());
        let mut test_checked = false;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let round = self.try_admit(ctx, request, &test_id, &mut test_checked).await;
            match round {
                Ok(Some(assignment)) => return Ok(assignment),
                Ok(None) | Err(LedgerError::ConcurrencyConflict) if self.config.may_retry(attempt) => {
                    debug!(attempt, "ledger row moved underneath admission, retrying");
                }
                Ok(None) | Err(LedgerError::ConcurrencyConflict) => {
                    return Err(self.give_up(ctx, attempt).await);
                }
                Err(err) if err.is_transient() && self.config.may_retry(attempt) => {
                    debug!(attempt, error = %err, "transient store fault during admission, retrying");
                }
                Err(err) => return Err(err),
            }

            self.config.backoff(attempt).await;
        }
    }

    /// Retries exhausted against a contended row: report the allowance as a
    /// quota refusal rather than a raw conflict.
    async fn give_up(&self, ctx: &CompanyCtx, attempt: u32) -> LedgerError {
        match self.backend.load_subscription(&ctx.company_id).await {
            Ok(row) => {
                let allowance = row.map_or(0, |(subscription, package)| {
                    accountant::total_allowance(&subscription, &package)
                });
                warn!(attempt, allowance, "admission gave up after contention");
                LedgerError::QuotaExceeded { allowance }
            }
            Err(err) => err,
        }
    }

    /// One optimistic round. `Ok(None)` means the guard failed and nothing was written.
    async fn try_admit(
        &self,
        ctx: &CompanyCtx,
        request: &AdmitRequest,
        test_id: &TestId,
        test_checked: &mut bool,
    ) -> LedgerResult<Option<Assignment>> {
        let (subscription, package) = self
            .backend
            .load_subscription(&ctx.company_id)
            .await?
            .filter(|(subscription, _)| subscription.is_active())
            .ok_or(LedgerError::NoSubscription)?;

        let total_allowance = accountant::total_allowance(&subscription, &package);
        if subscription.consumed >= total_allowance {
            warn!(consumed = subscription.consumed, total_allowance, "admission rejected, quota exhausted");
            self.events.emit(LedgerEvent::QuotaRejected {
                company_id: ctx.company_id.clone(),
                total_allowance,
                at: Utc::now(),
            });
            return Err(LedgerError::QuotaExceeded {
                allowance: total_allowance,
            });
        }

        if !*test_checked {
            if !self.tests.test_exists(&ctx.company_id, test_id).await? {
                return Err(LedgerError::TestNotFound(test_id.to_string()));
            }
            *test_checked = true;
        }

        let assignment = request.to_assignment(&ctx.company_id, Utc::now());
        let guard = ConsumeGuard {
            company_id: ctx.company_id.clone(),
            revision: subscription.revision,
            total_allowance,
        };

        let Some(updated) = self.backend.try_consume(guard, assignment.clone()).await? else {
            return Ok(None);
        };

        info!(
            assignment_id = %assignment.id,
            consumed = updated.consumed,
            total_allowance,
            "assignment admitted"
        );
        self.events.emit(LedgerEvent::Admitted {
            company_id: ctx.company_id.clone(),
            assignment_id: assignment.id.clone(),
            consumed: updated.consumed,
            total_allowance,
            at: assignment.created_at,
        });
        Ok(Some(assignment))
    }

    /// The company's assignments, newest first
    pub async fn list_assignments(
        &self,
        ctx: &CompanyCtx,
        page: Option<u32>,
        limit: Option<u32>,
        status: Option<AssignmentStatus>,
    ) -> LedgerResult<Page<AssignmentView>> {
        let query = self.config.resolve_query(page, limit, status);
        let (items, total) = self.backend.find_assignments(&ctx.company_id, &query).await?;
        Ok(Page {
            items,
            total,
            page: query.page,
            limit: query.limit,
        })
    }

    /// Foreign assignments are indistinguishable from missing ones
    pub async fn get_assignment(&self, ctx: &CompanyCtx, id: &AssignmentId) -> LedgerResult<AssignmentView> {
        self.backend
            .get_assignment(&ctx.company_id, id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("assignment {id}")))
    }

    /// Re-send the invitation for an assignment the company owns.
    ///
    /// Consumes no allowance.
    #[instrument(skip(self, ctx, note), fields(company_id = %ctx.company_id, assignment_id = %id))]
    pub async fn notify(
        &self,
        ctx: &CompanyCtx,
        id: &AssignmentId,
        note: Option<String>,
    ) -> LedgerResult<NotificationReport> {
        let view = self.get_assignment(ctx, id).await?;
        let assignment = view.assignment;
        if assignment.status == AssignmentStatus::Completed {
            return Err(LedgerError::InvalidTransition {
                from: AssignmentStatus::Completed.as_str().to_string(),
                to: "notified".to_string(),
            });
        }

        let access_link = self.config.access_link(assignment.id.as_str());
        let email = AssignmentEmail {
            company_id: ctx.company_id.clone(),
            assignment_id: assignment.id.clone(),
            candidate_email: assignment.candidate_email,
            candidate_name: assignment.candidate_name,
            access_link: access_link.clone(),
            note: note.map(|note| note.trim().to_string()).filter(|note| !note.is_empty()),
        };
        let notification = self.dispatch(&email).await;

        Ok(NotificationReport {
            assignment_id: assignment.id,
            access_link,
            notification,
        })
    }

    async fn dispatch(&self, email: &AssignmentEmail) -> NotificationStatus {
        let sent = tokio::time::timeout(
            self.config.notify_timeout,
            self.dispatcher.send_assignment_email(email),
        )
        .await;

        let status = match sent {
            Ok(Ok(())) => NotificationStatus::Sent,
            Ok(Err(err)) => NotificationStatus::Failed {
                reason: err.to_string(),
            },
            Err(_) => NotificationStatus::TimedOut,
        };

        match &status {
            NotificationStatus::Sent => {
                self.events.emit(LedgerEvent::NotificationSent {
                    company_id: email.company_id.clone(),
                    assignment_id: email.assignment_id.clone(),
                    at: Utc::now(),
                });
            }
            NotificationStatus::Failed { reason } => {
                warn!(assignment_id = %email.assignment_id, %reason, "invitation dispatch failed");
                self.emit_failure(email, reason.clone());
            }
            NotificationStatus::TimedOut => {
                warn!(assignment_id = %email.assignment_id, "invitation dispatch timed out");
                self.emit_failure(email, "timed out".to_string());
            }
        }

        status
    }

    fn emit_failure(&self, email: &AssignmentEmail, reason: String) {
        self.events.emit(LedgerEvent::NotificationFailed {
            company_id: email.company_id.clone(),
            assignment_id: email.assignment_id.clone(),
            reason,
            at: Utc::now(),
        });
    }
}
