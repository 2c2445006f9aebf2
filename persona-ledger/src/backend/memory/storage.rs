use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    LedgerError, LedgerResult,
    backend::LedgerBackend,
    types::{
        AssessmentResult, Assignment, AssignmentId, AssignmentQuery, AssignmentStatus,
        AssignmentView, CompanyId, ConsumeGuard, ExpectedLedger, Package, PackageId,
        Subscription,
    },
};

#[derive(Default)]
pub(crate) struct LedgerState {
    pub(crate) packages: HashMap<PackageId, Package>,
    /// One row per company
    pub(crate) subscriptions: HashMap<CompanyId, Subscription>,
    pub(crate) assignments: HashMap<AssignmentId, Assignment>,
    /// assignment_id -> results in insertion order
    pub(crate) results: HashMap<AssignmentId, Vec<AssessmentResult>>,
}

impl LedgerState {
    fn package_referenced(&self, id: &PackageId) -> bool {
        self.subscriptions.values().any(|s| &s.package_id == id)
    }

    fn view(&self, assignment: &Assignment) -> AssignmentView {
        let latest_result = self
            .results
            .get(&assignment.id)
            .and_then(|results| results.iter().max_by_key(|r| r.created_at))
            .cloned();

        AssignmentView {
            assignment: assignment.clone(),
            latest_result,
        }
    }
}

/// In-memory backend for tests, development and single-node deployments.
///
/// All state sits behind one lock so that every trait call is a single
/// critical section. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub(crate) state: Arc<RwLock<LedgerState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a company's consumption, bypassing admission.
    ///
    /// Test support for reproducing rows left over their limit.
    pub fn force_consumed(&self, company_id: &CompanyId, consumed: u32) -> LedgerResult<()> {
        let mut state = self.state.write();
        let row = state
            .subscriptions
            .get_mut(company_id)
            .ok_or(LedgerError::NoSubscription)?;
        row.consumed = consumed;
        Ok(())
    }

    /// Number of stored assignments across all companies
    pub fn assignment_count(&self) -> usize {
        self.state.read().assignments.len()
    }
}

#[async_trait]
impl LedgerBackend for MemoryBackend {
    async fn insert_package(&self, package: Package) -> LedgerResult<Package> {
        let mut state = self.state.write();

        if state.packages.values().any(|p| p.code == package.code) {
            return Err(LedgerError::DuplicatePackage(package.code));
        }

        state.packages.insert(package.id.clone(), package.clone());
        Ok(package)
    }

    async fn list_packages(&self, include_inactive: bool) -> LedgerResult<Vec<Package>> {
        let state = self.state.read();
        let mut packages: Vec<Package> = state
            .packages
            .values()
            .filter(|p| include_inactive || p.active)
            .cloned()
            .collect();

        packages.sort_by(|a, b| a.price_cents.cmp(&b.price_cents).then_with(|| a.code.cmp(&b.code)));
        Ok(packages)
    }

    async fn package_by_code(&self, code: &str) -> LedgerResult<Option<Package>> {
        let state = self.state.read();
        Ok(state.packages.values().find(|p| p.code == code).cloned())
    }

    async fn package_by_id(&self, id: &PackageId) -> LedgerResult<Option<Package>> {
        Ok(self.state.read().packages.get(id).cloned())
    }

    async fn update_package(&self, package: Package) -> LedgerResult<Package> {
        let mut state = self.state.write();

        let current = state
            .packages
            .get(&package.id)
            .cloned()
            .ok_or_else(|| LedgerError::PackageNotFound(package.id.to_string()))?;

        if current.code != package.code
            && state
                .packages
                .values()
                .any(|p| p.id != package.id && p.code == package.code)
        {
            return Err(LedgerError::DuplicatePackage(package.code));
        }
        if current.same_terms(&package) || !state.package_referenced(&package.id) {
            state.packages.insert(package.id.clone(), package.clone());
            return Ok(package);
        }
        Err(LedgerError::PackageInUse(current.code))
    }

    async fn delete_package(&self, id: &PackageId) -> LedgerResult<()> {
        let mut state = self.state.write();

        let code = state
            .packages
            .get(id)
            .map(|p| p.code.clone())
            .ok_or_else(|| LedgerError::PackageNotFound(id.to_string()))?;

        if state.package_referenced(id) {
            return Err(LedgerError::PackageInUse(code));
        }

        state.packages.remove(id);
        Ok(())
    }

    async fn load_subscription(&self, company_id: &CompanyId) -> LedgerResult<Option<(Subscription, Package)>> {
        let state = self.state.read();

        let Some(subscription) = state.subscriptions.get(company_id) else {
            return Ok(None);
        };

        let package = state.packages.get(&subscription.package_id).ok_or_else(|| {
            LedgerError::Internal(format!(
                "subscription for {company_id} references missing package {}",
                subscription.package_id
            ))
        })?;

        Ok(Some((subscription.clone(), package.clone())))
    }

    async fn replace_subscription(
        &self,
        next: Subscription,
        expected: Option<ExpectedLedger>,
    ) -> LedgerResult<bool> {
        let mut state = self.state.write();

        if !state.packages.contains_key(&next.package_id) {
            return Err(LedgerError::PackageNotFound(next.package_id.to_string()));
        }

        let matches = match (state.subscriptions.get(&next.company_id), expected) {
            (None, None) => true,
            (Some(current), Some(expected)) => ExpectedLedger::from(current) == expected,
            _ => false,
        };

        if matches {
            state.subscriptions.insert(next.company_id.clone(), next);
        }
        Ok(matches)
    }

    async fn try_consume(
        &self,
        guard: ConsumeGuard,
        assignment: Assignment,
    ) -> LedgerResult<Option<Subscription>> {
        debug_assert_eq!(guard.company_id, assignment.company_id);

        let mut lock = self.state.write();
        let state = &mut *lock;

        let Some(row) = state.subscriptions.get_mut(&guard.company_id) else {
            return Ok(None);
        };

        if !row.is_active() || row.revision != guard.revision || row.consumed >= guard.total_allowance {
            return Ok(None);
        }

        row.consumed += 1;
        row.updated_at = Utc::now();
        let updated = row.clone();

        state.assignments.insert(assignment.id.clone(), assignment);
        Ok(Some(updated))
    }

    async fn find_assignments(
        &self,
        company_id: &CompanyId,
        query: &AssignmentQuery,
    ) -> LedgerResult<(Vec<AssignmentView>, u64)> {
        let state = self.state.read();

        let mut matching: Vec<&Assignment> = state
            .assignments
            .values()
            .filter(|a| &a.company_id == company_id)
            .filter(|a| query.status.map_or(true, |s| a.status == s))
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .map(|a| state.view(a))
            .collect();

        Ok((items, total))
    }

    async fn get_assignment(
        &self,
        company_id: &CompanyId,
        id: &AssignmentId,
    ) -> LedgerResult<Option<AssignmentView>> {
        let state = self.state.read();
        Ok(state
            .assignments
            .get(id)
            .filter(|a| &a.company_id == company_id)
            .map(|a| state.view(a)))
    }

    async fn advance_assignment(&self, id: &AssignmentId, status: AssignmentStatus) -> LedgerResult<Assignment> {
        let mut state = self.state.write();

        let assignment = state
            .assignments
            .get_mut(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

        if !assignment.status.can_advance_to(status) {
            return Err(LedgerError::InvalidTransition {
                from: assignment.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        assignment.status = status;
        if status == AssignmentStatus::Completed {
            assignment.completed_at = Some(Utc::now());
        }
        Ok(assignment.clone())
    }

    async fn record_result(&self, result: AssessmentResult) -> LedgerResult<()> {
        let mut state = self.state.write();

        let owned = state
            .assignments
            .get(&result.assignment_id)
            .is_some_and(|a| a.company_id == result.company_id);
        if !owned {
            return Err(LedgerError::NotFound(result.assignment_id.to_string()));
        }

        state
            .results
            .entry(result.assignment_id.clone())
            .or_default()
            .push(result);
        Ok(())
    }
}
