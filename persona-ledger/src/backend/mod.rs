#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;

use crate::{
    LedgerResult,
    types::{
        AssessmentResult, Assignment, AssignmentId, AssignmentQuery, AssignmentStatus,
        AssignmentView, CompanyId, ConsumeGuard, ExpectedLedger, Package, PackageId,
        Subscription,
    },
};

/// Storage primitives behind the quota engine.
///
/// Every method that mutates the ledger row is conditional: it either applies
/// completely under the stated guard or not at all. Implementations must make
/// each call atomic relative to concurrent callers.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    // ---- package catalog ----

    /// Insert a package; `DuplicatePackage` if the code is taken
    async fn insert_package(&self, package: Package) -> LedgerResult<Package>;

    /// All packages, active ones only unless `include_inactive`
    async fn list_packages(&self, include_inactive: bool) -> LedgerResult<Vec<Package>>;

    async fn package_by_code(&self, code: &str) -> LedgerResult<Option<Package>>;

    async fn package_by_id(&self, id: &PackageId) -> LedgerResult<Option<Package>>;

    /// Overwrite an existing package.
    ///
    /// `PackageNotFound` if missing, `DuplicatePackage` on a code clash,
    /// `PackageInUse` if the code or allowance changes while a subscription
    /// references it.
    async fn update_package(&self, package: Package) -> LedgerResult<Package>;

    /// Hard delete; `PackageInUse` while any subscription references it
    async fn delete_package(&self, id: &PackageId) -> LedgerResult<()>;

    // ---- subscription ledger ----

    /// The company's ledger row joined with its package
    async fn load_subscription(&self, company_id: &CompanyId) -> LedgerResult<Option<(Subscription, Package)>>;

    /// Upsert the company's single ledger row.
    ///
    /// With `expected = None` the row must not exist yet; otherwise the stored
    /// row must still match `expected`. Returns `false` when the guard failed.
    /// `PackageNotFound` if `next.package_id` vanished.
    async fn replace_subscription(
        &self,
        next: Subscription,
        expected: Option<ExpectedLedger>,
    ) -> LedgerResult<bool>;

    /// Increment `consumed` by one and insert `assignment` as one unit.
    ///
    /// Applies only while the row is active, at `guard.revision` and below
    /// `guard.total_allowance`. Returns the updated row, or `None` when the
    /// guard failed and nothing was written.
    async fn try_consume(
        &self,
        guard: ConsumeGuard,
        assignment: Assignment,
    ) -> LedgerResult<Option<Subscription>>;

    // ---- assignments ----

    /// One page of the company's assignments, newest first, with the total
    /// count matching the filter
    async fn find_assignments(
        &self,
        company_id: &CompanyId,
        query: &AssignmentQuery,
    ) -> LedgerResult<(Vec<AssignmentView>, u64)>;

    /// Ownership-scoped fetch; `None` for foreign or missing ids alike
    async fn get_assignment(
        &self,
        company_id: &CompanyId,
        id: &AssignmentId,
    ) -> LedgerResult<Option<AssignmentView>>;

    // ---- assessment-flow collaborator ----

    /// Move an assignment one step forward; `InvalidTransition` otherwise
    async fn advance_assignment(&self, id: &AssignmentId, status: AssignmentStatus) -> LedgerResult<Assignment>;

    /// Attach a scoring result to its assignment
    async fn record_result(&self, result: AssessmentResult) -> LedgerResult<()>;
}
