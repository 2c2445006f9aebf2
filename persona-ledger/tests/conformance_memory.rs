use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio_stream::StreamExt;

use persona_ledger::{
    AdmitRequest, AssessmentResult, Assignment, AssignmentId, AssignmentQuery, AssignmentStatus,
    AssignmentView, BoxStream, CompanyCtx, CompanyId, ConsumeGuard, ExpectedLedger, LedgerBackend,
    LedgerConfig, LedgerEngine, LedgerError, LedgerEvent, LedgerResult, MemoryBackend,
    MemoryTestCatalog, NewPackage, NotificationDispatcher, NotificationStatus, Package, PackageId,
    PackagePatch, ResultId, Subscription, notify::AssignmentEmail,
};

/// Test factory functions
fn create_engine() -> (LedgerEngine, MemoryBackend) {
    let backend = MemoryBackend::new();
    let tests = Arc::new(MemoryTestCatalog::new());
    tests.insert_global("mbti");
    tests.insert_for_company("acme", "acme-culture");

    let engine = LedgerEngine::new(Arc::new(backend.clone()), tests);
    (engine, backend)
}

fn admit_request(email: &str) -> AdmitRequest {
    AdmitRequest {
        test_id: "mbti".into(),
        candidate_email: email.into(),
        candidate_name: "Candidate".into(),
        note: None,
    }
}

async fn subscribed_company(engine: &LedgerEngine, code: &str, allowance: u32) -> CompanyCtx {
    engine
        .catalog()
        .create(NewPackage::new(code, code.to_uppercase(), allowance))
        .await
        .unwrap();
    let ctx = CompanyCtx::new("acme");
    engine.ledger().subscribe_package(&ctx, code).await.unwrap();
    ctx
}

async fn receive_next_event(stream: &mut BoxStream<LedgerEvent>) -> LedgerEvent {
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Stream ended")
}

struct FailingDispatcher;

#[async_trait]
impl NotificationDispatcher for FailingDispatcher {
    async fn send_assignment_email(&self, _email: &AssignmentEmail) -> LedgerResult<()> {
        Err(LedgerError::Notification("smtp relay refused".into()))
    }
}

struct SlowDispatcher;

#[async_trait]
impl NotificationDispatcher for SlowDispatcher {
    async fn send_assignment_email(&self, _email: &AssignmentEmail) -> LedgerResult<()> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

/// Memory store where a rival writer wins a set number of ledger rounds
#[derive(Clone)]
struct ContendedBackend {
    inner: MemoryBackend,
    /// `try_consume` calls preceded by a competing package change
    consume_races: Arc<AtomicU32>,
    /// `replace_subscription` calls that lose their compare-and-swap
    replace_races: Arc<AtomicU32>,
}

impl ContendedBackend {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            consume_races: Arc::new(AtomicU32::new(0)),
            replace_races: Arc::new(AtomicU32::new(0)),
        }
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    /// Rewrite the row under a new revision, as a concurrent package change would
    async fn bump_revision(&self, company_id: &CompanyId) -> LedgerResult<()> {
        if let Some((current, _)) = self.inner.load_subscription(company_id).await? {
            let mut next = current.clone();
            next.revision += 1;
            next.updated_at = Utc::now();
            self.inner
                .replace_subscription(next, Some(ExpectedLedger::from(&current)))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerBackend for ContendedBackend {
    async fn insert_package(&self, package: Package) -> LedgerResult<Package> {
        self.inner.insert_package(package).await
    }

    async fn list_packages(&self, include_inactive: bool) -> LedgerResult<Vec<Package>> {
        self.inner.list_packages(include_inactive).await
    }

    async fn package_by_code(&self, code: &str) -> LedgerResult<Option<Package>> {
        self.inner.package_by_code(code).await
    }

    async fn package_by_id(&self, id: &PackageId) -> LedgerResult<Option<Package>> {
        self.inner.package_by_id(id).await
    }

    async fn update_package(&self, package: Package) -> LedgerResult<Package> {
        self.inner.update_package(package).await
    }

    async fn delete_package(&self, id: &PackageId) -> LedgerResult<()> {
        self.inner.delete_package(id).await
    }

    async fn load_subscription(&self, company_id: &CompanyId) -> LedgerResult<Option<(Subscription, Package)>> {
        self.inner.load_subscription(company_id).await
    }

    async fn replace_subscription(
        &self,
        next: Subscription,
        expected: Option<ExpectedLedger>,
    ) -> LedgerResult<bool> {
        if Self::take(&self.replace_races) {
            return Ok(false);
        }
        self.inner.replace_subscription(next, expected).await
    }

    async fn try_consume(
        &self,
        guard: ConsumeGuard,
        assignment: Assignment,
    ) -> LedgerResult<Option<Subscription>> {
        if Self::take(&self.consume_races) {
            self.bump_revision(&guard.company_id).await?;
        }
        self.inner.try_consume(guard, assignment).await
    }

    async fn find_assignments(
        &self,
        company_id: &CompanyId,
        query: &AssignmentQuery,
    ) -> LedgerResult<(Vec<AssignmentView>, u64)> {
        self.inner.find_assignments(company_id, query).await
    }

    async fn get_assignment(
        &self,
        company_id: &CompanyId,
        id: &AssignmentId,
    ) -> LedgerResult<Option<AssignmentView>> {
        self.inner.get_assignment(company_id, id).await
    }

    async fn advance_assignment(&self, id: &AssignmentId, status: AssignmentStatus) -> LedgerResult<Assignment> {
        self.inner.advance_assignment(id, status).await
    }

    async fn record_result(&self, result: AssessmentResult) -> LedgerResult<()> {
        self.inner.record_result(result).await
    }
}

fn create_contended_engine() -> (LedgerEngine, ContendedBackend) {
    let backend = ContendedBackend::new();
    let tests = Arc::new(MemoryTestCatalog::new());
    tests.insert_global("mbti");

    let engine = LedgerEngine::new(Arc::new(backend.clone()), tests).with_config(LedgerConfig {
        max_attempts: 3,
        retry_backoff: Duration::from_millis(1),
        ..Default::default()
    });
    (engine, backend)
}

/// A1. Admission Stops Exactly At The Allowance
#[tokio::test]
async fn test_admission_stops_at_allowance() {
    let (engine, backend) = create_engine();
    let ctx = subscribed_company(&engine, "basic", 5).await;

    // Arrange: four of five consumed
    for i in 0..4 {
        engine
            .admission()
            .admit(&ctx, admit_request(&format!("c{i}@example.com")))
            .await
            .unwrap();
    }

    // Act: the fifth fits, the sixth does not
    let fifth = engine.admission().admit(&ctx, admit_request("c4@example.com")).await.unwrap();
    assert_eq!(fifth.assignment.status, AssignmentStatus::NotStarted);

    let err = engine
        .admission()
        .admit(&ctx, admit_request("c5@example.com"))
        .await
        .unwrap_err();

    // Assert: rejection names the allowance and writes nothing
    assert!(matches!(err, LedgerError::QuotaExceeded { allowance: 5 }));
    assert_eq!(err.to_string(), "Limit of 5 assignments reached");
    assert_eq!(backend.assignment_count(), 5);

    let view = engine.ledger().current(&ctx).await.unwrap().unwrap();
    assert_eq!(view.subscription.consumed, 5);
    assert_eq!(view.remaining, 0);
}

/// A2. Concurrent Admissions Never Overshoot
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_admissions_never_overshoot() {
    let (engine, backend) = create_engine();
    let ctx = subscribed_company(&engine, "basic", 5).await;

    // Arrange: one slot already taken, four left
    engine.admission().admit(&ctx, admit_request("first@example.com")).await.unwrap();

    // Act: twenty simultaneous requests race for the last four slots
    let attempts = (0..20).map(|i| {
        let engine = engine.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            engine
                .admission()
                .admit(&ctx, admit_request(&format!("race{i}@example.com")))
                .await
        })
    });
    let outcomes: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    // Assert: exactly the remaining allowance succeeded, the rest saw quota errors
    let admitted = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(admitted, 4);
    assert!(outcomes
        .iter()
        .filter_map(|o| o.as_ref().err())
        .all(|e| matches!(e, LedgerError::QuotaExceeded { allowance: 5 })));

    let view = engine.ledger().current(&ctx).await.unwrap().unwrap();
    assert_eq!(view.subscription.consumed, 5);
    assert_eq!(backend.assignment_count(), 5);
}

/// A3. No Subscription Means Zero Allowance
#[tokio::test]
async fn test_missing_subscription_reads_null_and_blocks_admission() {
    let (engine, backend) = create_engine();
    let ctx = CompanyCtx::new("newcomer");

    // Reading twice has no side effects
    assert!(engine.ledger().current(&ctx).await.unwrap().is_none());
    assert!(engine.ledger().current(&ctx).await.unwrap().is_none());

    let err = engine.admission().admit(&ctx, admit_request("c@example.com")).await.unwrap_err();
    assert!(matches!(err, LedgerError::NoSubscription));
    assert_eq!(backend.assignment_count(), 0);
}

/// B1. Switching Packages Carries Unused Allowance
#[tokio::test]
async fn test_package_switch_carries_over_unused_allowance() {
    let (engine, _backend) = create_engine();
    let ctx = subscribed_company(&engine, "standard", 10).await;
    engine.catalog().create(NewPackage::new("lite", "Lite", 5)).await.unwrap();

    for i in 0..3 {
        engine
            .admission()
            .admit(&ctx, admit_request(&format!("c{i}@example.com")))
            .await
            .unwrap();
    }

    let before = engine.ledger().current(&ctx).await.unwrap().unwrap();
    let after = engine.ledger().subscribe_package(&ctx, "lite").await.unwrap();

    // 10 - 3 carried; consumption preserved across the switch
    assert_eq!(after.subscription.carry_over, 7);
    assert_eq!(after.subscription.consumed, 3);
    assert_eq!(after.total_allowance, 12);
    assert_eq!(after.remaining, 9);
    assert_eq!(after.package.code, "lite");
    assert!(after.subscription.revision > before.subscription.revision);
    assert!(after.subscription.period_end > after.subscription.period_start);
}

/// B2. Carry-over Is Not Compounded
#[tokio::test]
async fn test_carry_over_does_not_compound() {
    let (engine, _backend) = create_engine();
    let ctx = subscribed_company(&engine, "standard", 10).await;
    engine.catalog().create(NewPackage::new("lite", "Lite", 5)).await.unwrap();

    let first = engine.ledger().subscribe_package(&ctx, "lite").await.unwrap();
    assert_eq!(first.subscription.carry_over, 10);

    // Only the outgoing package's allowance counts, not its carry-over
    let second = engine.ledger().subscribe_package(&ctx, "standard").await.unwrap();
    assert_eq!(second.subscription.carry_over, 5);
    assert_eq!(second.total_allowance, 15);
}

/// B3. Downgrade Below Consumption Blocks Further Admission
#[tokio::test]
async fn test_downgrade_below_consumption_blocks_admission() {
    let (engine, backend) = create_engine();
    let ctx = subscribed_company(&engine, "standard", 10).await;
    engine.catalog().create(NewPackage::new("lite", "Lite", 5)).await.unwrap();
    backend.force_consumed(&ctx.company_id, 10).unwrap();

    let view = engine.ledger().subscribe_package(&ctx, "lite").await.unwrap();
    assert_eq!(view.subscription.carry_over, 0);
    assert_eq!(view.subscription.consumed, 10);
    assert_eq!(view.remaining, 0);

    let err = engine.admission().admit(&ctx, admit_request("c@example.com")).await.unwrap_err();
    assert!(matches!(err, LedgerError::QuotaExceeded { allowance: 5 }));
}

/// B4. Unknown And Inactive Packages Cannot Be Subscribed
#[tokio::test]
async fn test_unknown_and_inactive_packages_are_rejected() {
    let (engine, _backend) = create_engine();
    let ctx = CompanyCtx::new("acme");

    let err = engine.ledger().subscribe_package(&ctx, "ghost").await.unwrap_err();
    assert!(matches!(err, LedgerError::PackageNotFound(code) if code == "ghost"));

    let mut retired = NewPackage::new("retired", "Retired", 5);
    retired.active = false;
    engine.catalog().create(retired).await.unwrap();

    let err = engine.ledger().subscribe_package(&ctx, "retired").await.unwrap_err();
    assert!(matches!(err, LedgerError::PackageInactive(_)));
    assert!(engine.ledger().current(&ctx).await.unwrap().is_none());
}

/// B5. Deactivating A Package Keeps Existing Subscribers Running
#[tokio::test]
async fn test_deactivated_package_keeps_existing_subscribers() {
    let (engine, _backend) = create_engine();
    let ctx = subscribed_company(&engine, "basic", 3).await;
    let package = engine.catalog().get_by_code("basic").await.unwrap();

    engine.catalog().deactivate(&package.id).await.unwrap();
    assert!(engine.catalog().list(false).await.unwrap().is_empty());
    assert_eq!(engine.catalog().list(true).await.unwrap().len(), 1);

    engine.admission().admit(&ctx, admit_request("c@example.com")).await.unwrap();

    let err = engine.catalog().delete(&package.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::PackageInUse(_)));
}

/// B6. A Referenced Package Keeps Its Allowance
#[tokio::test]
async fn test_referenced_package_allowance_is_frozen() {
    let (engine, _backend) = create_engine();
    let ctx = subscribed_company(&engine, "basic", 5).await;
    for i in 0..5 {
        engine
            .admission()
            .admit(&ctx, admit_request(&format!("c{i}@example.com")))
            .await
            .unwrap();
    }
    let package = engine.catalog().get_by_code("basic").await.unwrap();

    let err = engine
        .catalog()
        .update(
            &package.id,
            PackagePatch {
                monthly_allowance: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::PackageInUse(code) if code == "basic"));

    let view = engine.ledger().current(&ctx).await.unwrap().unwrap();
    assert_eq!(view.total_allowance, 5);
    assert!(view.subscription.consumed <= view.total_allowance);

    // Presentation fields stay editable
    let renamed = engine
        .catalog()
        .update(
            &package.id,
            PackagePatch {
                name: Some("Basic Plus".into()),
                price_cents: Some(1900),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.monthly_allowance, 5);
    assert_eq!(renamed.price_cents, 1900);
}

/// C1. Notification Failure Does Not Undo Admission
#[tokio::test]
async fn test_notification_failure_keeps_assignment() {
    let (engine, backend) = create_engine();
    let engine = engine.with_dispatcher(Arc::new(FailingDispatcher));
    let ctx = subscribed_company(&engine, "basic", 5).await;
    let mut events = engine.events();

    let admission = engine.admission().admit(&ctx, admit_request("c@example.com")).await.unwrap();

    assert!(matches!(
        &admission.notification,
        NotificationStatus::Failed { reason } if reason.contains("smtp relay refused")
    ));
    assert_eq!(backend.assignment_count(), 1);
    assert_eq!(engine.ledger().current(&ctx).await.unwrap().unwrap().subscription.consumed, 1);

    let admitted = receive_next_event(&mut events).await;
    assert!(matches!(admitted, LedgerEvent::Admitted { consumed: 1, total_allowance: 5, .. }));
    let failed = receive_next_event(&mut events).await;
    assert_eq!(failed.event_name(), "notificationFailed");
}

/// C2. Slow Transport Is Bounded By The Notify Timeout
#[tokio::test]
async fn test_slow_notification_times_out() {
    let (engine, _backend) = create_engine();
    let engine = engine
        .with_dispatcher(Arc::new(SlowDispatcher))
        .with_config(LedgerConfig {
            admit_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_millis(20),
            ..Default::default()
        });
    let ctx = subscribed_company(&engine, "basic", 5).await;

    let started = tokio::time::Instant::now();
    let admission = engine.admission().admit(&ctx, admit_request("c@example.com")).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1020));
    assert_eq!(admission.notification, NotificationStatus::TimedOut);
    assert!(admission
        .access_link
        .ends_with(&format!("/assessment/{}", admission.assignment.id)));
}

/// C3. Re-sending An Invitation Consumes Nothing
#[tokio::test]
async fn test_notify_resends_without_consuming() {
    let (engine, _backend) = create_engine();
    let ctx = subscribed_company(&engine, "basic", 5).await;
    let admission = engine.admission().admit(&ctx, admit_request("c@example.com")).await.unwrap();

    let report = engine
        .admission()
        .notify(&ctx, &admission.assignment.id, Some("  reminder  ".into()))
        .await
        .unwrap();

    assert!(report.notification.is_sent());
    assert_eq!(report.access_link, admission.access_link);
    assert_eq!(engine.ledger().current(&ctx).await.unwrap().unwrap().subscription.consumed, 1);
}

/// D1. Assignments Are Invisible Across Companies
#[tokio::test]
async fn test_assignments_are_scoped_to_their_company() {
    let (engine, _backend) = create_engine();
    let acme = subscribed_company(&engine, "basic", 5).await;
    let globex = CompanyCtx::new("globex");
    engine.ledger().subscribe_package(&globex, "basic").await.unwrap();

    let admission = engine.admission().admit(&acme, admit_request("c@example.com")).await.unwrap();

    let err = engine
        .admission()
        .get_assignment(&globex, &admission.assignment.id)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));

    let page = engine.admission().list_assignments(&globex, None, None, None).await.unwrap();
    assert_eq!(page.total, 0);

    let err = engine
        .admission()
        .notify(&globex, &admission.assignment.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));

    // Company-owned tests are not assignable by others
    let mut request = admit_request("c@example.com");
    request.test_id = "acme-culture".into();
    let err = engine.admission().admit(&globex, request).await.unwrap_err();
    assert!(matches!(err, LedgerError::TestNotFound(_)));
}

/// D2. Unknown Test Consumes Nothing
#[tokio::test]
async fn test_unknown_test_is_rejected_without_consuming() {
    let (engine, backend) = create_engine();
    let ctx = subscribed_company(&engine, "basic", 5).await;

    let mut request = admit_request("c@example.com");
    request.test_id = "nope".into();
    let err = engine.admission().admit(&ctx, request).await.unwrap_err();

    assert!(matches!(err, LedgerError::TestNotFound(id) if id == "nope"));
    assert_eq!(backend.assignment_count(), 0);
    assert_eq!(engine.ledger().current(&ctx).await.unwrap().unwrap().subscription.consumed, 0);
}

/// D3. Invalid Candidate Data Is Rejected Before The Ledger
#[tokio::test]
async fn test_invalid_candidate_is_a_validation_error() {
    let (engine, backend) = create_engine();
    let ctx = subscribed_company(&engine, "basic", 5).await;

    let mut request = admit_request("not-an-email");
    request.candidate_name = "   ".into();
    let err = engine.admission().admit(&ctx, request).await.unwrap_err();

    let LedgerError::Validation(fields) = err else {
        panic!("expected validation error, got {err:?}");
    };
    assert!(fields.contains_key("candidate_email"));
    assert!(fields.contains_key("candidate_name"));
    assert_eq!(backend.assignment_count(), 0);
}

/// E1. Listing Pages Newest First With Latest Result
#[tokio::test]
async fn test_listing_pages_filters_and_enriches() {
    let (engine, backend) = create_engine();
    let ctx = subscribed_company(&engine, "basic", 10).await;

    let mut ids: Vec<AssignmentId> = Vec::new();
    for i in 0..5 {
        let admission = engine
            .admission()
            .admit(&ctx, admit_request(&format!("c{i}@example.com")))
            .await
            .unwrap();
        ids.push(admission.assignment.id);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let first = engine.admission().list_assignments(&ctx, Some(1), Some(2), None).await.unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.items[0].assignment.id, ids[4]);
    assert_eq!(first.items[1].assignment.id, ids[3]);

    let last = engine.admission().list_assignments(&ctx, Some(3), Some(2), None).await.unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].assignment.id, ids[0]);

    // Assessment flow completes one assignment and records a result
    backend.advance_assignment(&ids[0], AssignmentStatus::Started).await.unwrap();
    let completed = backend
        .advance_assignment(&ids[0], AssignmentStatus::Completed)
        .await
        .unwrap();
    assert!(completed.completed_at.is_some());

    backend
        .record_result(AssessmentResult {
            id: ResultId::new(),
            assignment_id: ids[0].clone(),
            company_id: ctx.company_id.clone(),
            personality_type: "INTJ".into(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let done = engine
        .admission()
        .list_assignments(&ctx, None, None, Some(AssignmentStatus::Completed))
        .await
        .unwrap();
    assert_eq!(done.total, 1);
    assert_eq!(
        done.items[0].latest_result.as_ref().map(|r| r.personality_type.as_str()),
        Some("INTJ")
    );

    let err = engine.admission().notify(&ctx, &ids[0], None).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
}

/// E2. Package Administration Validates Input
#[tokio::test]
async fn test_package_administration_validates_input() {
    let (engine, _backend) = create_engine();

    let err = engine.catalog().create(NewPackage::new("zero", "Zero", 0)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(fields) if fields.contains_key("monthly_allowance")));

    engine.catalog().create(NewPackage::new("pro", "Pro", 50).with_price(9900)).await.unwrap();
    let err = engine.catalog().create(NewPackage::new(" pro ", "Pro again", 5)).await.unwrap_err();
    assert!(matches!(err, LedgerError::DuplicatePackage(code) if code == "pro"));

    let pro = engine.catalog().get_by_code("pro").await.unwrap();
    let updated = engine
        .catalog()
        .update(
            &pro.id,
            PackagePatch {
                monthly_allowance: Some(60),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.monthly_allowance, 60);
    assert_eq!(updated.price_cents, 9900);
}

/// F1. Admission Retries After A Concurrent Package Change
#[tokio::test]
async fn test_admission_retries_after_revision_miss() {
    let (engine, backend) = create_contended_engine();
    let ctx = subscribed_company(&engine, "basic", 5).await;

    // Arrange: the first consume round finds the row rewritten underneath it
    backend.consume_races.store(1, Ordering::SeqCst);

    // Act
    let admission = engine.admission().admit(&ctx, admit_request("c@example.com")).await.unwrap();

    // Assert: the second round committed exactly one unit
    assert_eq!(backend.consume_races.load(Ordering::SeqCst), 0);
    assert_eq!(admission.assignment.status, AssignmentStatus::NotStarted);
    let view = engine.ledger().current(&ctx).await.unwrap().unwrap();
    assert_eq!(view.subscription.consumed, 1);
    assert_eq!(view.subscription.revision, 2);
    assert_eq!(backend.inner.assignment_count(), 1);
}

/// F2. Exhausted Admission Retries Surface As A Quota Refusal
#[tokio::test]
async fn test_admission_contention_exhaustion_reports_allowance() {
    let (engine, backend) = create_contended_engine();
    let ctx = subscribed_company(&engine, "basic", 5).await;
    backend.consume_races.store(u32::MAX, Ordering::SeqCst);

    let err = engine.admission().admit(&ctx, admit_request("c@example.com")).await.unwrap_err();

    assert!(matches!(err, LedgerError::QuotaExceeded { allowance: 5 }));
    assert_eq!(u32::MAX - backend.consume_races.load(Ordering::SeqCst), 3);
    let view = engine.ledger().current(&ctx).await.unwrap().unwrap();
    assert_eq!(view.subscription.consumed, 0);
    assert_eq!(backend.inner.assignment_count(), 0);
}

/// F3. Package Change Retries A Lost Swap, Then Gives Up As A Conflict
#[tokio::test]
async fn test_package_change_retries_then_reports_conflict() {
    let (engine, backend) = create_contended_engine();
    let ctx = subscribed_company(&engine, "basic", 5).await;
    engine.catalog().create(NewPackage::new("standard", "Standard", 10)).await.unwrap();
    engine.catalog().create(NewPackage::new("pro", "Pro", 20)).await.unwrap();

    // Two lost swaps fit inside three attempts
    backend.replace_races.store(2, Ordering::SeqCst);
    let view = engine.ledger().subscribe_package(&ctx, "standard").await.unwrap();
    assert_eq!(view.package.code, "standard");
    assert_eq!(view.total_allowance, 15);

    // Every swap lost: the row is left untouched
    backend.replace_races.store(u32::MAX, Ordering::SeqCst);
    let err = engine.ledger().subscribe_package(&ctx, "pro").await.unwrap_err();
    assert!(matches!(err, LedgerError::ConcurrencyConflict));

    let view = engine.ledger().current(&ctx).await.unwrap().unwrap();
    assert_eq!(view.package.code, "standard");
}

/// F4. Admissions Racing Package Upgrades Never Lose Or Overshoot Consumption
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admissions_race_package_upgrades() {
    let (engine, backend) = create_engine();
    let ctx = subscribed_company(&engine, "basic", 5).await;
    engine.catalog().create(NewPackage::new("standard", "Standard", 10)).await.unwrap();
    engine.catalog().create(NewPackage::new("pro", "Pro", 20)).await.unwrap();

    // Spawn everything before awaiting anything
    let admissions: Vec<_> = (0..8).map(|i| {
        let engine = engine.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            engine
                .admission()
                .admit(&ctx, admit_request(&format!("race{i}@example.com")))
                .await
                .map(|_| ())
        })
    })
    .collect();
    let upgrades: Vec<_> = ["standard", "pro", "standard"]
        .into_iter()
        .map(|code| {
            let engine = engine.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { engine.ledger().subscribe_package(&ctx, code).await.map(|_| ()) })
        })
        .collect();

    let admitted: Vec<_> = join_all(admissions).await.into_iter().map(|joined| joined.unwrap()).collect();
    let switched: Vec<_> = join_all(upgrades).await.into_iter().map(|joined| joined.unwrap()).collect();

    assert!(admitted
        .iter()
        .filter_map(|o| o.as_ref().err())
        .all(|e| matches!(e, LedgerError::QuotaExceeded { .. })));
    assert!(switched
        .iter()
        .filter_map(|o| o.as_ref().err())
        .all(|e| matches!(e, LedgerError::ConcurrencyConflict)));

    // Every committed admission is counted once, and no package change erased one
    let successes = admitted.iter().filter(|o| o.is_ok()).count();
    let view = engine.ledger().current(&ctx).await.unwrap().unwrap();
    assert_eq!(view.subscription.consumed as usize, successes);
    assert_eq!(backend.assignment_count(), successes);
    assert!(view.subscription.consumed <= view.total_allowance);
}
