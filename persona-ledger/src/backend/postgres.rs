//! PostgreSQL backend.
//!
//! Conditional writes are single statements guarded in their `WHERE` clause,
//! so correctness does not depend on the isolation level. Consumption and the
//! assignment insert share one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPool, PgRow},
    Row,
};
use tracing::{debug, instrument};

use crate::{
    LedgerError, LedgerResult,
    backend::LedgerBackend,
    test_catalog::TestCatalog,
    types::{
        AssessmentResult, Assignment, AssignmentId, AssignmentQuery, AssignmentStatus,
        AssignmentView, CompanyId, ConsumeGuard, ExpectedLedger, Package, PackageId, ResultId,
        Subscription, SubscriptionStatus, TestId,
    },
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS packages (
        id TEXT PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        monthly_allowance BIGINT NOT NULL CHECK (monthly_allowance > 0),
        price_cents BIGINT NOT NULL CHECK (price_cents >= 0),
        active BOOLEAN NOT NULL DEFAULT TRUE,
        description TEXT NOT NULL DEFAULT '',
        benefits TEXT[] NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS subscriptions (
        company_id TEXT PRIMARY KEY,
        package_id TEXT NOT NULL REFERENCES packages(id) ON DELETE RESTRICT,
        consumed BIGINT NOT NULL CHECK (consumed >= 0),
        carry_over BIGINT NOT NULL CHECK (carry_over >= 0),
        period_start TIMESTAMPTZ NOT NULL,
        period_end TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL,
        revision BIGINT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS assignments (
        id TEXT PRIMARY KEY,
        company_id TEXT NOT NULL,
        test_id TEXT NOT NULL,
        candidate_email TEXT NOT NULL,
        candidate_name TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        completed_at TIMESTAMPTZ
    )",
    "CREATE INDEX IF NOT EXISTS assignments_company_created
        ON assignments (company_id, created_at DESC, id DESC)",
    "CREATE TABLE IF NOT EXISTS results (
        id TEXT PRIMARY KEY,
        assignment_id TEXT NOT NULL REFERENCES assignments(id) ON DELETE CASCADE,
        company_id TEXT NOT NULL,
        personality_type TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS results_assignment_created
        ON results (assignment_id, created_at DESC)",
    "CREATE TABLE IF NOT EXISTS tests (
        id TEXT PRIMARY KEY,
        company_id TEXT
    )",
];

const PACKAGE_COLUMNS: &str =
    "id, code, name, monthly_allowance, price_cents, active, description, benefits, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str =
    "company_id, package_id, consumed, carry_over, period_start, period_end, status, revision, updated_at";

const INSERT_SUBSCRIPTION: &str = "INSERT INTO subscriptions (company_id, package_id, consumed, carry_over,
        period_start, period_end, status, revision, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT (company_id) DO NOTHING";

/// Compare-and-swap on the observed `(revision, consumed)` pair
const SWAP_SUBSCRIPTION: &str = "UPDATE subscriptions SET package_id = $2, consumed = $3, carry_over = $4,
        period_start = $5, period_end = $6, status = $7, revision = $8, updated_at = $9
    WHERE company_id = $1 AND revision = $10 AND consumed = $11";

const ASSIGNMENT_COLUMNS: &str =
    "id, company_id, test_id, candidate_email, candidate_name, status, created_at, completed_at";

/// PostgreSQL-backed ledger
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they are missing
    pub async fn migrate(&self) -> LedgerResult<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        debug!("ledger schema ready");
        Ok(())
    }
}

fn count(value: i64, column: &str) -> LedgerResult<u32> {
    u32::try_from(value).map_err(|_| LedgerError::Internal(format!("{column} out of range: {value}")))
}

fn package_from_row(row: &PgRow, prefix: &str) -> LedgerResult<Package> {
    let col = |name: &str| format!("{prefix}{name}");
    Ok(Package {
        id: PackageId(row.try_get(col("id").as_str())?),
        code: row.try_get(col("code").as_str())?,
        name: row.try_get(col("name").as_str())?,
        monthly_allowance: count(row.try_get(col("monthly_allowance").as_str())?, "monthly_allowance")?,
        price_cents: row.try_get(col("price_cents").as_str())?,
        active: row.try_get(col("active").as_str())?,
        description: row.try_get(col("description").as_str())?,
        benefits: row.try_get(col("benefits").as_str())?,
        created_at: row.try_get(col("created_at").as_str())?,
        updated_at: row.try_get(col("updated_at").as_str())?,
    })
}

fn subscription_from_row(row: &PgRow) -> LedgerResult<Subscription> {
    let status: String = row.try_get("status")?;
    let revision: i64 = row.try_get("revision")?;
    Ok(Subscription {
        company_id: CompanyId(row.try_get("company_id")?),
        package_id: PackageId(row.try_get("package_id")?),
        consumed: count(row.try_get("consumed")?, "consumed")?,
        carry_over: count(row.try_get("carry_over")?, "carry_over")?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        status: SubscriptionStatus::parse(&status)
            .ok_or_else(|| LedgerError::Internal(format!("unknown subscription status {status}")))?,
        revision: u64::try_from(revision)
            .map_err(|_| LedgerError::Internal(format!("revision out of range: {revision}")))?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn assignment_from_row(row: &PgRow) -> LedgerResult<Assignment> {
    let status: String = row.try_get("status")?;
    Ok(Assignment {
        id: AssignmentId(row.try_get("id")?),
        company_id: CompanyId(row.try_get("company_id")?),
        test_id: TestId(row.try_get("test_id")?),
        candidate_email: row.try_get("candidate_email")?,
        candidate_name: row.try_get("candidate_name")?,
        status: AssignmentStatus::parse(&status)
            .ok_or_else(|| LedgerError::Internal(format!("unknown assignment status {status}")))?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn view_from_row(row: &PgRow) -> LedgerResult<AssignmentView> {
    let assignment = assignment_from_row(row)?;
    let result_id: Option<String> = row.try_get("r_id")?;
    let latest_result = match result_id {
        Some(id) => Some(AssessmentResult {
            id: ResultId(id),
            assignment_id: assignment.id.clone(),
            company_id: assignment.company_id.clone(),
            personality_type: row.try_get("r_personality_type")?,
            created_at: row.try_get::<DateTime<Utc>, _>("r_created_at")?,
        }),
        None => None,
    };
    Ok(AssignmentView {
        assignment,
        latest_result,
    })
}

/// Translate constraint violations on package writes into domain errors
fn package_write_error(err: sqlx::Error, code: &str) -> LedgerError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return LedgerError::DuplicatePackage(code.to_string());
        }
        if db.is_foreign_key_violation() {
            return LedgerError::PackageInUse(code.to_string());
        }
    }
    err.into()
}

const VIEW_SELECT: &str = "SELECT a.id, a.company_id, a.test_id, a.candidate_email, a.candidate_name,
        a.status, a.created_at, a.completed_at,
        r.id AS r_id, r.personality_type AS r_personality_type, r.created_at AS r_created_at
    FROM assignments a
    LEFT JOIN LATERAL (
        SELECT id, personality_type, created_at FROM results
        WHERE results.assignment_id = a.id
        ORDER BY created_at DESC LIMIT 1
    ) r ON TRUE";

#[async_trait]
impl LedgerBackend for PgBackend {
    async fn insert_package(&self, package: Package) -> LedgerResult<Package> {
        sqlx::query(&format!(
            "INSERT INTO packages ({PACKAGE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(package.id.as_str())
        .bind(&package.code)
        .bind(&package.name)
        .bind(i64::from(package.monthly_allowance))
        .bind(package.price_cents)
        .bind(package.active)
        .bind(&package.description)
        .bind(&package.benefits)
        .bind(package.created_at)
        .bind(package.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| package_write_error(e, &package.code))?;

        Ok(package)
    }

    async fn list_packages(&self, include_inactive: bool) -> LedgerResult<Vec<Package>> {
        let rows = sqlx::query(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages WHERE $1 OR active ORDER BY price_cents, code"
        ))
        .bind(include_inactive)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| package_from_row(row, "")).collect()
    }

    async fn package_by_code(&self, code: &str) -> LedgerResult<Option<Package>> {
        let row = sqlx::query(&format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE code = $1"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(|row| package_from_row(row, "")).transpose()
    }

    async fn package_by_id(&self, id: &PackageId) -> LedgerResult<Option<Package>> {
        let row = sqlx::query(&format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(|row| package_from_row(row, "")).transpose()
    }

    async fn update_package(&self, package: Package) -> LedgerResult<Package> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(String, i64)> =
            sqlx::query_as("SELECT code, monthly_allowance FROM packages WHERE id = $1 FOR UPDATE")
                .bind(package.id.as_str())
                .fetch_optional(&mut *tx)
                .await?;
        let (current, allowance) = current.ok_or_else(|| LedgerError::PackageNotFound(package.id.to_string()))?;

        if current != package.code || allowance != i64::from(package.monthly_allowance) {
            let referenced: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM subscriptions WHERE package_id = $1)")
                    .bind(package.id.as_str())
                    .fetch_one(&mut *tx)
                    .await?;
            if referenced {
                return Err(LedgerError::PackageInUse(current));
            }
        }

        sqlx::query(
            "UPDATE packages SET code = $2, name = $3, monthly_allowance = $4, price_cents = $5,
                active = $6, description = $7, benefits = $8, updated_at = $9
             WHERE id = $1",
        )
        .bind(package.id.as_str())
        .bind(&package.code)
        .bind(&package.name)
        .bind(i64::from(package.monthly_allowance))
        .bind(package.price_cents)
        .bind(package.active)
        .bind(&package.description)
        .bind(&package.benefits)
        .bind(package.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| package_write_error(e, &package.code))?;

        tx.commit().await?;
        Ok(package)
    }

    async fn delete_package(&self, id: &PackageId) -> LedgerResult<()> {
        let package = self
            .package_by_id(id)
            .await?
            .ok_or_else(|| LedgerError::PackageNotFound(id.to_string()))?;

        let deleted = sqlx::query("DELETE FROM packages WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| package_write_error(e, &package.code))?;

        if deleted.rows_affected() == 0 {
            return Err(LedgerError::PackageNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn load_subscription(&self, company_id: &CompanyId) -> LedgerResult<Option<(Subscription, Package)>> {
        let row = sqlx::query(
            "SELECT s.company_id, s.package_id, s.consumed, s.carry_over, s.period_start, s.period_end,
                    s.status, s.revision, s.updated_at,
                    p.id AS p_id, p.code AS p_code, p.name AS p_name,
                    p.monthly_allowance AS p_monthly_allowance, p.price_cents AS p_price_cents,
                    p.active AS p_active, p.description AS p_description, p.benefits AS p_benefits,
                    p.created_at AS p_created_at, p.updated_at AS p_updated_at
             FROM subscriptions s JOIN packages p ON p.id = s.package_id
             WHERE s.company_id = $1",
        )
        .bind(company_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some((subscription_from_row(&row)?, package_from_row(&row, "p_")?)))
    }

    #[instrument(skip_all, fields(company_id = %next.company_id, revision = next.revision))]
    async fn replace_subscription(
        &self,
        next: Subscription,
        expected: Option<ExpectedLedger>,
    ) -> LedgerResult<bool> {
        let query = match expected {
            None => sqlx::query(INSERT_SUBSCRIPTION),
            Some(_) => sqlx::query(SWAP_SUBSCRIPTION),
        };

        let mut query = query
            .bind(next.company_id.as_str())
            .bind(next.package_id.as_str())
            .bind(i64::from(next.consumed))
            .bind(i64::from(next.carry_over))
            .bind(next.period_start)
            .bind(next.period_end)
            .bind(next.status.as_str())
            .bind(next.revision as i64)
            .bind(next.updated_at);
        if let Some(expected) = expected {
            query = query
                .bind(expected.revision as i64)
                .bind(i64::from(expected.consumed));
        }

        let applied = query.execute(&self.pool).await.map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                LedgerError::PackageNotFound(next.package_id.to_string())
            }
            _ => err.into(),
        })?;

        Ok(applied.rows_affected() == 1)
    }

    #[instrument(skip_all, fields(company_id = %guard.company_id, revision = guard.revision))]
    async fn try_consume(
        &self,
        guard: ConsumeGuard,
        assignment: Assignment,
    ) -> LedgerResult<Option<Subscription>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "UPDATE subscriptions SET consumed = consumed + 1, updated_at = $4
             WHERE company_id = $1 AND status = 'active' AND revision = $2 AND consumed < $3
             RETURNING {SUBSCRIPTION_COLUMNS}"
        ))
        .bind(guard.company_id.as_str())
        .bind(guard.revision as i64)
        .bind(i64::from(guard.total_allowance))
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            // Dropping the transaction rolls it back
            return Ok(None);
        };
        let updated = subscription_from_row(&row)?;

        sqlx::query(&format!(
            "INSERT INTO assignments ({ASSIGNMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(assignment.id.as_str())
        .bind(assignment.company_id.as_str())
        .bind(assignment.test_id.as_str())
        .bind(&assignment.candidate_email)
        .bind(&assignment.candidate_name)
        .bind(assignment.status.as_str())
        .bind(assignment.created_at)
        .bind(assignment.completed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn find_assignments(
        &self,
        company_id: &CompanyId,
        query: &AssignmentQuery,
    ) -> LedgerResult<(Vec<AssignmentView>, u64)> {
        let status = query.status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM assignments WHERE company_id = $1 AND ($2::TEXT IS NULL OR status = $2)",
        )
        .bind(company_id.as_str())
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(&format!(
            "{VIEW_SELECT}
             WHERE a.company_id = $1 AND ($2::TEXT IS NULL OR a.status = $2)
             ORDER BY a.created_at DESC, a.id DESC
             LIMIT $3 OFFSET $4"
        ))
        .bind(company_id.as_str())
        .bind(status)
        .bind(i64::from(query.limit))
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows.iter().map(view_from_row).collect::<LedgerResult<Vec<_>>>()?;
        Ok((items, total.max(0) as u64))
    }

    async fn get_assignment(
        &self,
        company_id: &CompanyId,
        id: &AssignmentId,
    ) -> LedgerResult<Option<AssignmentView>> {
        let row = sqlx::query(&format!("{VIEW_SELECT} WHERE a.id = $1 AND a.company_id = $2"))
            .bind(id.as_str())
            .bind(company_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(view_from_row).transpose()
    }

    async fn advance_assignment(&self, id: &AssignmentId, status: AssignmentStatus) -> LedgerResult<Assignment> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = $1 FOR UPDATE"))
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let mut assignment = match row {
            Some(row) => assignment_from_row(&row)?,
            None => return Err(LedgerError::NotFound(id.to_string())),
        };

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

        sqlx::query("UPDATE assignments SET status = $2, completed_at = $3 WHERE id = $1")
            .bind(id.as_str())
            .bind(assignment.status.as_str())
            .bind(assignment.completed_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(assignment)
    }

    async fn record_result(&self, result: AssessmentResult) -> LedgerResult<()> {
        let inserted = sqlx::query(
            "INSERT INTO results (id, assignment_id, company_id, personality_type, created_at)
             SELECT $1, $2, $3, $4, $5
             WHERE EXISTS (SELECT 1 FROM assignments WHERE id = $2 AND company_id = $3)",
        )
        .bind(result.id.as_str())
        .bind(result.assignment_id.as_str())
        .bind(result.company_id.as_str())
        .bind(&result.personality_type)
        .bind(result.created_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(LedgerError::NotFound(result.assignment_id.to_string()));
        }
        Ok(())
    }
}

/// Test catalog over the `tests` table. A `NULL` company makes a test global.
#[derive(Clone)]
pub struct PgTestCatalog {
    pool: PgPool,
}

impl PgTestCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a test; `company_id = None` makes it available to everyone
    pub async fn insert_test(&self, test_id: &TestId, company_id: Option<&CompanyId>) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO tests (id, company_id) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET company_id = EXCLUDED.company_id",
        )
        .bind(test_id.as_str())
        .bind(company_id.map(|c| c.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TestCatalog for PgTestCatalog {
    async fn test_exists(&self, company_id: &CompanyId, test_id: &TestId) -> LedgerResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM tests WHERE id = $1 AND (company_id IS NULL OR company_id = $2))",
        )
        .bind(test_id.as_str())
        .bind(company_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
