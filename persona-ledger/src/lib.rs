//! # persona-ledger: Subscription Quota and Assignment Admission
//!
//! **Per-company assignment allowance with carry-over and race-free admission**
//!
//! Companies on the assessment platform subscribe to a package granting a
//! monthly number of test assignments. This crate owns the rules around that
//! number:
//!
//! - **Package catalog**: administrators define packages (code, allowance, price).
//! - **Subscription ledger**: one row per company tracking `consumed` and
//!   `carry_over`; switching packages carries unused allowance forward.
//! - **Admission**: creating an assignment consumes one unit, and never lets
//!   `consumed` exceed `allowance + carry_over`, even under concurrent requests.
//! - **Notification**: the candidate invitation is sent after commit and its
//!   failure never undoes an admission.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use persona_ledger::prelude::*;
//!
//! # async fn run() -> LedgerResult<()> {
//! let tests = Arc::new(MemoryTestCatalog::new());
//! tests.insert_global("big-five");
//!
//! let engine = LedgerEngine::new(Arc::new(MemoryBackend::new()), tests);
//! engine.catalog().create(NewPackage::new("starter", "Starter", 5)).await?;
//!
//! let ctx = CompanyCtx::new("company_123");
//! engine.ledger().subscribe_package(&ctx, "starter").await?;
//!
//! let admission = engine
//!     .admission()
//!     .admit(&ctx, AdmitRequest {
//!         test_id: "big-five".into(),
//!         candidate_email: "ada@example.com".into(),
//!         candidate_name: "Ada".into(),
//!         note: None,
//!     })
//!     .await?;
//! println!("invite link: {}", admission.access_link);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod types;
pub mod error;
pub mod config;
pub mod accountant;
pub mod backend;
pub mod catalog;
pub mod ledger;
pub mod admission;
pub mod notify;
pub mod test_catalog;
pub mod observability;

pub use engine::LedgerEngine;
pub use types::{
    AdmitRequest, AssessmentResult, Assignment, AssignmentId, AssignmentQuery, AssignmentStatus,
    AssignmentView, CompanyCtx, CompanyId, ConsumeGuard, ExpectedLedger, LedgerEvent, NewPackage,
    Package, PackageId, PackagePatch, Page, ResultId, Subscription, SubscriptionStatus,
    SubscriptionView, TestId,
};
pub use error::{FieldErrors, LedgerError, LedgerResult};
pub use config::LedgerConfig;
pub use backend::LedgerBackend;
pub use catalog::PackageCatalog;
pub use ledger::SubscriptionLedger;
pub use admission::{Admission, AdmissionController, NotificationReport};
pub use notify::{AssignmentEmail, LogDispatcher, NotificationDispatcher, NotificationStatus};
pub use test_catalog::{MemoryTestCatalog, TestCatalog};
pub use observability::{BoxStream, EventHub};

// Backend implementations
#[cfg(feature = "memory")]
pub use backend::memory::MemoryBackend;

#[cfg(feature = "postgres")]
pub use backend::postgres::{PgBackend, PgTestCatalog};

pub mod prelude {
    pub use crate::{
        AdmitRequest, Admission, AssignmentStatus, CompanyCtx, LedgerEngine, LedgerError,
        LedgerResult, MemoryTestCatalog, NewPackage, NotificationDispatcher, NotificationStatus,
        PackagePatch, TestCatalog,
    };

    #[cfg(feature = "memory")]
    pub use crate::MemoryBackend;
}
