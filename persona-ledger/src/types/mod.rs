pub mod ids;
pub mod ctx;
pub mod package;
pub mod subscription;
pub mod assignment;
pub mod events;

pub use ids::{AssignmentId, CompanyId, PackageId, ResultId, TestId};
pub use ctx::CompanyCtx;
pub use package::{NewPackage, Package, PackagePatch};
pub use subscription::{ConsumeGuard, ExpectedLedger, Subscription, SubscriptionStatus, SubscriptionView};
pub use assignment::{
    AdmitRequest, AssessmentResult, Assignment, AssignmentQuery, AssignmentStatus, AssignmentView, Page,
};
pub use events::LedgerEvent;
