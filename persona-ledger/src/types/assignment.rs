use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{AssignmentId, CompanyId, ResultId, TestId};

/// Candidate progress through an assigned test.
///
/// Advances monotonically: `notStarted -> started -> completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssignmentStatus {
    NotStarted,
    Started,
    Completed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "notStarted",
            Self::Started => "started",
            Self::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "notStarted" => Some(Self::NotStarted),
            "started" => Some(Self::Started),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal single step forward
    pub fn can_advance_to(&self, next: AssignmentStatus) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Started) | (Self::Started, Self::Completed)
        )
    }
}

/// One candidate invited to one test on behalf of one company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: AssignmentId,
    pub company_id: CompanyId,
    pub test_id: TestId,
    pub candidate_email: String,
    pub candidate_name: String,
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Admission request as submitted by a company operator
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdmitRequest {
    #[validate(length(min = 1, message = "test_id is required"))]
    pub test_id: String,

    #[validate(email(message = "candidate_email must be a valid email"))]
    pub candidate_email: String,

    #[validate(length(min = 1, max = 200, message = "candidate_name must be 1-200 characters"))]
    pub candidate_name: String,

    /// Free text forwarded in the invitation email only
    #[serde(default)]
    pub note: Option<String>,
}

impl AdmitRequest {
    pub fn normalized(mut self) -> Self {
        self.test_id = self.test_id.trim().to_string();
        self.candidate_email = self.candidate_email.trim().to_lowercase();
        self.candidate_name = self.candidate_name.trim().to_string();
        self
    }

    /// Fresh `notStarted` assignment for this request
    pub fn to_assignment(&self, company_id: &CompanyId, now: DateTime<Utc>) -> Assignment {
        Assignment {
            id: AssignmentId::new(),
            company_id: company_id.clone(),
            test_id: TestId::from(self.test_id.as_str()),
            candidate_email: self.candidate_email.clone(),
            candidate_name: self.candidate_name.clone(),
            status: AssignmentStatus::NotStarted,
            created_at: now,
            completed_at: None,
        }
    }
}

/// Scoring output for a completed assignment, written by the assessment flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentResult {
    pub id: ResultId,
    pub assignment_id: AssignmentId,
    pub company_id: CompanyId,
    pub personality_type: String,
    pub created_at: DateTime<Utc>,
}

/// Assignment enriched with its latest result, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentView {
    #[serde(flatten)]
    pub assignment: Assignment,

    pub latest_result: Option<AssessmentResult>,
}

/// Resolved listing query; `page` is 1-based
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentQuery {
    pub page: u32,
    pub limit: u32,
    pub status: Option<AssignmentStatus>,
}

impl AssignmentQuery {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}
