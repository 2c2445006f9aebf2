use std::time::Duration;

use crate::types::{AssignmentQuery, AssignmentStatus};

/// Configuration for the ledger engine
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Attempts for an optimistic ledger write before giving up
    pub max_attempts: u32,
    /// Linear backoff step between attempts
    pub retry_backoff: Duration,
    /// Bound on the admission critical section
    pub admit_timeout: Duration,
    /// Bound on a single notification dispatch.
    ///
    /// Dispatch runs after commit, so a caller of `admit` waits at most
    /// `admit_timeout + notify_timeout`.
    pub notify_timeout: Duration,
    /// Base URL the candidate access link is built from
    pub access_link_base: String,
    /// Page size when the caller does not ask for one
    pub paginate_default: u32,
    /// Largest page size a caller may ask for
    pub paginate_max: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff: Duration::from_millis(5),
            admit_timeout: Duration::from_secs(5),
            notify_timeout: Duration::from_secs(10),
            access_link_base: "http://localhost:3000".to_string(),
            paginate_default: 10,
            paginate_max: 100,
        }
    }
}

impl LedgerConfig {
    /// Whether a failed attempt number `attempt` (1-based) may be retried
    pub(crate) fn may_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    pub(crate) async fn backoff(&self, attempt: u32) {
        tokio::time::sleep(self.retry_backoff * attempt).await;
    }

    /// `{base}/assessment/{assignment_id}`
    pub fn access_link(&self, assignment_id: &str) -> String {
        format!(
            "{}/assessment/{}",
            self.access_link_base.trim_end_matches('/'),
            assignment_id
        )
    }

    /// Clamp caller paging input into a concrete query
    pub fn resolve_query(
        &self,
        page: Option<u32>,
        limit: Option<u32>,
        status: Option<AssignmentStatus>,
    ) -> AssignmentQuery {
        let max = self.paginate_max.max(1);
        AssignmentQuery {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(self.paginate_default).clamp(1, max),
            status,
        }
    }
}
