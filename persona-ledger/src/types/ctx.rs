use serde::{Deserialize, Serialize};

use super::CompanyId;

/// Company-scoped context carried into every ledger operation.
///
/// The identity layer has already authorized the caller as a member of
/// `company_id`; the engine only uses it for scoping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyCtx {
    /// Company the operation runs on behalf of
    pub company_id: CompanyId,

    /// Optional request ID for log correlation
    pub request_id: Option<String>,
}

impl CompanyCtx {
    /// Create a new context for the given company
    pub fn new(company_id: impl Into<CompanyId>) -> Self {
        Self {
            company_id: company_id.into(),
            request_id: None,
        }
    }

    /// Add a request ID for request correlation
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}
