use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use persona_ledger::{AssignmentStatus, CompanyCtx, CompanyId};
use serde::Deserialize;

use crate::ApiError;

pub const COMPANY_HEADER: &str = "x-company-id";
pub const ROLE_HEADER: &str = "x-caller-role";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Role asserted by the upstream auth layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerRole {
    Admin,
    Company,
    Candidate,
}

impl CallerRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "company" => Some(Self::Company),
            "candidate" => Some(Self::Candidate),
            _ => None,
        }
    }
}

/// Caller identity as forwarded by the trusted auth layer.
///
/// The headers are not verified here; whoever fronts this router is expected
/// to have authenticated the request and stripped spoofed values.
#[derive(Debug, Clone)]
pub struct Caller {
    pub company_id: Option<CompanyId>,
    pub role: CallerRole,
    pub request_id: Option<String>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Caller {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let role = match header(headers, ROLE_HEADER) {
            Some(raw) => CallerRole::parse(&raw)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown caller role: {raw}")))?,
            None => CallerRole::Company,
        };

        Ok(Self {
            company_id: header(headers, COMPANY_HEADER).map(CompanyId::from),
            role,
            request_id: header(headers, REQUEST_ID_HEADER),
        })
    }

    /// Context for company-scoped routes. Candidates never manage quota.
    pub fn company_ctx(&self) -> Result<CompanyCtx, ApiError> {
        if self.role == CallerRole::Candidate {
            return Err(ApiError::forbidden("Candidates cannot manage company assignments"));
        }

        let company_id = self
            .company_id
            .clone()
            .ok_or_else(|| ApiError::not_authenticated(format!("Missing {COMPANY_HEADER} header")))?;

        let ctx = CompanyCtx::new(company_id);
        Ok(match &self.request_id {
            Some(id) => ctx.with_request_id(id.clone()),
            None => ctx,
        })
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        match self.role {
            CallerRole::Admin => Ok(()),
            _ => Err(ApiError::forbidden("Administrator role required")),
        }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Caller::from_headers(&parts.headers)
    }
}

/// `GET /packages` query string
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageListParams {
    #[serde(default)]
    pub include_inactive: bool,
}

/// `GET /assignments` query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignmentListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub status: Option<String>,
}

impl AssignmentListParams {
    pub fn status(&self) -> Result<Option<AssignmentStatus>, ApiError> {
        match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(raw) => AssignmentStatus::parse(raw)
                .map(Some)
                .ok_or_else(|| ApiError::bad_request(format!("Unknown assignment status: {raw}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_company_is_not_authenticated() {
        let caller = Caller::from_headers(&HeaderMap::new()).unwrap();
        assert_eq!(caller.role, CallerRole::Company);
        assert_eq!(caller.company_ctx().unwrap_err().code(), 401);
    }

    #[test]
    fn headers_build_a_company_context() {
        let mut headers = HeaderMap::new();
        headers.insert(COMPANY_HEADER, HeaderValue::from_static(" acme "));
        headers.insert(ROLE_HEADER, HeaderValue::from_static("Admin"));
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-1"));

        let caller = Caller::from_headers(&headers).unwrap();
        assert!(caller.require_admin().is_ok());

        let ctx = caller.company_ctx().unwrap();
        assert_eq!(ctx.company_id.as_str(), "acme");
        assert_eq!(ctx.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn candidates_are_kept_out_of_company_routes() {
        let mut headers = HeaderMap::new();
        headers.insert(COMPANY_HEADER, HeaderValue::from_static("acme"));
        headers.insert(ROLE_HEADER, HeaderValue::from_static("candidate"));

        let caller = Caller::from_headers(&headers).unwrap();
        assert_eq!(caller.company_ctx().unwrap_err().code(), 403);
        assert_eq!(caller.require_admin().unwrap_err().code(), 403);
    }

    #[test]
    fn unknown_status_filter_is_rejected() {
        let params = AssignmentListParams {
            status: Some("archived".into()),
            ..Default::default()
        };
        assert_eq!(params.status().unwrap_err().code(), 400);

        let params = AssignmentListParams {
            status: Some("completed".into()),
            ..Default::default()
        };
        assert_eq!(params.status().unwrap(), Some(AssignmentStatus::Completed));
    }
}
