use std::collections::BTreeMap;

use thiserror::Error;

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Field name -> human readable messages, as rendered back to the dashboard.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Domain and infrastructure errors raised by the quota engine
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Company has no active subscription")]
    NoSubscription,

    #[error("Limit of {allowance} assignments reached")]
    QuotaExceeded { allowance: u32 },

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Package is not active: {0}")]
    PackageInactive(String),

    #[error("Package is referenced by a subscription: {0}")]
    PackageInUse(String),

    #[error("Package code already exists: {0}")]
    DuplicatePackage(String),

    #[error("Test not found: {0}")]
    TestNotFound(String),

    /// Missing, or owned by another company. The two cases are not distinguished.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A conditional write lost against a concurrent writer.
    #[error("Concurrent modification of the subscription ledger")]
    ConcurrencyConflict,

    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("Invalid assignment transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Notification dispatch failed: {0}")]
    Notification(String),

    /// Store reachable but the statement failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Pool exhausted, connection dropped, and similar faults worth another attempt.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Whether the engine may retry the operation that produced this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict | Self::StoreUnavailable(_))
    }
}

impl From<validator::ValidationErrors> for LedgerError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = FieldErrors::new();
        for (field, errs) in errors.field_errors() {
            let messages = errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            fields.insert(field.to_string(), messages);
        }
        Self::Validation(fields)
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => Self::ConcurrencyConflict,
                _ => Self::Store(err.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::StoreUnavailable(err.to_string())
            }
            _ => Self::Store(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Probe {
        #[validate(range(min = 1, message = "must be positive"))]
        allowance: u32,
        #[validate(length(min = 1))]
        code: String,
    }

    #[test]
    fn validation_errors_keep_messages_and_fall_back_to_codes() {
        let err: LedgerError = Probe { allowance: 0, code: String::new() }
            .validate()
            .unwrap_err()
            .into();

        let LedgerError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        assert_eq!(fields["allowance"], vec!["must be positive".to_string()]);
        assert_eq!(fields["code"], vec!["length".to_string()]);
    }

    #[test]
    fn only_conflicts_and_unavailable_store_are_transient() {
        assert!(LedgerError::ConcurrencyConflict.is_transient());
        assert!(LedgerError::StoreUnavailable("pool".into()).is_transient());
        assert!(!LedgerError::QuotaExceeded { allowance: 5 }.is_transient());
        assert!(!LedgerError::Store("syntax".into()).is_transient());
    }

    #[test]
    fn quota_message_names_the_allowance() {
        let err = LedgerError::QuotaExceeded { allowance: 12 };
        assert_eq!(err.to_string(), "Limit of 12 assignments reached");
    }
}
