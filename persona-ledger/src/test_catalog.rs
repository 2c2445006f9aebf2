//! Read-only view of the test catalog used by admission.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    LedgerResult,
    types::{CompanyId, TestId},
};

/// Existence/availability check against the (external) test catalog
#[async_trait]
pub trait TestCatalog: Send + Sync {
    /// Whether `test_id` exists and the company may assign it
    async fn test_exists(&self, company_id: &CompanyId, test_id: &TestId) -> LedgerResult<bool>;
}

/// In-memory catalog. A test is either global (available to every company)
/// or owned by a single company.
#[derive(Default)]
pub struct MemoryTestCatalog {
    tests: RwLock<HashMap<TestId, Option<CompanyId>>>,
}

impl MemoryTestCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a test every company may assign
    pub fn insert_global(&self, test_id: impl Into<TestId>) {
        self.tests.write().insert(test_id.into(), None);
    }

    /// Register a test only `company_id` may assign
    pub fn insert_for_company(&self, company_id: impl Into<CompanyId>, test_id: impl Into<TestId>) {
        self.tests.write().insert(test_id.into(), Some(company_id.into()));
    }
}

#[async_trait]
impl TestCatalog for MemoryTestCatalog {
    async fn test_exists(&self, company_id: &CompanyId, test_id: &TestId) -> LedgerResult<bool> {
        let tests = self.tests.read();
        Ok(match tests.get(test_id) {
            Some(None) => true,
            Some(Some(owner)) => owner == company_id,
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn company_tests_are_invisible_to_other_companies() {
        let catalog = MemoryTestCatalog::new();
        catalog.insert_global("mbti");
        catalog.insert_for_company("acme", "acme-culture");

        let acme = CompanyId::from("acme");
        let globex = CompanyId::from("globex");

        assert!(catalog.test_exists(&globex, &TestId::from("mbti")).await.unwrap());
        assert!(catalog.test_exists(&acme, &TestId::from("acme-culture")).await.unwrap());
        assert!(!catalog.test_exists(&globex, &TestId::from("acme-culture")).await.unwrap());
        assert!(!catalog.test_exists(&acme, &TestId::from("missing")).await.unwrap());
    }
}
