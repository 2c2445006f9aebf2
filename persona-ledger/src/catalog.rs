use chrono::Utc;
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    LedgerError, LedgerResult,
    backend::LedgerBackend,
    types::{NewPackage, Package, PackageId, PackagePatch},
};

/// Administrative package management
pub struct PackageCatalog<'a> {
    backend: &'a dyn LedgerBackend,
}

impl<'a> PackageCatalog<'a> {
    pub(crate) fn new(backend: &'a dyn LedgerBackend) -> Self {
        Self { backend }
    }

    /// Validate and store a new package
    #[instrument(skip_all, fields(code = %input.code))]
    pub async fn create(&self, input: NewPackage) -> LedgerResult<Package> {
        let input = input.normalized();
        input.validate()?;

        let package = self.backend.insert_package(input.into_package(Utc::now())).await?;
        info!(package_id = %package.id, "package created");
        Ok(package)
    }

    /// Cheapest first
    pub async fn list(&self, include_inactive: bool) -> LedgerResult<Vec<Package>> {
        self.backend.list_packages(include_inactive).await
    }

    pub async fn get_by_code(&self, code: &str) -> LedgerResult<Package> {
        let code = code.trim();
        self.backend
            .package_by_code(code)
            .await?
            .ok_or_else(|| LedgerError::PackageNotFound(code.to_string()))
    }

    pub async fn get(&self, id: &PackageId) -> LedgerResult<Package> {
        self.backend
            .package_by_id(id)
            .await?
            .ok_or_else(|| LedgerError::PackageNotFound(id.to_string()))
    }

    /// Apply a partial update. Changing the code or allowance of a referenced
    /// package is refused by the store; publish a new package instead.
    #[instrument(skip(self, patch), fields(package_id = %id))]
    pub async fn update(&self, id: &PackageId, patch: PackagePatch) -> LedgerResult<Package> {
        let patch = patch.normalized();
        patch.validate()?;

        let current = self.get(id).await?;
        let package = self.backend.update_package(current.patched(patch, Utc::now())).await?;
        info!("package updated");
        Ok(package)
    }

    /// Soft removal: the package stops being offered, existing subscriptions keep it
    #[instrument(skip(self), fields(package_id = %id))]
    pub async fn deactivate(&self, id: &PackageId) -> LedgerResult<Package> {
        self.update(
            id,
            PackagePatch {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    /// Hard removal, refused while any subscription references the package
    #[instrument(skip(self), fields(package_id = %id))]
    pub async fn delete(&self, id: &PackageId) -> LedgerResult<()> {
        self.backend.delete_package(id).await?;
        info!("package deleted");
        Ok(())
    }
}
