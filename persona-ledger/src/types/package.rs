use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::PackageId;

/// A purchasable plan: monthly assignment allowance and price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: PackageId,

    /// Human-chosen unique code; frozen once a subscription references it
    pub code: String,

    pub name: String,

    /// Assignments granted per billing period
    pub monthly_allowance: u32,

    /// Monthly price in minor currency units
    pub price_cents: i64,

    pub active: bool,

    pub description: String,

    pub benefits: Vec<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

/// Input for the administrative create flow
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewPackage {
    #[validate(length(min = 1, max = 64, message = "code must be 1-64 characters"))]
    pub code: String,

    #[validate(length(min = 1, message = "name must not be empty"))]
    pub name: String,

    #[validate(range(min = 1, message = "monthly_allowance must be greater than zero"))]
    pub monthly_allowance: u32,

    #[validate(range(min = 0, message = "price_cents must not be negative"))]
    pub price_cents: i64,

    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub benefits: Vec<String>,
}

impl NewPackage {
    /// Free, active package with no description
    pub fn new(code: impl Into<String>, name: impl Into<String>, monthly_allowance: u32) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            monthly_allowance,
            price_cents: 0,
            active: true,
            description: String::new(),
            benefits: Vec::new(),
        }
    }

    pub fn with_price(mut self, price_cents: i64) -> Self {
        self.price_cents = price_cents;
        self
    }

    /// Trim user-entered text so that "  " does not pass as a code
    pub fn normalized(mut self) -> Self {
        self.code = self.code.trim().to_string();
        self.name = self.name.trim().to_string();
        self
    }

    /// Materialize a package row
    pub fn into_package(self, now: DateTime<Utc>) -> Package {
        Package {
            id: PackageId::new(),
            code: self.code,
            name: self.name,
            monthly_allowance: self.monthly_allowance,
            price_cents: self.price_cents,
            active: self.active,
            description: self.description,
            benefits: self.benefits,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PackagePatch {
    #[validate(length(min = 1, max = 64, message = "code must be 1-64 characters"))]
    pub code: Option<String>,

    #[validate(length(min = 1, message = "name must not be empty"))]
    pub name: Option<String>,

    #[validate(range(min = 1, message = "monthly_allowance must be greater than zero"))]
    pub monthly_allowance: Option<u32>,

    #[validate(range(min = 0, message = "price_cents must not be negative"))]
    pub price_cents: Option<i64>,

    pub active: Option<bool>,

    pub description: Option<String>,

    pub benefits: Option<Vec<String>>,
}

impl PackagePatch {
    pub fn normalized(mut self) -> Self {
        self.code = self.code.map(|c| c.trim().to_string());
        self.name = self.name.map(|n| n.trim().to_string());
        self
    }
}

impl Package {
    /// Apply a validated patch, returning the updated row
    pub fn patched(&self, patch: PackagePatch, now: DateTime<Utc>) -> Package {
        let mut next = self.clone();
        if let Some(code) = patch.code {
            next.code = code;
        }
        if let Some(name) = patch.name {
            next.name = name;
        }
        if let Some(allowance) = patch.monthly_allowance {
            next.monthly_allowance = allowance;
        }
        if let Some(price) = patch.price_cents {
            next.price_cents = price;
        }
        if let Some(active) = patch.active {
            next.active = active;
        }
        if let Some(description) = patch.description {
            next.description = description;
        }
        if let Some(benefits) = patch.benefits {
            next.benefits = benefits;
        }
        next.updated_at = now;
        next
    }

    /// Whether `other` keeps the code and allowance subscribers are bound to
    pub fn same_terms(&self, other: &Package) -> bool {
        self.code == other.code && self.monthly_allowance == other.monthly_allowance
    }
}
