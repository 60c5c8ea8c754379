use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shared_database::{DatabaseError, DatabaseLocator};
use shared_models::error::AppError;
use shared_models::RecordId;

/// Feature flag that enables virtual (video) appointments for a tenant.
pub const VIDEO_CONSULTATIONS: &str = "video_consultations";

/// A clinic organisation with its own isolated database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    #[serde(rename = "_id")]
    pub id: RecordId,
    pub name: String,
    pub slug: String,
    pub locator: DatabaseLocator,
    pub is_active: bool,
    #[serde(default)]
    pub features: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub slug: String,
    pub locator: DatabaseLocator,
    #[serde(default)]
    pub features: Vec<String>,
}

impl NewTenant {
    pub fn validate(&self) -> Result<(), TenantError> {
        if self.name.trim().is_empty() {
            return Err(TenantError::Validation("Tenant name is required".to_string()));
        }

        let slug_ok = !self.slug.is_empty()
            && self.slug.len() <= 63
            && !self.slug.starts_with('-')
            && !self.slug.ends_with('-')
            && self
                .slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !slug_ok {
            return Err(TenantError::Validation(format!(
                "Invalid tenant slug '{}': use lowercase letters, digits and inner hyphens",
                self.slug
            )));
        }

        self.locator
            .validate()
            .map_err(|e| TenantError::Validation(e.to_string()))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TenantError {
    #[error("Tenant not found: {0}")]
    NotFound(String),

    #[error("Tenant is inactive: {0}")]
    Inactive(String),

    #[error("Tenant already exists: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<TenantError> for AppError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::NotFound(_) => AppError::NotFound(err.to_string()),
            TenantError::Inactive(_) => AppError::Forbidden(err.to_string()),
            TenantError::Conflict(_) => AppError::Conflict(err.to_string()),
            TenantError::Validation(msg) => AppError::ValidationError(msg),
            TenantError::Database(e) => e.into(),
        }
    }
}
