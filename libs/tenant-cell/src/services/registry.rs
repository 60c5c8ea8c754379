use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use shared_database::{
    Condition, ConnectionRegistry, DatabaseError, DatabaseLocator, EntityKind, Mutation, SchemaHandle,
    TenantConnection,
};
use shared_models::RecordId;

use crate::models::{NewTenant, Tenant, TenantError};

/// Everything a request needs to reach its tenant's data.
#[derive(Clone)]
pub struct TenantContext {
    pub tenant: Arc<Tenant>,
    pub connection: Arc<TenantConnection>,
    connections: Arc<ConnectionRegistry>,
}

impl std::fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContext")
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}

impl TenantContext {
    pub fn tenant_id(&self) -> &str {
        self.tenant.id.as_str()
    }

    pub fn schema(&self, kind: EntityKind) -> Result<SchemaHandle, DatabaseError> {
        self.connections
            .get_schema(&self.connection, &self.tenant.locator.database, kind)
    }
}

#[derive(Default)]
struct TenantCache {
    by_key: HashMap<String, Arc<Tenant>>,
    /// Ids deactivated by this process. A directory read that started before
    /// the deactivation must not re-cache the tenant.
    deactivated: HashSet<String>,
}

/// Resolves tenants from the central directory.
///
/// Active tenants are cached for the lifetime of the process under both their
/// id and slug; deactivation evicts them.
pub struct TenantRegistry {
    connections: Arc<ConnectionRegistry>,
    directory: DatabaseLocator,
    cache: RwLock<TenantCache>,
}

impl TenantRegistry {
    pub fn new(connections: Arc<ConnectionRegistry>, directory: DatabaseLocator) -> Self {
        Self {
            connections,
            directory,
            cache: RwLock::new(TenantCache::default()),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    async fn tenants(&self) -> Result<SchemaHandle, DatabaseError> {
        let connection = self.connections.get_directory_connection(&self.directory).await?;
        self.connections
            .get_schema(&connection, &self.directory.database, EntityKind::Tenant)
    }

    async fn load(&self, key: &str) -> Result<Option<Tenant>, TenantError> {
        let tenants = self.tenants().await?;

        if let Ok(id) = RecordId::parse(key) {
            if let Some(tenant) = tenants.find_by_id::<Tenant>(id.as_str()).await? {
                return Ok(Some(tenant));
            }
        }

        Ok(tenants.find_one(&[Condition::eq("slug", key)]).await?)
    }

    /// Looks a tenant up by id or slug.
    pub async fn resolve(&self, key: &str) -> Result<Arc<Tenant>, TenantError> {
        if let Some(tenant) = self.cache.read().by_key.get(key) {
            return Ok(Arc::clone(tenant));
        }

        debug!("Tenant {} not cached, loading from directory", key);
        let tenant = self
            .load(key)
            .await?
            .ok_or_else(|| TenantError::NotFound(key.to_string()))?;

        if !tenant.is_active {
            warn!("Rejected request for inactive tenant {}", tenant.slug);
            return Err(TenantError::Inactive(tenant.slug));
        }

        let tenant = Arc::new(tenant);
        let mut cache = self.cache.write();
        if cache.deactivated.contains(tenant.id.as_str()) {
            warn!("Tenant {} was deactivated during lookup", tenant.slug);
            return Err(TenantError::Inactive(tenant.slug.clone()));
        }
        cache.by_key.insert(tenant.id.to_string(), Arc::clone(&tenant));
        cache.by_key.insert(tenant.slug.clone(), Arc::clone(&tenant));

        Ok(tenant)
    }

    /// Resolves the tenant and acquires its database connection.
    pub async fn open(&self, key: &str) -> Result<TenantContext, TenantError> {
        let tenant = self.resolve(key).await?;
        let connection = self.connections.get_connection(&tenant.locator).await?;

        Ok(TenantContext {
            tenant,
            connection,
            connections: Arc::clone(&self.connections),
        })
    }

    pub async fn create_tenant(&self, request: NewTenant) -> Result<Tenant, TenantError> {
        request.validate()?;

        let tenant = Tenant {
            id: RecordId::generate(),
            name: request.name.trim().to_string(),
            slug: request.slug,
            locator: request.locator,
            is_active: true,
            features: request.features,
            created_at: Utc::now(),
            deactivated_at: None,
        };

        let tenants = self.tenants().await?;
        match tenants.insert(&tenant).await {
            Ok(()) => {}
            Err(DatabaseError::DuplicateKey { .. }) => {
                return Err(TenantError::Conflict(tenant.slug));
            }
            Err(e) => return Err(e.into()),
        }

        info!("Created tenant {} ({}) on {}", tenant.slug, tenant.id, tenant.locator);
        Ok(tenant)
    }

    /// Soft-deactivates a tenant and releases its database connection.
    pub async fn deactivate_tenant(&self, key: &str) -> Result<Tenant, TenantError> {
        let mut tenant = self
            .load(key)
            .await?
            .ok_or_else(|| TenantError::NotFound(key.to_string()))?;

        if !tenant.is_active {
            return Err(TenantError::Inactive(tenant.slug));
        }

        let now = Utc::now();
        let tenants = self.tenants().await?;
        let updated = tenants
            .update(
                tenant.id.as_str(),
                &[Condition::eq("is_active", true)],
                &[
                    Mutation::set("is_active", false),
                    Mutation::set("deactivated_at", serde_json::to_value(now).map_err(DatabaseError::from)?),
                ],
            )
            .await?;
        if !updated {
            return Err(TenantError::Inactive(tenant.slug));
        }

        {
            let mut cache = self.cache.write();
            cache.deactivated.insert(tenant.id.to_string());
            cache.by_key.remove(tenant.id.as_str());
            cache.by_key.remove(&tenant.slug);
        }
        self.connections.close(&tenant.locator).await;

        tenant.is_active = false;
        tenant.deactivated_at = Some(now);
        info!("Deactivated tenant {} ({})", tenant.slug, tenant.id);
        Ok(tenant)
    }
}
