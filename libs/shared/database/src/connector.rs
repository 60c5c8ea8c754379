use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use shared_config::AppConfig;

use crate::backends::{MemoryDatabase, MemoryStore};
use crate::error::DatabaseError;
use crate::locator::{BackendKind, DatabaseLocator};
use crate::store::DocumentStore;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub max_pool_size: u32,
    pub app_name: String,
}

impl ConnectOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            max_pool_size: config.db_max_pool_size,
            ..Self::default()
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_pool_size: 10,
            app_name: "clinic-core".to_string(),
        }
    }
}

/// Opens raw backend connections. The registry owns caching and timeouts;
/// connectors only know how to reach a server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        locator: &DatabaseLocator,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn DocumentStore>, DatabaseError>;
}

/// Connector for every backend compiled into this build.
#[derive(Default)]
pub struct BackendConnector {
    memory: Mutex<HashMap<String, Arc<MemoryDatabase>>>,
}

impl BackendConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data behind a `memory://` locator, created on first use.
    pub fn memory_database(&self, locator: &DatabaseLocator) -> Arc<MemoryDatabase> {
        self.memory
            .lock()
            .entry(locator.cache_key())
            .or_insert_with(MemoryDatabase::new)
            .clone()
    }
}

#[async_trait]
impl Connector for BackendConnector {
    async fn connect(
        &self,
        locator: &DatabaseLocator,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn DocumentStore>, DatabaseError> {
        match locator.backend()? {
            BackendKind::Memory => Ok(Arc::new(MemoryStore::new(self.memory_database(locator)))),
            #[cfg(feature = "mongodb")]
            BackendKind::MongoDb => {
                let store = crate::backends::MongoStore::connect(locator, options).await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "mongodb"))]
            BackendKind::MongoDb => {
                let _ = options;
                Err(DatabaseError::UnsupportedLocator(format!(
                    "{} (built without the mongodb feature)",
                    locator.redacted()
                )))
            }
        }
    }
}
