//! Connection & schema cache.
//!
//! [`ConnectionRegistry`] holds one live connection per distinct locator and,
//! per locator, one [`SchemaHandle`] for every entity kind in the locator's
//! catalog. Schemas are registered against a connection once, when it is
//! opened. Handles are created together with the locator's slot and survive
//! reconnects: a reopen rebinds the existing handles to the new connection, so
//! a `(locator, entity)` pair always yields the same handle until the locator
//! is explicitly closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::connector::{BackendConnector, ConnectOptions, Connector};
use crate::error::DatabaseError;
use crate::locator::DatabaseLocator;
use crate::schema::{EntityKind, SchemaDescriptor};
use crate::store::{Condition, DocumentStore, Mutation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Ready,
    Broken,
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Ready,
            1 => ConnectionState::Broken,
            _ => ConnectionState::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Ready => 0,
            ConnectionState::Broken => 1,
            ConnectionState::Closed => 2,
        }
    }
}

/// A live, pooled connection to one tenant database.
pub struct TenantConnection {
    generation: u64,
    locator: DatabaseLocator,
    store: Arc<dyn DocumentStore>,
    state: AtomicU8,
    opened_at: Instant,
}

impl std::fmt::Debug for TenantConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantConnection")
            .field("generation", &self.generation)
            .field("locator", &self.locator)
            .finish_non_exhaustive()
    }
}

impl TenantConnection {
    fn new(generation: u64, locator: DatabaseLocator, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            generation,
            locator,
            store,
            state: AtomicU8::new(ConnectionState::Ready.as_u8()),
            opened_at: Instant::now(),
        }
    }

    pub fn locator(&self) -> &DatabaseLocator {
        &self.locator
    }

    /// Monotonic id of the open that produced this connection; changes on reconnect.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub fn age(&self) -> std::time::Duration {
        self.opened_at.elapsed()
    }

    pub async fn ping(&self) -> Result<(), DatabaseError> {
        let result = self.store.ping().await;
        self.observe(result)
    }

    /// Flags the connection so the registry reopens it on next use.
    pub fn mark_broken(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Ready.as_u8(),
            ConnectionState::Broken.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub async fn close(&self) {
        let previous = self.state.swap(ConnectionState::Closed.as_u8(), Ordering::SeqCst);
        if ConnectionState::from_u8(previous) != ConnectionState::Closed {
            self.store.shutdown().await;
            debug!("Closed connection {} to {}", self.generation, self.locator);
        }
    }

    fn observe<T>(&self, result: Result<T, DatabaseError>) -> Result<T, DatabaseError> {
        if let Err(err) = &result {
            if err.is_connection_failure() {
                warn!("Connection {} to {} failed: {}", self.generation, self.locator, err);
                self.mark_broken();
            }
        }
        result
    }
}

struct SchemaBinding {
    descriptor: &'static SchemaDescriptor,
    database: String,
    connection: RwLock<Option<Arc<TenantConnection>>>,
}

/// Typed access to one collection of one tenant database.
#[derive(Clone)]
pub struct SchemaHandle {
    inner: Arc<SchemaBinding>,
}

impl std::fmt::Debug for SchemaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaHandle")
            .field("kind", &self.kind())
            .field("database", &self.inner.database)
            .finish()
    }
}

impl SchemaHandle {
    fn unbound(kind: EntityKind, database: &str) -> Self {
        Self {
            inner: Arc::new(SchemaBinding {
                descriptor: kind.descriptor(),
                database: database.to_string(),
                connection: RwLock::new(None),
            }),
        }
    }

    fn bind(&self, connection: Arc<TenantConnection>) {
        *self.inner.connection.write() = Some(connection);
    }

    fn unbind(&self) {
        *self.inner.connection.write() = None;
    }

    pub fn kind(&self) -> EntityKind {
        self.inner.descriptor.kind
    }

    pub fn collection(&self) -> &'static str {
        self.inner.descriptor.collection
    }

    pub fn database(&self) -> &str {
        &self.inner.database
    }

    pub fn descriptor(&self) -> &'static SchemaDescriptor {
        self.inner.descriptor
    }

    /// True when both handles are the same registration.
    pub fn ptr_eq(&self, other: &SchemaHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn connection(&self) -> Result<Arc<TenantConnection>, DatabaseError> {
        match self.inner.connection.read().as_ref() {
            Some(connection) if connection.is_ready() => Ok(Arc::clone(connection)),
            _ => Err(DatabaseError::NotReady(format!(
                "{}.{}",
                self.inner.database, self.inner.descriptor.collection
            ))),
        }
    }

    pub async fn insert<T: Serialize>(&self, record: &T) -> Result<(), DatabaseError> {
        let document = serde_json::to_value(record)?;
        self.inner.descriptor.validate(&document)?;

        let connection = self.connection()?;
        let result = connection.store.insert_one(self.collection(), document).await;
        connection.observe(result)
    }

    pub async fn find_by_id<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, DatabaseError> {
        self.find_one(&[Condition::id(id)]).await
    }

    pub async fn find_one<T: DeserializeOwned>(&self, conditions: &[Condition]) -> Result<Option<T>, DatabaseError> {
        let connection = self.connection()?;
        let result = connection.store.find_one(self.collection(), conditions).await;
        match connection.observe(result)? {
            Some(document) => Ok(Some(serde_json::from_value(document)?)),
            None => Ok(None),
        }
    }

    pub async fn find<T: DeserializeOwned>(&self, conditions: &[Condition]) -> Result<Vec<T>, DatabaseError> {
        let connection = self.connection()?;
        let result = connection.store.find_many(self.collection(), conditions).await;
        connection
            .observe(result)?
            .into_iter()
            .map(|document: Value| serde_json::from_value(document).map_err(DatabaseError::from))
            .collect()
    }

    /// Conditional update of the document with `id`. Returns `false` when no
    /// document matched the id together with every condition.
    pub async fn update(
        &self,
        id: &str,
        conditions: &[Condition],
        mutations: &[Mutation],
    ) -> Result<bool, DatabaseError> {
        let mut filter = Vec::with_capacity(conditions.len() + 1);
        filter.push(Condition::id(id));
        filter.extend_from_slice(conditions);

        let connection = self.connection()?;
        let result = connection.store.update_one(self.collection(), &filter, mutations).await;
        connection.observe(result)
    }
}

struct ConnectionSlot {
    locator: DatabaseLocator,
    catalog: &'static [EntityKind],
    current: Mutex<Option<Arc<TenantConnection>>>,
    /// Set under the `current` lock once the slot has left the registry.
    closed: AtomicBool,
    schemas: HashMap<EntityKind, SchemaHandle>,
}

impl ConnectionSlot {
    fn new(locator: DatabaseLocator, catalog: &'static [EntityKind]) -> Self {
        let schemas = catalog
            .iter()
            .map(|kind| (*kind, SchemaHandle::unbound(*kind, &locator.database)))
            .collect();

        Self {
            locator,
            catalog,
            current: Mutex::new(None),
            closed: AtomicBool::new(false),
            schemas,
        }
    }
}

/// Times `acquire` re-resolves a slot that was closed underneath it.
const MAX_SLOT_ATTEMPTS: usize = 3;

/// Process-wide owner of tenant connections. Construct one at start-up and
/// pass it (behind an `Arc`) to whatever needs database access.
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    options: ConnectOptions,
    slots: RwLock<HashMap<String, Arc<ConnectionSlot>>>,
    generations: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(options: ConnectOptions) -> Self {
        Self::with_connector(Arc::new(BackendConnector::new()), options)
    }

    pub fn with_connector(connector: Arc<dyn Connector>, options: ConnectOptions) -> Self {
        Self {
            connector,
            options,
            slots: RwLock::new(HashMap::new()),
            generations: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Live connection for a tenant database, opening or reopening it as needed.
    pub async fn get_connection(&self, locator: &DatabaseLocator) -> Result<Arc<TenantConnection>, DatabaseError> {
        self.acquire(locator, EntityKind::TENANT_SCOPED).await
    }

    /// Live connection for the central tenant directory.
    pub async fn get_directory_connection(
        &self,
        locator: &DatabaseLocator,
    ) -> Result<Arc<TenantConnection>, DatabaseError> {
        self.acquire(locator, EntityKind::DIRECTORY).await
    }

    /// Schema handle registered for `(database_name, kind)` on this connection.
    pub fn get_schema(
        &self,
        connection: &TenantConnection,
        database_name: &str,
        kind: EntityKind,
    ) -> Result<SchemaHandle, DatabaseError> {
        let unknown = || DatabaseError::UnknownSchema {
            database: database_name.to_string(),
            kind,
        };

        if connection.locator().database != database_name {
            return Err(unknown());
        }

        let slot = self
            .slots
            .read()
            .get(&connection.locator().cache_key())
            .cloned()
            .ok_or_else(|| DatabaseError::NotReady(connection.locator().redacted()))?;

        slot.schemas.get(&kind).cloned().ok_or_else(unknown)
    }

    /// Closes and forgets one locator's connection (tenant deprovisioning).
    /// Returns whether the locator was cached.
    pub async fn close(&self, locator: &DatabaseLocator) -> bool {
        let slot = self.slots.write().remove(&locator.cache_key());
        match slot {
            Some(slot) => {
                Self::close_slot(&slot).await;
                info!("Closed tenant database {}", locator);
                true
            }
            None => false,
        }
    }

    /// Closes every cached connection (graceful shutdown).
    pub async fn close_all(&self) {
        let slots: Vec<Arc<ConnectionSlot>> = self.slots.write().drain().map(|(_, slot)| slot).collect();
        let count = slots.len();

        futures::future::join_all(slots.iter().map(|slot| Self::close_slot(slot))).await;
        info!("Closed {} tenant database connection(s)", count);
    }

    /// Number of locators whose connection is currently ready.
    pub async fn open_connection_count(&self) -> usize {
        let slots: Vec<Arc<ConnectionSlot>> = self.slots.read().values().cloned().collect();
        let mut open = 0;
        for slot in slots {
            if slot.current.lock().await.as_ref().map(|c| c.is_ready()).unwrap_or(false) {
                open += 1;
            }
        }
        open
    }

    async fn close_slot(slot: &ConnectionSlot) {
        let mut current = slot.current.lock().await;
        slot.closed.store(true, Ordering::SeqCst);
        if let Some(connection) = current.take() {
            connection.close().await;
        }
        for handle in slot.schemas.values() {
            handle.unbind();
        }
    }

    fn slot_for(
        &self,
        locator: &DatabaseLocator,
        catalog: &'static [EntityKind],
    ) -> Result<Arc<ConnectionSlot>, DatabaseError> {
        let key = locator.cache_key();

        let existing = self.slots.read().get(&key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => self
                .slots
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(ConnectionSlot::new(locator.clone(), catalog)))
                .clone(),
        };

        if slot.catalog != catalog {
            return Err(DatabaseError::SchemaConflict {
                collection: locator.redacted(),
                reason: "locator is already registered with a different schema catalog".to_string(),
            });
        }

        Ok(slot)
    }

    async fn acquire(
        &self,
        locator: &DatabaseLocator,
        catalog: &'static [EntityKind],
    ) -> Result<Arc<TenantConnection>, DatabaseError> {
        locator.validate()?;

        for _ in 0..MAX_SLOT_ATTEMPTS {
            let slot = self.slot_for(locator, catalog)?;

            // Only callers for this locator wait here; other tenants use other slots.
            let mut current = slot.current.lock().await;
            if slot.closed.load(Ordering::SeqCst) {
                debug!("Slot for {} was closed while waiting, retrying", locator);
                continue;
            }

            return self.connect_slot(&slot, &mut current).await;
        }

        Err(DatabaseError::NotReady(locator.redacted()))
    }

    async fn connect_slot(
        &self,
        slot: &ConnectionSlot,
        current: &mut Option<Arc<TenantConnection>>,
    ) -> Result<Arc<TenantConnection>, DatabaseError> {
        if let Some(connection) = current.as_ref() {
            if connection.is_ready() {
                return Ok(Arc::clone(connection));
            }
            warn!(
                "Cached connection to {} is {:?}, reopening",
                slot.locator,
                connection.state()
            );
            connection.close().await;
        }
        *current = None;

        let connection = self.open(slot).await?;
        *current = Some(Arc::clone(&connection));
        Ok(connection)
    }

    async fn open(&self, slot: &ConnectionSlot) -> Result<Arc<TenantConnection>, DatabaseError> {
        let locator = &slot.locator;
        let timeout = self.options.connect_timeout;

        let attempt = async {
            let store = self.connector.connect(locator, &self.options).await?;
            for kind in slot.catalog {
                if let Err(err) = store.register_schema(kind.descriptor()).await {
                    store.shutdown().await;
                    return Err(err);
                }
            }
            Ok::<_, DatabaseError>(store)
        };

        let store = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(store)) => store,
            Ok(Err(err)) => {
                error!("Failed to open {}: {}", locator, err);
                return Err(err);
            }
            Err(_) => {
                error!("Opening {} timed out after {:?}", locator, timeout);
                return Err(DatabaseError::Timeout {
                    locator: locator.redacted(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let generation = self.generations.fetch_add(1, Ordering::SeqCst);
        let connection = Arc::new(TenantConnection::new(generation, locator.clone(), store));
        for handle in slot.schemas.values() {
            handle.bind(Arc::clone(&connection));
        }

        info!(
            "Opened {} connection {} to {} with {} schema(s)",
            connection.store.backend(),
            generation,
            locator,
            slot.catalog.len()
        );
        Ok(connection)
    }
}
