//! In-process document store.
//!
//! A [`MemoryDatabase`] holds the data of one logical database and outlives
//! the [`MemoryStore`] handles opened against it, the way a server outlives
//! client connections. Used for local development (`memory://` locators) and
//! tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::DatabaseError;
use crate::locator::BackendKind;
use crate::schema::SchemaDescriptor;
use crate::store::{Condition, DocumentStore, Mutation};

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    collections: RwLock<HashMap<String, Vec<Value>>>,
    schemas: RwLock<HashMap<String, &'static SchemaDescriptor>>,
    registrations: AtomicUsize,
}

impl MemoryDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of schema registrations that actually changed the database.
    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

pub struct MemoryStore {
    data: Arc<MemoryDatabase>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new(data: Arc<MemoryDatabase>) -> Self {
        Self {
            data,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DatabaseError::NotReady("memory store".to_string()));
        }
        Ok(())
    }

    fn check_unique(
        collection: &str,
        descriptor: Option<&SchemaDescriptor>,
        existing: &[Value],
        document: &Value,
    ) -> Result<(), DatabaseError> {
        let id = lookup(document, "_id");
        if existing.iter().any(|doc| lookup(doc, "_id") == id) {
            return Err(DatabaseError::DuplicateKey {
                collection: collection.to_string(),
                key: format!("_id: {}", id.cloned().unwrap_or(Value::Null)),
            });
        }

        if let Some(descriptor) = descriptor {
            for index in descriptor.unique_indexes() {
                let key: Vec<Option<&Value>> = index.fields.iter().map(|f| lookup(document, f)).collect();
                let clash = existing.iter().any(|doc| {
                    index
                        .fields
                        .iter()
                        .zip(key.iter())
                        .all(|(field, value)| lookup(doc, field) == *value)
                });
                if clash {
                    return Err(DatabaseError::DuplicateKey {
                        collection: collection.to_string(),
                        key: index.fields.join(","),
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        self.ensure_open()
    }

    async fn register_schema(&self, descriptor: &'static SchemaDescriptor) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        let mut schemas = self.data.schemas.write();
        match schemas.get(descriptor.collection) {
            Some(existing) if *existing == descriptor => Ok(()),
            Some(existing) => Err(DatabaseError::SchemaConflict {
                collection: descriptor.collection.to_string(),
                reason: format!("already registered as {}", existing.kind),
            }),
            None => {
                schemas.insert(descriptor.collection.to_string(), descriptor);
                drop(schemas);
                self.data
                    .collections
                    .write()
                    .entry(descriptor.collection.to_string())
                    .or_default();
                self.data.registrations.fetch_add(1, Ordering::SeqCst);
                debug!("Registered memory collection {}", descriptor.collection);
                Ok(())
            }
        }
    }

    async fn insert_one(&self, collection: &str, document: Value) -> Result<(), DatabaseError> {
        self.ensure_open()?;
        // Schema lock is released before the collection lock is taken.
        let descriptor = self.data.schemas.read().get(collection).copied();
        let mut collections = self.data.collections.write();
        let documents = collections.entry(collection.to_string()).or_default();
        Self::check_unique(collection, descriptor, documents, &document)?;
        documents.push(document);
        Ok(())
    }

    async fn find_one(&self, collection: &str, conditions: &[Condition]) -> Result<Option<Value>, DatabaseError> {
        self.ensure_open()?;
        let collections = self.data.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| matches_all(doc, conditions)))
            .cloned())
    }

    async fn find_many(&self, collection: &str, conditions: &[Condition]) -> Result<Vec<Value>, DatabaseError> {
        self.ensure_open()?;
        let collections = self.data.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches_all(doc, conditions))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_one(
        &self,
        collection: &str,
        conditions: &[Condition],
        mutations: &[Mutation],
    ) -> Result<bool, DatabaseError> {
        self.ensure_open()?;
        let mut collections = self.data.collections.write();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(document) = documents.iter_mut().find(|doc| matches_all(doc, conditions)) else {
            return Ok(false);
        };

        // Apply to a copy so a failing mutation leaves the stored document intact.
        let mut updated = document.clone();
        for mutation in mutations {
            apply(&mut updated, mutation)?;
        }
        *document = updated;
        Ok(true)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn matches_all(document: &Value, conditions: &[Condition]) -> bool {
    conditions.iter().all(|condition| match condition {
        Condition::Eq(path, expected) => lookup(document, path).unwrap_or(&Value::Null) == expected,
        Condition::Len(path, len) => lookup(document, path)
            .and_then(Value::as_array)
            .map(|items| items.len() == *len)
            .unwrap_or(false),
    })
}

fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn lookup_mut<'a>(document: &'a mut Value, path: &str) -> Result<&'a mut Value, DatabaseError> {
    let mut current = document;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => {
                let index = segment
                    .parse::<usize>()
                    .map_err(|_| DatabaseError::Query(format!("'{}' is not an array index in {}", segment, path)))?;
                items
                    .get_mut(index)
                    .ok_or_else(|| DatabaseError::Query(format!("index {} out of bounds in {}", index, path)))?
            }
            _ => {
                return Err(DatabaseError::Query(format!(
                    "cannot traverse into scalar at '{}' in {}",
                    segment, path
                )))
            }
        };
    }
    Ok(current)
}

fn apply(document: &mut Value, mutation: &Mutation) -> Result<(), DatabaseError> {
    match mutation {
        Mutation::Set(path, value) => {
            *lookup_mut(document, path)? = value.clone();
        }
        Mutation::Push(path, value) => {
            let target = lookup_mut(document, path)?;
            if target.as_object().map(Map::is_empty).unwrap_or(false) {
                *target = Value::Array(Vec::new());
            }
            match target {
                Value::Array(items) => items.push(value.clone()),
                _ => return Err(DatabaseError::Query(format!("{} is not an array", path))),
            }
        }
    }
    Ok(())
}
