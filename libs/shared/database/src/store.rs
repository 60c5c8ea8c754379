use async_trait::async_trait;
use serde_json::Value;

use crate::error::DatabaseError;
use crate::locator::BackendKind;
use crate::schema::SchemaDescriptor;

/// Filter predicate over a dotted field path. Numeric path segments index
/// into arrays, e.g. `date_exceptions.0.intervals.3.occupied`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the value. A missing field compares equal to `null`.
    Eq(String, Value),
    /// Field is an array with exactly this many elements.
    Len(String, usize),
}

impl Condition {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Eq(path.into(), value.into())
    }

    pub fn len(path: impl Into<String>, len: usize) -> Self {
        Condition::Len(path.into(), len)
    }

    pub fn id(id: impl Into<String>) -> Self {
        Condition::Eq("_id".to_string(), Value::String(id.into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set(String, Value),
    Push(String, Value),
}

impl Mutation {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Mutation::Set(path.into(), value.into())
    }

    pub fn push(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Mutation::Push(path.into(), value.into())
    }
}

/// A live connection to one logical database.
///
/// Updates are conditional: `update_one` applies its mutations to the first
/// document matching every condition and reports whether one matched, which
/// is how callers express compare-and-set writes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn backend(&self) -> BackendKind;

    async fn ping(&self) -> Result<(), DatabaseError>;

    /// Registers a collection shape. Registering an identical descriptor again
    /// is a no-op; a different shape for an existing collection is a
    /// [`DatabaseError::SchemaConflict`].
    async fn register_schema(&self, descriptor: &'static SchemaDescriptor) -> Result<(), DatabaseError>;

    async fn insert_one(&self, collection: &str, document: Value) -> Result<(), DatabaseError>;

    async fn find_one(&self, collection: &str, conditions: &[Condition]) -> Result<Option<Value>, DatabaseError>;

    async fn find_many(&self, collection: &str, conditions: &[Condition]) -> Result<Vec<Value>, DatabaseError>;

    async fn update_one(
        &self,
        collection: &str,
        conditions: &[Condition],
        mutations: &[Mutation],
    ) -> Result<bool, DatabaseError>;

    async fn shutdown(&self);
}
