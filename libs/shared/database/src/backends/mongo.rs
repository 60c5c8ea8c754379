//! MongoDB document store. One [`MongoStore`] wraps one pooled client bound to
//! one logical database.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Database, IndexModel};
use serde_json::Value;
use tracing::{debug, info};

use crate::connector::ConnectOptions;
use crate::error::DatabaseError;
use crate::locator::{BackendKind, DatabaseLocator};
use crate::schema::SchemaDescriptor;
use crate::store::{Condition, DocumentStore, Mutation};

const DUPLICATE_KEY: i32 = 11000;
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;

pub struct MongoStore {
    client: Client,
    database: Database,
    locator: String,
}

impl MongoStore {
    pub async fn connect(locator: &DatabaseLocator, options: &ConnectOptions) -> Result<Self, DatabaseError> {
        let display = locator.redacted();

        let mut client_options = ClientOptions::parse(&locator.connection_string)
            .await
            .map_err(|e| DatabaseError::Connection {
                locator: display.clone(),
                reason: e.to_string(),
            })?;
        client_options.connect_timeout = Some(options.connect_timeout);
        client_options.server_selection_timeout = Some(options.connect_timeout);
        client_options.max_pool_size = Some(options.max_pool_size);
        client_options.app_name = Some(options.app_name.clone());

        let client = Client::with_options(client_options).map_err(|e| DatabaseError::Connection {
            locator: display.clone(),
            reason: e.to_string(),
        })?;
        let database = client.database(&locator.database);

        let store = Self {
            client,
            database,
            locator: display,
        };

        // The driver connects lazily; a ping proves the server is reachable.
        store.ping().await?;
        info!("Connected to MongoDB database {}", store.locator);

        Ok(store)
    }

    fn map_error(&self, err: MongoError) -> DatabaseError {
        match err.kind.as_ref() {
            ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. } => {
                DatabaseError::Connection {
                    locator: self.locator.clone(),
                    reason: err.to_string(),
                }
            }
            ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY => {
                DatabaseError::DuplicateKey {
                    collection: self.locator.clone(),
                    key: write.message.clone(),
                }
            }
            ErrorKind::Command(command)
                if command.code == INDEX_OPTIONS_CONFLICT || command.code == INDEX_KEY_SPECS_CONFLICT =>
            {
                DatabaseError::SchemaConflict {
                    collection: self.locator.clone(),
                    reason: command.message.clone(),
                }
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

fn to_bson(value: &Value) -> Result<Bson, DatabaseError> {
    bson::to_bson(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn to_document(value: &Value) -> Result<Document, DatabaseError> {
    bson::to_document(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn from_document(document: Document) -> Result<Value, DatabaseError> {
    bson::from_document(document).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn filter(conditions: &[Condition]) -> Result<Document, DatabaseError> {
    let mut filter = Document::new();
    for condition in conditions {
        match condition {
            Condition::Eq(path, value) => {
                filter.insert(path.clone(), to_bson(value)?);
            }
            Condition::Len(path, len) => {
                filter.insert(path.clone(), doc! { "$size": *len as i64 });
            }
        }
    }
    Ok(filter)
}

fn update(mutations: &[Mutation]) -> Result<Document, DatabaseError> {
    let mut set = Document::new();
    let mut push = Document::new();
    for mutation in mutations {
        match mutation {
            Mutation::Set(path, value) => {
                set.insert(path.clone(), to_bson(value)?);
            }
            Mutation::Push(path, value) => {
                push.insert(path.clone(), to_bson(value)?);
            }
        }
    }

    let mut update = Document::new();
    if !set.is_empty() {
        update.insert("$set", set);
    }
    if !push.is_empty() {
        update.insert("$push", push);
    }
    Ok(update)
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> BackendKind {
        BackendKind::MongoDb
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| self.map_error(e))
    }

    async fn register_schema(&self, descriptor: &'static SchemaDescriptor) -> Result<(), DatabaseError> {
        let collection = self.database.collection::<Document>(descriptor.collection);

        for index in descriptor.indexes {
            let mut keys = Document::new();
            for field in index.fields {
                keys.insert(*field, 1);
            }
            let model = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(index.unique).build())
                .build();

            // Creating an identical index again is a server-side no-op.
            collection.create_index(model).await.map_err(|e| self.map_error(e))?;
        }

        debug!("Registered {} on {}", descriptor.collection, self.locator);
        Ok(())
    }

    async fn insert_one(&self, collection: &str, document: Value) -> Result<(), DatabaseError> {
        let document = to_document(&document)?;
        self.database
            .collection::<Document>(collection)
            .insert_one(document)
            .await
            .map(|_| ())
            .map_err(|e| self.map_error(e))
    }

    async fn find_one(&self, collection: &str, conditions: &[Condition]) -> Result<Option<Value>, DatabaseError> {
        let found = self
            .database
            .collection::<Document>(collection)
            .find_one(filter(conditions)?)
            .await
            .map_err(|e| self.map_error(e))?;

        found.map(from_document).transpose()
    }

    async fn find_many(&self, collection: &str, conditions: &[Condition]) -> Result<Vec<Value>, DatabaseError> {
        let cursor = self
            .database
            .collection::<Document>(collection)
            .find(filter(conditions)?)
            .await
            .map_err(|e| self.map_error(e))?;

        let documents: Vec<Document> = cursor.try_collect().await.map_err(|e| self.map_error(e))?;
        documents.into_iter().map(from_document).collect()
    }

    async fn update_one(
        &self,
        collection: &str,
        conditions: &[Condition],
        mutations: &[Mutation],
    ) -> Result<bool, DatabaseError> {
        let result = self
            .database
            .collection::<Document>(collection)
            .update_one(filter(conditions)?, update(mutations)?)
            .await
            .map_err(|e| self.map_error(e))?;

        Ok(result.matched_count > 0)
    }

    async fn shutdown(&self) {
        self.client.clone().shutdown().await;
        info!("Closed MongoDB client for {}", self.locator);
    }
}
