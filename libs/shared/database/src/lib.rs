pub mod backends;
pub mod connector;
pub mod error;
pub mod locator;
pub mod registry;
pub mod schema;
pub mod store;

pub use connector::{BackendConnector, ConnectOptions, Connector};
pub use error::DatabaseError;
pub use locator::{BackendKind, DatabaseLocator};
pub use registry::{ConnectionRegistry, ConnectionState, SchemaHandle, TenantConnection};
pub use schema::{EntityKind, IndexSpec, SchemaDescriptor};
pub use store::{Condition, DocumentStore, Mutation};
