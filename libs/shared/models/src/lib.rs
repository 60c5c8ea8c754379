pub mod auth;
pub mod error;
pub mod id;

pub use auth::{Actor, ActorRole};
pub use error::AppError;
pub use id::RecordId;
