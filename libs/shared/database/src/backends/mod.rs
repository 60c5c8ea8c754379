//! Document-store backends, selected by the locator's scheme.
//!
//! | Backend | Scheme | Feature |
//! |---------|--------|---------|
//! | MongoDB | `mongodb://`, `mongodb+srv://` | `mongodb` (default) |
//! | Memory | `memory://` | always |

pub mod memory;

#[cfg(feature = "mongodb")]
pub mod mongo;

pub use memory::{MemoryDatabase, MemoryStore};

#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;
