pub mod extractor;

pub use extractor::{actor_middleware, extract_actor};
