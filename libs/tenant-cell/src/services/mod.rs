pub mod registry;

pub use registry::{TenantContext, TenantRegistry};
