pub mod dispatcher;
pub mod sink;

pub use dispatcher::AuditDispatcher;
pub use sink::{AuditSink, LogCollectionSink, MemoryAuditSink, TracingAuditSink};
