use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::models::AuditEvent;
use crate::services::sink::AuditSink;

/// Fans audit events out to every configured sink in the background.
///
/// Emission never fails the caller: a sink error is logged as a consistency
/// warning and the event is dropped for that sink.
#[derive(Clone, Default)]
pub struct AuditDispatcher {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditDispatcher {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn emit(&self, event: AuditEvent) -> JoinHandle<()> {
        let sinks = self.sinks.clone();
        tokio::spawn(async move { deliver(&sinks, &event).await })
    }
}

async fn deliver(sinks: &[Arc<dyn AuditSink>], event: &AuditEvent) {
    for sink in sinks {
        if let Err(err) = sink.record(event).await {
            warn!(
                target: "consistency",
                event_id = %event.id,
                tenant_id = %event.tenant_id,
                action = %event.action,
                entity_id = %event.entity_id,
                "Audit event not recorded: {}", err
            );
        }
    }
}
