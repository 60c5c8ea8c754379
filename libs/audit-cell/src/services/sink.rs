use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use shared_database::EntityKind;
use tenant_cell::TenantRegistry;

use crate::models::{AuditError, AuditEvent};

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Writes events to the structured log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        info!(
            target: "audit",
            event_id = %event.id,
            tenant_id = %event.tenant_id,
            actor_id = %event.actor_id,
            actor_role = %event.actor_role,
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            details = %event.details,
            "AUDIT: {}", event.action
        );
        Ok(())
    }
}

/// Persists events into the owning tenant's `logs` collection.
pub struct LogCollectionSink {
    tenants: Arc<TenantRegistry>,
}

impl LogCollectionSink {
    pub fn new(tenants: Arc<TenantRegistry>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl AuditSink for LogCollectionSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let ctx = self
            .tenants
            .open(&event.tenant_id)
            .await
            .map_err(|e| AuditError::Sink(e.to_string()))?;

        ctx.schema(EntityKind::Log)?.insert(event).await?;
        debug!("Stored audit event {} for tenant {}", event.id, event.tenant_id);
        Ok(())
    }
}

/// Keeps events in memory. Useful for local runs and for asserting on emitted
/// events in tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Waits up to one second for at least `count` events to arrive.
    pub async fn wait_for(&self, count: usize) -> Vec<AuditEvent> {
        for _ in 0..200 {
            if self.events.lock().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.events()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
