use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use shared_database::DatabaseError;
use shared_models::auth::{Actor, ActorRole};
use shared_models::RecordId;

/// One audited state change, as stored in a tenant's `logs` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    #[serde(rename = "_id")]
    pub id: RecordId,
    pub tenant_id: String,
    pub actor_id: String,
    pub actor_name: String,
    pub actor_role: ActorRole,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        tenant_id: impl Into<String>,
        actor: &Actor,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            id: RecordId::generate(),
            tenant_id: tenant_id.into(),
            actor_id: actor.id.clone(),
            actor_name: actor.name.clone(),
            actor_role: actor.role,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            entity_name: None,
            details: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_entity_name(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuditError {
    #[error("Audit sink unavailable: {0}")]
    Sink(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
