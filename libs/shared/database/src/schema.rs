use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DatabaseError;

/// Every record kind the platform stores. All but [`EntityKind::Tenant`] live in
/// a tenant's own database; tenants live in the central directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Patient,
    Doctor,
    Appointment,
    Hospital,
    Specialty,
    Insurance,
    Log,
    Meeting,
    Tenant,
}

impl EntityKind {
    /// Schemas registered on every tenant connection.
    pub const TENANT_SCOPED: &'static [EntityKind] = &[
        EntityKind::Patient,
        EntityKind::Doctor,
        EntityKind::Appointment,
        EntityKind::Hospital,
        EntityKind::Specialty,
        EntityKind::Insurance,
        EntityKind::Log,
        EntityKind::Meeting,
    ];

    /// Schemas registered on the central directory connection.
    pub const DIRECTORY: &'static [EntityKind] = &[EntityKind::Tenant];

    pub fn descriptor(&self) -> &'static SchemaDescriptor {
        match self {
            EntityKind::Patient => &PATIENT,
            EntityKind::Doctor => &DOCTOR,
            EntityKind::Appointment => &APPOINTMENT,
            EntityKind::Hospital => &HOSPITAL,
            EntityKind::Specialty => &SPECIALTY,
            EntityKind::Insurance => &INSURANCE,
            EntityKind::Log => &LOG,
            EntityKind::Meeting => &MEETING,
            EntityKind::Tenant => &TENANT,
        }
    }

    pub fn collection(&self) -> &'static str {
        self.descriptor().collection
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Patient => "Patient",
            EntityKind::Doctor => "Doctor",
            EntityKind::Appointment => "Appointment",
            EntityKind::Hospital => "Hospital",
            EntityKind::Specialty => "Specialty",
            EntityKind::Insurance => "Insurance",
            EntityKind::Log => "Log",
            EntityKind::Meeting => "Meeting",
            EntityKind::Tenant => "Tenant",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub fields: &'static [&'static str],
    pub unique: bool,
}

/// Statically-defined shape of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    pub kind: EntityKind,
    pub collection: &'static str,
    pub required_fields: &'static [&'static str],
    pub indexes: &'static [IndexSpec],
}

impl SchemaDescriptor {
    /// Checks that every required top-level field is present and not null.
    pub fn validate(&self, document: &Value) -> Result<(), DatabaseError> {
        let object = document.as_object().ok_or_else(|| {
            DatabaseError::Serialization(format!(
                "{} documents must be JSON objects",
                self.collection
            ))
        })?;

        for field in std::iter::once(&"_id").chain(self.required_fields.iter()) {
            match object.get(*field) {
                Some(Value::Null) | None => {
                    return Err(DatabaseError::MissingField {
                        collection: self.collection.to_string(),
                        field: field.to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    pub fn unique_indexes(&self) -> impl Iterator<Item = &IndexSpec> {
        self.indexes.iter().filter(|index| index.unique)
    }
}

static PATIENT: SchemaDescriptor = SchemaDescriptor {
    kind: EntityKind::Patient,
    collection: "patients",
    required_fields: &["first_name", "last_name"],
    indexes: &[IndexSpec { fields: &["email"], unique: false }],
};

static DOCTOR: SchemaDescriptor = SchemaDescriptor {
    kind: EntityKind::Doctor,
    collection: "doctors",
    required_fields: &["first_name", "last_name", "appointment_duration", "weekly_template"],
    indexes: &[IndexSpec { fields: &["specialty_id"], unique: false }],
};

static APPOINTMENT: SchemaDescriptor = SchemaDescriptor {
    kind: EntityKind::Appointment,
    collection: "appointments",
    required_fields: &["patient_id", "appointment_type", "status"],
    indexes: &[
        IndexSpec { fields: &["doctor_id", "date"], unique: false },
        IndexSpec { fields: &["patient_id"], unique: false },
    ],
};

static HOSPITAL: SchemaDescriptor = SchemaDescriptor {
    kind: EntityKind::Hospital,
    collection: "hospitals",
    required_fields: &["name"],
    indexes: &[],
};

static SPECIALTY: SchemaDescriptor = SchemaDescriptor {
    kind: EntityKind::Specialty,
    collection: "specialties",
    required_fields: &["name"],
    indexes: &[IndexSpec { fields: &["name"], unique: true }],
};

static INSURANCE: SchemaDescriptor = SchemaDescriptor {
    kind: EntityKind::Insurance,
    collection: "insurances",
    required_fields: &["name"],
    indexes: &[],
};

static LOG: SchemaDescriptor = SchemaDescriptor {
    kind: EntityKind::Log,
    collection: "logs",
    required_fields: &["tenant_id", "actor_id", "action", "entity_type", "timestamp"],
    indexes: &[IndexSpec { fields: &["entity_id"], unique: false }],
};

static MEETING: SchemaDescriptor = SchemaDescriptor {
    kind: EntityKind::Meeting,
    collection: "meetings",
    required_fields: &["external_meeting_id"],
    indexes: &[IndexSpec { fields: &["appointment_id"], unique: false }],
};

static TENANT: SchemaDescriptor = SchemaDescriptor {
    kind: EntityKind::Tenant,
    collection: "tenants",
    required_fields: &["name", "slug", "locator", "is_active"],
    indexes: &[IndexSpec { fields: &["slug"], unique: true }],
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tenant_catalog_covers_the_eight_collections() {
        let collections: Vec<&str> = EntityKind::TENANT_SCOPED
            .iter()
            .map(|kind| kind.collection())
            .collect();
        assert_eq!(
            collections,
            vec!["patients", "doctors", "appointments", "hospitals", "specialties", "insurances", "logs", "meetings"]
        );
        assert!(!EntityKind::TENANT_SCOPED.contains(&EntityKind::Tenant));
    }

    #[test]
    fn validation_requires_id_and_declared_fields() {
        let descriptor = EntityKind::Hospital.descriptor();
        assert!(descriptor.validate(&json!({"_id": "a", "name": "St. Mary"})).is_ok());
        assert!(descriptor.validate(&json!({"name": "St. Mary"})).is_err());
        assert!(descriptor.validate(&json!({"_id": "a", "name": null})).is_err());
        assert!(descriptor.validate(&json!("hospital")).is_err());
    }
}
