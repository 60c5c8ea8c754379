use std::fmt;

use serde::{Deserialize, Serialize};

/// The authenticated caller as bound by the identity layer.
///
/// The core trusts `tenant_id`: tenant membership is validated upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: ActorRole,
    pub tenant_id: String,
}

impl Actor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        role: ActorRole,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            tenant_id: tenant_id.into(),
        }
    }

    /// Actor used for work the platform performs on its own behalf.
    pub fn system(tenant_id: impl Into<String>) -> Self {
        Self::new("system", "System", ActorRole::System, tenant_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Patient,
    Doctor,
    Receptionist,
    Admin,
    PlatformAdmin,
    System,
}

impl ActorRole {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "patient" => Some(Self::Patient),
            "doctor" => Some(Self::Doctor),
            "receptionist" => Some(Self::Receptionist),
            "admin" => Some(Self::Admin),
            "platform_admin" | "superadmin" => Some(Self::PlatformAdmin),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    pub fn can_manage_schedules(&self) -> bool {
        matches!(
            self,
            Self::Doctor | Self::Receptionist | Self::Admin | Self::PlatformAdmin | Self::System
        )
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActorRole::Patient => write!(f, "patient"),
            ActorRole::Doctor => write!(f, "doctor"),
            ActorRole::Receptionist => write!(f, "receptionist"),
            ActorRole::Admin => write!(f, "admin"),
            ActorRole::PlatformAdmin => write!(f, "platform_admin"),
            ActorRole::System => write!(f, "system"),
        }
    }
}
