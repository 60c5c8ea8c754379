use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use doctor_cell::models::{DoctorError, TimeOfDay, UnavailableReason};
use shared_database::DatabaseError;
use shared_models::error::AppError;
use shared_models::RecordId;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    PendingSchedule,
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::PendingSchedule => "pending_schedule",
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    #[serde(alias = "in-person", alias = "office")]
    InPerson,
    #[serde(alias = "video", alias = "telemedicine")]
    Virtual,
    #[serde(alias = "telephone")]
    Phone,
}

impl fmt::Display for AppointmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentType::InPerson => write!(f, "in_person"),
            AppointmentType::Virtual => write!(f, "virtual"),
            AppointmentType::Phone => write!(f, "phone"),
        }
    }
}

/// Reference to the doctor interval an appointment occupies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldInterval {
    pub doctor_id: String,
    pub date: NaiveDate,
    pub start: TimeOfDay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    #[serde(rename = "_id")]
    pub id: RecordId,
    pub patient_id: String,
    #[serde(default)]
    pub doctor_id: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time: Option<TimeOfDay>,
    pub appointment_type: AppointmentType,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub meeting_id: Option<String>,
    #[serde(default)]
    pub held_interval: Option<HeldInterval>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// Doctor, date and time, when all three are set.
    pub fn schedule(&self) -> Option<HeldInterval> {
        match (&self.doctor_id, self.date, self.time) {
            (Some(doctor_id), Some(date), Some(start)) => Some(HeldInterval {
                doctor_id: doctor_id.clone(),
                date,
                start,
            }),
            _ => None,
        }
    }
}

/// Interval changes an update must apply together: free `release`, take `occupy`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalIntent {
    pub release: Option<HeldInterval>,
    pub occupy: Option<HeldInterval>,
}

impl IntervalIntent {
    pub fn is_noop(&self) -> bool {
        self.release == self.occupy
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: String,
    pub doctor_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<TimeOfDay>,
    pub appointment_type: AppointmentType,
    pub notes: Option<String>,
    pub meeting_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub doctor_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<TimeOfDay>,
    pub appointment_type: Option<AppointmentType>,
    pub notes: Option<String>,
    pub meeting_id: Option<String>,
}

impl UpdateAppointmentRequest {
    pub fn touches_schedule(&self) -> bool {
        self.doctor_id.is_some() || self.date.is_some() || self.time.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found: {0}")]
    NotFound(String),

    #[error("Patient not found: {0}")]
    PatientNotFound(String),

    #[error("Doctor not found: {0}")]
    DoctorNotFound(String),

    #[error("Interval not found: {0}")]
    IntervalNotFound(String),

    #[error("{0}")]
    Conflict(UnavailableReason),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment cannot be modified in current status: {0}")]
    NotModifiable(AppointmentStatus),

    #[error("Feature not enabled for this tenant: {0}")]
    FeatureDisabled(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Appointment changed concurrently: {0}")]
    Contention(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<DoctorError> for AppointmentError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound(id) => AppointmentError::DoctorNotFound(id),
            DoctorError::IntervalNotFound { .. } => AppointmentError::IntervalNotFound(err.to_string()),
            DoctorError::Unavailable(reason) => AppointmentError::Conflict(reason),
            DoctorError::Conflict(msg) => AppointmentError::Contention(msg),
            DoctorError::Validation(msg) => AppointmentError::Validation(msg),
            DoctorError::Database(e) => AppointmentError::Database(e),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        match err {
            AppointmentError::NotFound(_)
            | AppointmentError::PatientNotFound(_)
            | AppointmentError::DoctorNotFound(_)
            | AppointmentError::IntervalNotFound(_) => AppError::NotFound(err.to_string()),
            AppointmentError::Conflict(reason) => AppError::Conflict(reason.to_string()),
            AppointmentError::Contention(_) => AppError::Conflict(err.to_string()),
            AppointmentError::InvalidStatusTransition { .. } | AppointmentError::NotModifiable(_) => {
                AppError::ValidationError(err.to_string())
            }
            AppointmentError::FeatureDisabled(_) => AppError::Forbidden(err.to_string()),
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::Database(e) => e.into(),
        }
    }
}
