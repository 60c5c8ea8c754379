use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use shared_database::DatabaseError;
use shared_models::error::AppError;
use shared_models::RecordId;

// ==============================================================================
// TIME OF DAY
// ==============================================================================

/// Wall-clock time within a day, stored as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MINUTES_PER_DAY: u32 = 24 * 60;

    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self((hour * 60 + minute) as u16))
        } else {
            None
        }
    }

    pub fn from_minutes(minutes: u32) -> Option<Self> {
        (minutes < Self::MINUTES_PER_DAY).then(|| Self(minutes as u16))
    }

    pub fn minutes(&self) -> u32 {
        self.0 as u32
    }

    pub fn hour(&self) -> u32 {
        self.minutes() / 60
    }

    pub fn minute(&self) -> u32 {
        self.minutes() % 60
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = DoctorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let time = NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map_err(|_| DoctorError::Validation(format!("Invalid time '{}', expected HH:MM", s)))?;
        Ok(Self::from(time))
    }
}

impl From<NaiveTime> for TimeOfDay {
    fn from(time: NaiveTime) -> Self {
        Self((time.hour() * 60 + time.minute()) as u16)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ==============================================================================
// SCHEDULE
// ==============================================================================

/// One bookable time range. `occupied` is the single source of truth for
/// whether the range is booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    #[serde(default)]
    pub occupied: bool,
}

impl Interval {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self {
            start,
            end,
            occupied: false,
        }
    }

    pub fn same_range(&self, other: &Interval) -> bool {
        self.start == other.start && self.end == other.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DayOfWeek::Monday => "monday",
            DayOfWeek::Tuesday => "tuesday",
            DayOfWeek::Wednesday => "wednesday",
            DayOfWeek::Thursday => "thursday",
            DayOfWeek::Friday => "friday",
            DayOfWeek::Saturday => "saturday",
            DayOfWeek::Sunday => "sunday",
        };
        f.write_str(name)
    }
}

/// Recurring working hours for one weekday, with the slots generated from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub active: bool,
    pub day_start: TimeOfDay,
    pub day_end: TimeOfDay,
    #[serde(default)]
    pub intervals: Vec<Interval>,
}

pub type WeeklyTemplate = BTreeMap<DayOfWeek, DaySchedule>;

/// Replaces the weekly template for one calendar date. An exception with no
/// intervals is a day off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateException {
    pub date: NaiveDate,
    #[serde(default)]
    pub intervals: Vec<Interval>,
    /// Copied from the weekly template by a booking rather than set by staff.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pinned: bool,
}

impl DateException {
    pub fn new(date: NaiveDate, intervals: Vec<Interval>) -> Self {
        Self {
            date,
            intervals,
            pinned: false,
        }
    }

    pub fn has_occupied(&self) -> bool {
        self.intervals.iter().any(|i| i.occupied)
    }
}

fn default_duration() -> u32 {
    30
}

/// Longest slot a doctor can be configured with: one whole day.
pub const MAX_APPOINTMENT_DURATION: u32 = TimeOfDay::MINUTES_PER_DAY;

pub fn validate_duration(duration: u32) -> Result<u32, DoctorError> {
    if (1..=MAX_APPOINTMENT_DURATION).contains(&duration) {
        Ok(duration)
    } else {
        Err(DoctorError::Validation(format!(
            "Appointment duration must be between 1 and {} minutes, got {}",
            MAX_APPOINTMENT_DURATION, duration
        )))
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    #[serde(rename = "_id")]
    pub id: RecordId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub specialty_id: Option<String>,
    #[serde(default = "default_duration")]
    pub appointment_duration: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub weekly_template: WeeklyTemplate,
    #[serde(default)]
    pub date_exceptions: Vec<DateException>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Doctor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn exception_index(&self, date: NaiveDate) -> Option<usize> {
        self.date_exceptions.iter().position(|e| e.date == date)
    }

    pub fn exception(&self, date: NaiveDate) -> Option<&DateException> {
        self.date_exceptions.iter().find(|e| e.date == date)
    }
}

// ==============================================================================
// AVAILABILITY RESULTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnavailableReason {
    #[serde(rename = "doctor inactive that day")]
    DoctorInactive,
    #[serde(rename = "outside working hours")]
    OutsideWorkingHours,
    #[serde(rename = "already booked")]
    AlreadyBooked,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::DoctorInactive => "doctor inactive that day",
            UnavailableReason::OutsideWorkingHours => "outside working hours",
            UnavailableReason::AlreadyBooked => "already booked",
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityCheck {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnavailableReason>,
}

impl AvailabilityCheck {
    pub fn available() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    pub fn unavailable(reason: UnavailableReason) -> Self {
        Self {
            available: false,
            reason: Some(reason),
        }
    }

    pub fn into_result(self) -> Result<(), UnavailableReason> {
        match self.reason {
            Some(reason) if !self.available => Err(reason),
            _ => Ok(()),
        }
    }
}

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDoctorRequest {
    pub first_name: String,
    pub last_name: String,
    pub specialty_id: Option<String>,
    pub appointment_duration: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DayHours {
    pub active: bool,
    pub day_start: TimeOfDay,
    pub day_end: TimeOfDay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyAvailabilityRequest {
    /// Replaces the doctor's appointment duration before slots are generated.
    pub duration_minutes: Option<u32>,
    pub days: BTreeMap<DayOfWeek, DayHours>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

/// Working hours for a single date. `ranges` are cut into slots of the
/// doctor's duration; `intervals` are taken as given. Both empty means a day off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DateExceptionRequest {
    #[serde(default)]
    pub ranges: Vec<TimeRange>,
    #[serde(default)]
    pub intervals: Vec<Interval>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum DoctorError {
    #[error("Doctor not found: {0}")]
    NotFound(String),

    #[error("No interval starting at {start} on {date}")]
    IntervalNotFound { date: NaiveDate, start: TimeOfDay },

    #[error("{0}")]
    Unavailable(UnavailableReason),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<DoctorError> for AppError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound(_) | DoctorError::IntervalNotFound { .. } => AppError::NotFound(err.to_string()),
            DoctorError::Unavailable(reason) => AppError::Conflict(reason.to_string()),
            DoctorError::Conflict(msg) => AppError::Conflict(msg),
            DoctorError::Validation(msg) => AppError::ValidationError(msg),
            DoctorError::Database(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn time_of_day_round_trips_as_hh_mm() {
        let t: TimeOfDay = serde_json::from_value(json!("09:05")).unwrap();
        assert_eq!(t, TimeOfDay::new(9, 5).unwrap());
        assert_eq!(serde_json::to_value(t).unwrap(), json!("09:05"));
        assert!("25:00".parse::<TimeOfDay>().is_err());
        assert!("9am".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn reasons_serialize_to_their_messages() {
        let check = AvailabilityCheck::unavailable(UnavailableReason::AlreadyBooked);
        assert_eq!(
            serde_json::to_value(&check).unwrap(),
            json!({"available": false, "reason": "already booked"})
        );
    }

    #[test]
    fn weekday_keys_are_lowercase_names() {
        let mut template = WeeklyTemplate::new();
        template.insert(
            DayOfWeek::Monday,
            DaySchedule {
                active: true,
                day_start: TimeOfDay::new(9, 0).unwrap(),
                day_end: TimeOfDay::new(10, 0).unwrap(),
                intervals: vec![],
            },
        );
        let value = serde_json::to_value(&template).unwrap();
        assert!(value.get("monday").is_some());
    }
}
