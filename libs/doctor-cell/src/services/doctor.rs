use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::{Condition, DatabaseError, EntityKind, Mutation, SchemaHandle};
use shared_models::RecordId;
use tenant_cell::TenantContext;

use crate::models::{
    validate_duration, AvailabilityCheck, CreateDoctorRequest, DateException, DateExceptionRequest, DaySchedule,
    Doctor, DoctorError, Interval, TimeOfDay, UnavailableReason, WeeklyAvailabilityRequest, WeeklyTemplate,
};
use crate::services::availability::{self, normalize_intervals};

/// Attempts at a conditional write before giving up on a contended document.
const MAX_WRITE_ATTEMPTS: usize = 5;

enum Flip {
    Flipped,
    AlreadySet,
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, DoctorError> {
    serde_json::to_value(value).map_err(|e| DoctorError::Database(DatabaseError::from(e)))
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

fn exception_path(index: usize) -> String {
    format!("date_exceptions.{}", index)
}

fn interval_path(exception: usize, interval: usize) -> String {
    format!("date_exceptions.{}.intervals.{}", exception, interval)
}

/// Doctor records and the interval occupancy primitives used for booking.
///
/// Weekly-template intervals are never marked occupied. Occupying an interval
/// on a template-driven date first pins that day as a date exception copied
/// from the template, and the flag is then flipped on the exception with a
/// conditional write.
pub struct DoctorService {
    default_duration: u32,
}

impl DoctorService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            default_duration: config.default_appointment_duration,
        }
    }

    fn doctors(&self, ctx: &TenantContext) -> Result<SchemaHandle, DoctorError> {
        Ok(ctx.schema(EntityKind::Doctor)?)
    }

    async fn load(&self, doctors: &SchemaHandle, doctor_id: &str) -> Result<Doctor, DoctorError> {
        let id = RecordId::parse(doctor_id).map_err(|_| DoctorError::NotFound(doctor_id.to_string()))?;
        doctors
            .find_by_id::<Doctor>(id.as_str())
            .await?
            .ok_or_else(|| DoctorError::NotFound(doctor_id.to_string()))
    }

    pub async fn create_doctor(&self, ctx: &TenantContext, request: CreateDoctorRequest) -> Result<Doctor, DoctorError> {
        if request.first_name.trim().is_empty() || request.last_name.trim().is_empty() {
            return Err(DoctorError::Validation("Doctor first and last name are required".to_string()));
        }
        let duration = validate_duration(request.appointment_duration.unwrap_or(self.default_duration))?;

        let now = Utc::now();
        let doctor = Doctor {
            id: RecordId::generate(),
            first_name: request.first_name.trim().to_string(),
            last_name: request.last_name.trim().to_string(),
            specialty_id: request.specialty_id,
            appointment_duration: duration,
            is_active: true,
            weekly_template: WeeklyTemplate::new(),
            date_exceptions: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.doctors(ctx)?.insert(&doctor).await?;
        info!("Created doctor {} for tenant {}", doctor.id, ctx.tenant_id());
        Ok(doctor)
    }

    pub async fn get_doctor(&self, ctx: &TenantContext, doctor_id: &str) -> Result<Doctor, DoctorError> {
        debug!("Fetching doctor {} for tenant {}", doctor_id, ctx.tenant_id());
        self.load(&self.doctors(ctx)?, doctor_id).await
    }

    /// Replaces the weekly template, regenerating every active day's slots.
    ///
    /// Days pinned from the old template by a booking that has since been
    /// released are dropped so they follow the new template. Pinned days that
    /// still hold a booking keep their hours until that booking is released.
    pub async fn save_weekly_availability(
        &self,
        ctx: &TenantContext,
        doctor_id: &str,
        request: WeeklyAvailabilityRequest,
    ) -> Result<Doctor, DoctorError> {
        let doctors = self.doctors(ctx)?;
        let mut doctor = self.load(&doctors, doctor_id).await?;
        let duration = validate_duration(request.duration_minutes.unwrap_or(doctor.appointment_duration))?;

        let mut template = WeeklyTemplate::new();
        for (day, hours) in request.days {
            let intervals = if hours.active {
                if hours.day_start >= hours.day_end {
                    return Err(DoctorError::Validation(format!(
                        "{}: day_start {} must be before day_end {}",
                        day, hours.day_start, hours.day_end
                    )));
                }
                availability::generate_slots(hours.day_start, hours.day_end, duration)?
            } else {
                Vec::new()
            };

            template.insert(
                day,
                DaySchedule {
                    active: hours.active,
                    day_start: hours.day_start,
                    day_end: hours.day_end,
                    intervals,
                },
            );
        }

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = to_json(&doctor.date_exceptions)?;
            let kept: Vec<DateException> = doctor
                .date_exceptions
                .iter()
                .filter(|e| !e.pinned || e.has_occupied())
                .cloned()
                .collect();
            let dropped = doctor.date_exceptions.len() - kept.len();

            let written = doctors
                .update(
                    doctor.id.as_str(),
                    &[Condition::eq("date_exceptions", current)],
                    &[
                        Mutation::set("weekly_template", to_json(&template)?),
                        Mutation::set("appointment_duration", duration),
                        Mutation::set("date_exceptions", to_json(&kept)?),
                        Mutation::set("updated_at", now()),
                    ],
                )
                .await?;

            if written {
                info!(
                    "Saved weekly availability for doctor {} ({} day(s), {} min slots, {} stale pin(s) dropped)",
                    doctor.id,
                    template.len(),
                    duration,
                    dropped
                );
                doctor.weekly_template = template;
                doctor.appointment_duration = duration;
                doctor.date_exceptions = kept;
                return Ok(doctor);
            }
            debug!("Weekly availability write for doctor {} lost a race, retrying", doctor.id);
            doctor = self.load(&doctors, doctor_id).await?;
        }

        Err(DoctorError::Conflict("Availability changed concurrently, retry".to_string()))
    }

    fn build_exception_intervals(
        &self,
        doctor: &Doctor,
        request: &DateExceptionRequest,
    ) -> Result<Vec<Interval>, DoctorError> {
        let mut intervals = Vec::new();
        for range in &request.ranges {
            if range.start >= range.end {
                return Err(DoctorError::Validation(format!(
                    "Range {}-{} must start before it ends",
                    range.start, range.end
                )));
            }
            intervals.extend(availability::generate_slots(
                range.start,
                range.end,
                doctor.appointment_duration,
            )?);
        }
        intervals.extend(request.intervals.iter().map(|i| Interval::new(i.start, i.end)));
        normalize_intervals(intervals)
    }

    /// Sets the working intervals for one date, replacing any previous exception.
    ///
    /// Booked intervals of the previous exception carry over; a request that
    /// would drop one is refused.
    pub async fn upsert_date_exception(
        &self,
        ctx: &TenantContext,
        doctor_id: &str,
        date: NaiveDate,
        request: DateExceptionRequest,
    ) -> Result<Doctor, DoctorError> {
        let doctors = self.doctors(ctx)?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut doctor = self.load(&doctors, doctor_id).await?;
            let mut intervals = self.build_exception_intervals(&doctor, &request)?;

            if let Some(existing) = doctor.exception(date) {
                for booked in existing.intervals.iter().filter(|i| i.occupied) {
                    match intervals.iter_mut().find(|i| i.same_range(booked)) {
                        Some(kept) => kept.occupied = true,
                        None => {
                            return Err(DoctorError::Conflict(format!(
                                "Interval {}-{} on {} is booked",
                                booked.start, booked.end, date
                            )))
                        }
                    }
                }
            }

            let exception = DateException::new(date, intervals);
            let written = match doctor.exception_index(date) {
                Some(index) => {
                    let current = to_json(&doctor.date_exceptions[index])?;
                    doctors
                        .update(
                            doctor.id.as_str(),
                            &[Condition::eq(exception_path(index), current)],
                            &[
                                Mutation::set(exception_path(index), to_json(&exception)?),
                                Mutation::set("updated_at", now()),
                            ],
                        )
                        .await?
                }
                None => {
                    doctors
                        .update(
                            doctor.id.as_str(),
                            &[Condition::len("date_exceptions", doctor.date_exceptions.len())],
                            &[
                                Mutation::push("date_exceptions", to_json(&exception)?),
                                Mutation::set("updated_at", now()),
                            ],
                        )
                        .await?
                }
            };

            if written {
                info!(
                    "Saved exception for doctor {} on {} ({} interval(s))",
                    doctor.id,
                    date,
                    exception.intervals.len()
                );
                match doctor.exception_index(date) {
                    Some(index) => doctor.date_exceptions[index] = exception,
                    None => doctor.date_exceptions.push(exception),
                }
                return Ok(doctor);
            }
            debug!("Exception write for doctor {} on {} lost a race, retrying", doctor.id, date);
        }

        warn!("Gave up saving exception for doctor {} on {}", doctor_id, date);
        Err(DoctorError::Conflict("Availability changed concurrently, retry".to_string()))
    }

    /// Drops the exception for `date`, returning the day to its weekly template.
    pub async fn remove_date_exception(
        &self,
        ctx: &TenantContext,
        doctor_id: &str,
        date: NaiveDate,
    ) -> Result<Doctor, DoctorError> {
        let doctors = self.doctors(ctx)?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let mut doctor = self.load(&doctors, doctor_id).await?;
            let Some(index) = doctor.exception_index(date) else {
                return Ok(doctor);
            };

            if let Some(booked) = doctor.date_exceptions[index].intervals.iter().find(|i| i.occupied) {
                return Err(DoctorError::Conflict(format!(
                    "Interval {}-{} on {} is booked",
                    booked.start, booked.end, date
                )));
            }

            let current = to_json(&doctor.date_exceptions)?;
            let mut remaining = doctor.date_exceptions.clone();
            remaining.remove(index);

            let written = doctors
                .update(
                    doctor.id.as_str(),
                    &[Condition::eq("date_exceptions", current)],
                    &[
                        Mutation::set("date_exceptions", to_json(&remaining)?),
                        Mutation::set("updated_at", now()),
                    ],
                )
                .await?;

            if written {
                info!("Removed exception for doctor {} on {}", doctor.id, date);
                doctor.date_exceptions = remaining;
                return Ok(doctor);
            }
        }

        Err(DoctorError::Conflict("Availability changed concurrently, retry".to_string()))
    }

    pub async fn available_slots(
        &self,
        ctx: &TenantContext,
        doctor_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Interval>, DoctorError> {
        let doctor = self.get_doctor(ctx, doctor_id).await?;
        Ok(availability::free_slots(&doctor, date))
    }

    pub async fn check_availability(
        &self,
        ctx: &TenantContext,
        doctor_id: &str,
        date: NaiveDate,
        time: TimeOfDay,
    ) -> Result<AvailabilityCheck, DoctorError> {
        let doctor = self.get_doctor(ctx, doctor_id).await?;
        let check = availability::check_availability(&doctor, date, time);
        debug!(
            "Availability of doctor {} on {} at {}: {:?}",
            doctor.id, date, time, check.reason
        );
        Ok(check)
    }

    /// Materialises the template day for `date` as a date exception so its
    /// intervals can carry occupancy. No-op when an exception already exists.
    async fn pin_day(&self, doctors: &SchemaHandle, mut doctor: Doctor, date: NaiveDate) -> Result<Doctor, DoctorError> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            if doctor.exception_index(date).is_some() {
                return Ok(doctor);
            }

            let exception = DateException {
                pinned: true,
                ..DateException::new(date, availability::resolve_day(&doctor, date))
            };
            let written = doctors
                .update(
                    doctor.id.as_str(),
                    &[Condition::len("date_exceptions", doctor.date_exceptions.len())],
                    &[Mutation::push("date_exceptions", to_json(&exception)?)],
                )
                .await?;

            if written {
                debug!("Pinned {} for doctor {} from the weekly template", date, doctor.id);
                doctor.date_exceptions.push(exception);
                return Ok(doctor);
            }
            doctor = self.load(doctors, doctor.id.as_str()).await?;
        }

        Err(DoctorError::Conflict("Availability changed concurrently, retry".to_string()))
    }

    async fn flip(
        &self,
        doctors: &SchemaHandle,
        doctor: &Doctor,
        date: NaiveDate,
        start: TimeOfDay,
        occupied: bool,
    ) -> Result<Option<Flip>, DoctorError> {
        let missing = || DoctorError::IntervalNotFound { date, start };
        let exception = doctor.exception_index(date).ok_or_else(missing)?;
        let interval = doctor.date_exceptions[exception]
            .intervals
            .iter()
            .position(|i| i.start == start)
            .ok_or_else(missing)?;

        if doctor.date_exceptions[exception].intervals[interval].occupied == occupied {
            return Ok(Some(Flip::AlreadySet));
        }

        let path = interval_path(exception, interval);
        let written = doctors
            .update(
                doctor.id.as_str(),
                &[
                    Condition::eq(format!("{}.date", exception_path(exception)), date.to_string()),
                    Condition::eq(format!("{}.start", path), start.to_string()),
                    Condition::eq(format!("{}.occupied", path), !occupied),
                ],
                &[
                    Mutation::set(format!("{}.occupied", path), occupied),
                    Mutation::set("updated_at", now()),
                ],
            )
            .await?;

        Ok(written.then_some(Flip::Flipped))
    }

    /// Marks the interval starting at `start` on `date` as booked.
    ///
    /// Fails with [`DoctorError::Unavailable`] when the doctor does not work
    /// then or the interval is already booked.
    pub async fn occupy_interval(
        &self,
        ctx: &TenantContext,
        doctor_id: &str,
        date: NaiveDate,
        start: TimeOfDay,
    ) -> Result<(), DoctorError> {
        let doctors = self.doctors(ctx)?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let doctor = self.load(&doctors, doctor_id).await?;
            availability::check_availability(&doctor, date, start)
                .into_result()
                .map_err(DoctorError::Unavailable)?;

            let doctor = self.pin_day(&doctors, doctor, date).await?;
            match self.flip(&doctors, &doctor, date, start, true).await? {
                Some(Flip::Flipped) => {
                    info!("Occupied {} {} for doctor {}", date, start, doctor.id);
                    return Ok(());
                }
                Some(Flip::AlreadySet) => {
                    return Err(DoctorError::Unavailable(UnavailableReason::AlreadyBooked));
                }
                None => debug!("Occupy of {} {} for doctor {} lost a race", date, start, doctor.id),
            }
        }

        Err(DoctorError::Unavailable(UnavailableReason::AlreadyBooked))
    }

    /// Frees a booked interval. Returns `false` when it was not occupied.
    pub async fn release_interval(
        &self,
        ctx: &TenantContext,
        doctor_id: &str,
        date: NaiveDate,
        start: TimeOfDay,
    ) -> Result<bool, DoctorError> {
        self.set_occupied(ctx, doctor_id, date, start, false).await
    }

    /// Marks an interval booked again without re-checking availability. Used to
    /// undo a release that could not be followed through.
    pub async fn reoccupy_interval(
        &self,
        ctx: &TenantContext,
        doctor_id: &str,
        date: NaiveDate,
        start: TimeOfDay,
    ) -> Result<bool, DoctorError> {
        self.set_occupied(ctx, doctor_id, date, start, true).await
    }

    async fn set_occupied(
        &self,
        ctx: &TenantContext,
        doctor_id: &str,
        date: NaiveDate,
        start: TimeOfDay,
        occupied: bool,
    ) -> Result<bool, DoctorError> {
        let doctors = self.doctors(ctx)?;

        for _ in 0..MAX_WRITE_ATTEMPTS {
            let doctor = self.load(&doctors, doctor_id).await?;

            if doctor.exception_index(date).is_none() {
                // Template days are never occupied.
                let on_template = availability::resolve_day(&doctor, date)
                    .iter()
                    .any(|i| i.start == start);
                return match (on_template, occupied) {
                    (true, false) => Ok(false),
                    (true, true) => {
                        let doctor = self.pin_day(&doctors, doctor, date).await?;
                        match self.flip(&doctors, &doctor, date, start, true).await? {
                            Some(Flip::Flipped) => Ok(true),
                            Some(Flip::AlreadySet) => Ok(false),
                            None => Err(DoctorError::Unavailable(UnavailableReason::AlreadyBooked)),
                        }
                    }
                    (false, _) => Err(DoctorError::IntervalNotFound { date, start }),
                };
            }

            match self.flip(&doctors, &doctor, date, start, occupied).await? {
                Some(Flip::Flipped) => {
                    info!(
                        "Set {} {} for doctor {} to occupied={}",
                        date, start, doctor.id, occupied
                    );
                    return Ok(true);
                }
                Some(Flip::AlreadySet) => return Ok(false),
                None => continue,
            }
        }

        Err(DoctorError::Conflict("Availability changed concurrently, retry".to_string()))
    }
}
