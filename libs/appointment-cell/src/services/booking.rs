use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use audit_cell::{AuditDispatcher, AuditEvent};
use doctor_cell::models::DoctorError;
use doctor_cell::DoctorService;
use shared_config::AppConfig;
use shared_database::{Condition, DatabaseError, EntityKind, Mutation, SchemaHandle};
use shared_models::auth::Actor;
use shared_models::RecordId;
use tenant_cell::{TenantContext, VIDEO_CONSULTATIONS};

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, AppointmentType, CancelAppointmentRequest,
    CreateAppointmentRequest, HeldInterval, IntervalIntent, UpdateAppointmentRequest,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::locks::{SlotKey, SlotLocks};

fn describe(interval: Option<&HeldInterval>) -> String {
    match interval {
        Some(held) => format!("{} {} with doctor {}", held.date, held.start, held.doctor_id),
        None => "no time slot".to_string(),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, AppointmentError> {
    serde_json::to_value(value).map_err(|e| AppointmentError::Database(DatabaseError::from(e)))
}

/// Books, reschedules and cancels appointments against doctor intervals.
///
/// Every interval change happens under the [`SlotLocks`] of the affected
/// doctor days, and the interval flag itself is flipped with a conditional
/// write, so two requests can never both hold the same interval.
pub struct AppointmentBookingService {
    doctor_service: DoctorService,
    lifecycle_service: AppointmentLifecycleService,
    locks: Arc<SlotLocks>,
    audit: AuditDispatcher,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig, locks: Arc<SlotLocks>, audit: AuditDispatcher) -> Self {
        Self {
            doctor_service: DoctorService::new(config),
            lifecycle_service: AppointmentLifecycleService::new(),
            locks,
            audit,
        }
    }

    fn appointments(&self, ctx: &TenantContext) -> Result<SchemaHandle, AppointmentError> {
        Ok(ctx.schema(EntityKind::Appointment)?)
    }

    fn slot_key(ctx: &TenantContext, interval: &HeldInterval) -> SlotKey {
        SlotKey::new(ctx.tenant_id(), interval.doctor_id.clone(), interval.date)
    }

    fn emit(&self, ctx: &TenantContext, actor: &Actor, action: &str, appointment: &Appointment, details: Value) {
        let event = AuditEvent::new(ctx.tenant_id(), actor, action, "appointment", appointment.id.to_string())
            .with_entity_name(format!("{} appointment", appointment.appointment_type))
            .with_details(details);
        self.audit.emit(event);
    }

    fn validate_type(
        &self,
        ctx: &TenantContext,
        appointment_type: AppointmentType,
        meeting_id: Option<&str>,
    ) -> Result<(), AppointmentError> {
        if appointment_type == AppointmentType::Virtual && !ctx.tenant.has_feature(VIDEO_CONSULTATIONS) {
            return Err(AppointmentError::FeatureDisabled(VIDEO_CONSULTATIONS.to_string()));
        }
        if meeting_id.is_some() && appointment_type != AppointmentType::Virtual {
            return Err(AppointmentError::Validation(
                "meeting_id is only allowed on virtual appointments".to_string(),
            ));
        }
        Ok(())
    }

    async fn ensure_patient(&self, ctx: &TenantContext, patient_id: &str) -> Result<(), AppointmentError> {
        let id = RecordId::parse(patient_id).map_err(|_| AppointmentError::PatientNotFound(patient_id.to_string()))?;
        let patient: Option<Value> = ctx.schema(EntityKind::Patient)?.find_by_id(id.as_str()).await?;
        match patient {
            Some(_) => Ok(()),
            None => Err(AppointmentError::PatientNotFound(patient_id.to_string())),
        }
    }

    async fn load(&self, appointments: &SchemaHandle, appointment_id: &str) -> Result<Appointment, AppointmentError> {
        let id = RecordId::parse(appointment_id)
            .map_err(|_| AppointmentError::NotFound(appointment_id.to_string()))?;
        appointments
            .find_by_id::<Appointment>(id.as_str())
            .await?
            .ok_or_else(|| AppointmentError::NotFound(appointment_id.to_string()))
    }

    /// Fails with `Contention` when the stored appointment no longer matches
    /// the copy the caller planned its change from.
    async fn ensure_unchanged(&self, appointments: &SchemaHandle, read: &Appointment) -> Result<(), AppointmentError> {
        let stored = self.load(appointments, read.id.as_str()).await?;
        if stored.status != read.status || stored.updated_at != read.updated_at {
            debug!("Appointment {} changed while waiting for its slot locks", read.id);
            return Err(AppointmentError::Contention(read.id.to_string()));
        }
        Ok(())
    }

    /// Writes every mutable field, provided the stored record is still the
    /// revision `read` was loaded from.
    async fn persist(
        &self,
        appointments: &SchemaHandle,
        appointment: &Appointment,
        read: &Appointment,
    ) -> Result<bool, AppointmentError> {
        let written = appointments
            .update(
                appointment.id.as_str(),
                &[
                    Condition::eq("status", read.status.as_str()),
                    Condition::eq("updated_at", to_json(&read.updated_at)?),
                ],
                &[
                    Mutation::set("doctor_id", to_json(&appointment.doctor_id)?),
                    Mutation::set("date", to_json(&appointment.date)?),
                    Mutation::set("time", to_json(&appointment.time)?),
                    Mutation::set("appointment_type", to_json(&appointment.appointment_type)?),
                    Mutation::set("status", appointment.status.as_str()),
                    Mutation::set("notes", to_json(&appointment.notes)?),
                    Mutation::set("meeting_id", to_json(&appointment.meeting_id)?),
                    Mutation::set("held_interval", to_json(&appointment.held_interval)?),
                    Mutation::set("updated_at", to_json(&appointment.updated_at)?),
                ],
            )
            .await?;
        Ok(written)
    }

    async fn occupy(&self, ctx: &TenantContext, interval: &HeldInterval) -> Result<(), AppointmentError> {
        self.doctor_service
            .occupy_interval(ctx, &interval.doctor_id, interval.date, interval.start)
            .await
            .map_err(AppointmentError::from)
    }

    /// Frees an interval. A reference to an interval that no longer exists is
    /// logged and treated as already free.
    async fn release(&self, ctx: &TenantContext, interval: &HeldInterval) -> Result<bool, AppointmentError> {
        match self
            .doctor_service
            .release_interval(ctx, &interval.doctor_id, interval.date, interval.start)
            .await
        {
            Ok(released) => Ok(released),
            Err(DoctorError::IntervalNotFound { .. }) | Err(DoctorError::NotFound(_)) => {
                warn!(
                    target: "consistency",
                    "Held interval {} {} of doctor {} no longer exists",
                    interval.date, interval.start, interval.doctor_id
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Puts a released interval back exactly as it was.
    async fn restore(&self, ctx: &TenantContext, interval: &HeldInterval) {
        if let Err(e) = self
            .doctor_service
            .reoccupy_interval(ctx, &interval.doctor_id, interval.date, interval.start)
            .await
        {
            error!(
                target: "consistency",
                "Failed to restore interval {} {} of doctor {}: {}",
                interval.date, interval.start, interval.doctor_id, e
            );
        }
    }

    /// Releases then occupies as one step: if the new interval cannot be
    /// taken, the released one is re-occupied before the error is returned.
    /// Returns whether the previous interval was actually released.
    async fn apply_intent(&self, ctx: &TenantContext, intent: &IntervalIntent) -> Result<bool, AppointmentError> {
        let released = match &intent.release {
            Some(previous) => self.release(ctx, previous).await?,
            None => false,
        };

        if let Some(target) = &intent.occupy {
            if let Err(e) = self.occupy(ctx, target).await {
                if let (true, Some(previous)) = (released, &intent.release) {
                    self.restore(ctx, previous).await;
                }
                return Err(e);
            }
        }
        Ok(released)
    }

    /// Undoes a successfully applied intent.
    async fn revert_intent(&self, ctx: &TenantContext, intent: &IntervalIntent, released: bool) {
        if let Some(target) = &intent.occupy {
            if let Err(e) = self.release(ctx, target).await {
                error!(target: "consistency", "Failed to release interval during rollback: {}", e);
            }
        }
        if let (true, Some(previous)) = (released, &intent.release) {
            self.restore(ctx, previous).await;
        }
    }

    #[instrument(skip(self, ctx, actor, request), fields(tenant = %ctx.tenant_id(), actor = %actor.id))]
    pub async fn create(
        &self,
        ctx: &TenantContext,
        actor: &Actor,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.validate_type(ctx, request.appointment_type, request.meeting_id.as_deref())?;

        let held = match (request.doctor_id, request.date, request.time) {
            (Some(doctor_id), Some(date), Some(start)) => Some(HeldInterval { doctor_id, date, start }),
            (None, None, None) => None,
            _ => {
                return Err(AppointmentError::Validation(
                    "doctor_id, date and time must be provided together".to_string(),
                ))
            }
        };

        self.ensure_patient(ctx, &request.patient_id).await?;

        let now = Utc::now();
        let appointment = Appointment {
            id: RecordId::generate(),
            patient_id: request.patient_id,
            doctor_id: held.as_ref().map(|h| h.doctor_id.clone()),
            date: held.as_ref().map(|h| h.date),
            time: held.as_ref().map(|h| h.start),
            appointment_type: request.appointment_type,
            status: if held.is_some() {
                AppointmentStatus::Scheduled
            } else {
                AppointmentStatus::PendingSchedule
            },
            notes: request.notes,
            meeting_id: request.meeting_id,
            held_interval: held.clone(),
            created_at: now,
            updated_at: now,
        };
        let appointments = self.appointments(ctx)?;

        match &held {
            Some(interval) => {
                let _guard = self.locks.acquire(vec![Self::slot_key(ctx, interval)]).await;
                self.occupy(ctx, interval).await?;

                if let Err(e) = appointments.insert(&appointment).await {
                    error!("Failed to store appointment {}, releasing its interval: {}", appointment.id, e);
                    if let Err(release_err) = self.release(ctx, interval).await {
                        error!(target: "consistency", "Interval left occupied: {}", release_err);
                    }
                    return Err(e.into());
                }
            }
            None => appointments.insert(&appointment).await?,
        }

        info!(
            "Created appointment {} ({}) for patient {}",
            appointment.id, appointment.status, appointment.patient_id
        );
        self.emit(
            ctx,
            actor,
            "appointment.created",
            &appointment,
            json!({
                "description": format!("Booked {} ({})", describe(held.as_ref()), appointment.status),
                "status": appointment.status,
                "doctor_id": appointment.doctor_id,
                "date": appointment.date,
                "time": appointment.time,
            }),
        );
        Ok(appointment)
    }

    #[instrument(skip(self, ctx, actor, patch), fields(tenant = %ctx.tenant_id(), actor = %actor.id))]
    pub async fn update(
        &self,
        ctx: &TenantContext,
        actor: &Actor,
        appointment_id: &str,
        patch: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let appointments = self.appointments(ctx)?;
        let current = self.load(&appointments, appointment_id).await?;
        if current.status.is_terminal() {
            return Err(AppointmentError::NotModifiable(current.status));
        }

        let mut updated = current.clone();
        if let Some(appointment_type) = patch.appointment_type {
            updated.appointment_type = appointment_type;
        }
        if patch.notes.is_some() {
            updated.notes = patch.notes.clone();
        }
        if patch.meeting_id.is_some() {
            updated.meeting_id = patch.meeting_id.clone();
        }
        if updated.appointment_type != AppointmentType::Virtual && patch.meeting_id.is_none() {
            updated.meeting_id = None;
        }
        self.validate_type(ctx, updated.appointment_type, updated.meeting_id.as_deref())?;

        let intent = if patch.touches_schedule() {
            updated.doctor_id = patch.doctor_id.clone().or(current.doctor_id.clone());
            updated.date = patch.date.or(current.date);
            updated.time = patch.time.or(current.time);

            let target = updated.schedule().ok_or_else(|| {
                AppointmentError::Validation("doctor_id, date and time must be provided together".to_string())
            })?;
            IntervalIntent {
                release: current.held_interval.clone(),
                occupy: Some(target),
            }
        } else {
            IntervalIntent::default()
        };

        updated.updated_at = Utc::now();
        let rescheduled = !intent.is_noop();

        if rescheduled {
            let next_status = self.lifecycle_service.status_after_scheduling(current.status);
            if next_status != current.status {
                self.lifecycle_service
                    .validate_status_transition(current.status, next_status)?;
            }
            updated.status = next_status;
            updated.held_interval = intent.occupy.clone();

            let keys = [&intent.release, &intent.occupy]
                .into_iter()
                .flatten()
                .map(|interval| Self::slot_key(ctx, interval))
                .collect();
            let _guard = self.locks.acquire(keys).await;
            self.ensure_unchanged(&appointments, &current).await?;

            let released = self.apply_intent(ctx, &intent).await?;
            let written = self.persist(&appointments, &updated, &current).await;
            match written {
                Ok(true) => {}
                Ok(false) => {
                    self.revert_intent(ctx, &intent, released).await;
                    return Err(AppointmentError::Contention(current.id.to_string()));
                }
                Err(e) => {
                    self.revert_intent(ctx, &intent, released).await;
                    return Err(e);
                }
            }
        } else if !self.persist(&appointments, &updated, &current).await? {
            return Err(AppointmentError::Contention(current.id.to_string()));
        }

        info!("Updated appointment {} (rescheduled: {})", updated.id, rescheduled);
        let action = if rescheduled { "appointment.rescheduled" } else { "appointment.updated" };
        self.emit(
            ctx,
            actor,
            action,
            &updated,
            json!({
                "description": if rescheduled {
                    format!(
                        "Moved from {} to {}",
                        describe(current.held_interval.as_ref()),
                        describe(updated.held_interval.as_ref())
                    )
                } else {
                    "Updated appointment details".to_string()
                },
                "previous": current.held_interval,
                "current": updated.held_interval,
                "status": updated.status,
            }),
        );
        Ok(updated)
    }

    #[instrument(skip(self, ctx, actor, request), fields(tenant = %ctx.tenant_id(), actor = %actor.id))]
    pub async fn cancel(
        &self,
        ctx: &TenantContext,
        actor: &Actor,
        appointment_id: &str,
        request: CancelAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let appointments = self.appointments(ctx)?;
        let current = self.load(&appointments, appointment_id).await?;
        self.lifecycle_service
            .validate_status_transition(current.status, AppointmentStatus::Cancelled)?;

        let mut cancelled = current.clone();
        cancelled.status = AppointmentStatus::Cancelled;
        cancelled.held_interval = None;
        cancelled.updated_at = Utc::now();
        if let Some(reason) = request.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            cancelled.notes = Some(match current.notes.as_deref() {
                Some(notes) if !notes.is_empty() => format!("{}\nCancelled: {}", notes, reason),
                _ => format!("Cancelled: {}", reason),
            });
        }

        let _guard = match &current.held_interval {
            Some(interval) => Some(self.locks.acquire(vec![Self::slot_key(ctx, interval)]).await),
            None => None,
        };
        self.ensure_unchanged(&appointments, &current).await?;

        let released = match &current.held_interval {
            Some(interval) => self.release(ctx, interval).await?,
            None => false,
        };

        let written = self.persist(&appointments, &cancelled, &current).await;
        if !matches!(written, Ok(true)) {
            if let (true, Some(interval)) = (released, &current.held_interval) {
                self.restore(ctx, interval).await;
            }
            return Err(match written {
                Err(e) => e,
                _ => AppointmentError::Contention(current.id.to_string()),
            });
        }

        info!("Cancelled appointment {} (interval released: {})", cancelled.id, released);
        self.emit(
            ctx,
            actor,
            "appointment.cancelled",
            &cancelled,
            json!({
                "description": format!("Cancelled {}", describe(current.held_interval.as_ref())),
                "previous_status": current.status,
                "released": current.held_interval,
                "reason": request.reason,
            }),
        );
        Ok(cancelled)
    }

    async fn transition(
        &self,
        ctx: &TenantContext,
        actor: &Actor,
        appointment_id: &str,
        target: AppointmentStatus,
        action: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointments = self.appointments(ctx)?;
        let current = self.load(&appointments, appointment_id).await?;
        self.lifecycle_service.validate_status_transition(current.status, target)?;

        let mut updated = current.clone();
        updated.status = target;
        updated.updated_at = Utc::now();
        if !self.persist(&appointments, &updated, &current).await? {
            return Err(AppointmentError::Contention(current.id.to_string()));
        }

        info!("Appointment {} moved {} -> {}", updated.id, current.status, target);
        self.emit(
            ctx,
            actor,
            action,
            &updated,
            json!({
                "description": format!("Status changed from {} to {}", current.status, target),
                "from": current.status,
                "to": target,
            }),
        );
        Ok(updated)
    }

    #[instrument(skip(self, ctx, actor), fields(tenant = %ctx.tenant_id(), actor = %actor.id))]
    pub async fn confirm(&self, ctx: &TenantContext, actor: &Actor, appointment_id: &str) -> Result<Appointment, AppointmentError> {
        self.transition(ctx, actor, appointment_id, AppointmentStatus::Confirmed, "appointment.confirmed")
            .await
    }

    #[instrument(skip(self, ctx, actor), fields(tenant = %ctx.tenant_id(), actor = %actor.id))]
    pub async fn complete(&self, ctx: &TenantContext, actor: &Actor, appointment_id: &str) -> Result<Appointment, AppointmentError> {
        self.transition(ctx, actor, appointment_id, AppointmentStatus::Completed, "appointment.completed")
            .await
    }

    #[instrument(skip(self, ctx, actor), fields(tenant = %ctx.tenant_id(), actor = %actor.id))]
    pub async fn mark_no_show(
        &self,
        ctx: &TenantContext,
        actor: &Actor,
        appointment_id: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.transition(ctx, actor, appointment_id, AppointmentStatus::NoShow, "appointment.no_show")
            .await
    }

    pub async fn get(&self, ctx: &TenantContext, appointment_id: &str) -> Result<Appointment, AppointmentError> {
        debug!("Fetching appointment {} for tenant {}", appointment_id, ctx.tenant_id());
        self.load(&self.appointments(ctx)?, appointment_id).await
    }

    /// Appointments of one doctor on one date, ordered by time.
    pub async fn list_for_doctor(
        &self,
        ctx: &TenantContext,
        doctor_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut found: Vec<Appointment> = self
            .appointments(ctx)?
            .find(&[
                Condition::eq("doctor_id", doctor_id),
                Condition::eq("date", date.to_string()),
            ])
            .await?;
        found.sort_by_key(|a| a.time);
        Ok(found)
    }
}
