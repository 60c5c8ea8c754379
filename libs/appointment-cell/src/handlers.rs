use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use shared_models::auth::{Actor, ActorRole};
use shared_models::error::AppError;

use crate::models::{Appointment, CancelAppointmentRequest, CreateAppointmentRequest, UpdateAppointmentRequest};
use crate::router::AppointmentState;

#[derive(Debug, Deserialize)]
pub struct DoctorDayQuery {
    pub date: NaiveDate,
}

/// Patients may only see and change their own appointments.
fn ensure_owner(actor: &Actor, patient_id: &str) -> Result<(), AppError> {
    if actor.role == ActorRole::Patient && actor.id != patient_id {
        return Err(AppError::Forbidden(
            "Patients can only access their own appointments".to_string(),
        ));
    }
    Ok(())
}

fn require_schedule_manager(actor: &Actor) -> Result<(), AppError> {
    if actor.role.can_manage_schedules() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Role {} cannot change appointment outcomes",
            actor.role
        )))
    }
}

async fn load_owned(
    state: &AppointmentState,
    actor: &Actor,
    appointment_id: &str,
) -> Result<(tenant_cell::TenantContext, Appointment), AppError> {
    let ctx = state.tenants.open(&actor.tenant_id).await?;
    let appointment = state.booking.get(&ctx, appointment_id).await?;
    ensure_owner(actor, &appointment.patient_id)?;
    Ok((ctx, appointment))
}

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppointmentState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_owner(&actor, &request.patient_id)?;
    let ctx = state.tenants.open(&actor.tenant_id).await?;

    let appointment = state.booking.create(&ctx, &actor, request).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppointmentState>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let (_, appointment) = load_owned(&state, &actor, &appointment_id).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<AppointmentState>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<String>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let (ctx, _) = load_owned(&state, &actor, &appointment_id).await?;

    let appointment = state
        .booking
        .update(&ctx, &actor, &appointment_id, request)
        .await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<AppointmentState>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<String>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let (ctx, _) = load_owned(&state, &actor, &appointment_id).await?;

    let appointment = state
        .booking
        .cancel(&ctx, &actor, &appointment_id, request)
        .await?;
    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
    })))
}

#[axum::debug_handler]
pub async fn confirm_appointment(
    State(state): State<AppointmentState>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    require_schedule_manager(&actor)?;
    let ctx = state.tenants.open(&actor.tenant_id).await?;

    let appointment = state.booking.confirm(&ctx, &actor, &appointment_id).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<AppointmentState>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    require_schedule_manager(&actor)?;
    let ctx = state.tenants.open(&actor.tenant_id).await?;

    let appointment = state.booking.complete(&ctx, &actor, &appointment_id).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn mark_no_show(
    State(state): State<AppointmentState>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    require_schedule_manager(&actor)?;
    let ctx = state.tenants.open(&actor.tenant_id).await?;

    let appointment = state.booking.mark_no_show(&ctx, &actor, &appointment_id).await?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn list_doctor_appointments(
    State(state): State<AppointmentState>,
    Extension(actor): Extension<Actor>,
    Path(doctor_id): Path<String>,
    Query(query): Query<DoctorDayQuery>,
) -> Result<Json<Value>, AppError> {
    require_schedule_manager(&actor)?;
    let ctx = state.tenants.open(&actor.tenant_id).await?;

    let appointments = state
        .booking
        .list_for_doctor(&ctx, &doctor_id, query.date)
        .await?;
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": query.date,
        "appointments": appointments,
        "total": appointments.len(),
    })))
}
