use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use shared_models::auth::Actor;
use shared_models::error::AppError;

use crate::models::{CreateDoctorRequest, DateExceptionRequest, TimeOfDay, WeeklyAvailabilityRequest};
use crate::router::DoctorState;
use crate::services::DoctorService;

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub date: NaiveDate,
    pub time: TimeOfDay,
}

fn require_schedule_manager(actor: &Actor) -> Result<(), AppError> {
    if actor.role.can_manage_schedules() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Role {} cannot manage doctor schedules",
            actor.role
        )))
    }
}

#[axum::debug_handler]
pub async fn create_doctor(
    State(state): State<DoctorState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CreateDoctorRequest>,
) -> Result<Json<Value>, AppError> {
    require_schedule_manager(&actor)?;
    let ctx = state.tenants.open(&actor.tenant_id).await?;
    let doctor_service = DoctorService::new(&state.config);

    let doctor = doctor_service.create_doctor(&ctx, request).await?;
    Ok(Json(json!(doctor)))
}

#[axum::debug_handler]
pub async fn get_doctor(
    State(state): State<DoctorState>,
    Extension(actor): Extension<Actor>,
    Path(doctor_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let ctx = state.tenants.open(&actor.tenant_id).await?;
    let doctor_service = DoctorService::new(&state.config);

    let doctor = doctor_service.get_doctor(&ctx, &doctor_id).await?;
    Ok(Json(json!(doctor)))
}

#[axum::debug_handler]
pub async fn save_weekly_availability(
    State(state): State<DoctorState>,
    Extension(actor): Extension<Actor>,
    Path(doctor_id): Path<String>,
    Json(request): Json<WeeklyAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    require_schedule_manager(&actor)?;
    let ctx = state.tenants.open(&actor.tenant_id).await?;
    let doctor_service = DoctorService::new(&state.config);

    let doctor = doctor_service
        .save_weekly_availability(&ctx, &doctor_id, request)
        .await?;
    Ok(Json(json!({
        "doctor_id": doctor.id,
        "appointment_duration": doctor.appointment_duration,
        "weekly_template": doctor.weekly_template,
    })))
}

#[axum::debug_handler]
pub async fn upsert_date_exception(
    State(state): State<DoctorState>,
    Extension(actor): Extension<Actor>,
    Path((doctor_id, date)): Path<(String, NaiveDate)>,
    Json(request): Json<DateExceptionRequest>,
) -> Result<Json<Value>, AppError> {
    require_schedule_manager(&actor)?;
    let ctx = state.tenants.open(&actor.tenant_id).await?;
    let doctor_service = DoctorService::new(&state.config);

    let doctor = doctor_service
        .upsert_date_exception(&ctx, &doctor_id, date, request)
        .await?;
    Ok(Json(json!({
        "doctor_id": doctor.id,
        "exception": doctor.exception(date),
    })))
}

#[axum::debug_handler]
pub async fn remove_date_exception(
    State(state): State<DoctorState>,
    Extension(actor): Extension<Actor>,
    Path((doctor_id, date)): Path<(String, NaiveDate)>,
) -> Result<Json<Value>, AppError> {
    require_schedule_manager(&actor)?;
    let ctx = state.tenants.open(&actor.tenant_id).await?;
    let doctor_service = DoctorService::new(&state.config);

    let doctor = doctor_service.remove_date_exception(&ctx, &doctor_id, date).await?;
    Ok(Json(json!({
        "doctor_id": doctor.id,
        "date": date,
        "removed": true,
    })))
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<DoctorState>,
    Extension(actor): Extension<Actor>,
    Path(doctor_id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let ctx = state.tenants.open(&actor.tenant_id).await?;
    let doctor_service = DoctorService::new(&state.config);

    let slots = doctor_service.available_slots(&ctx, &doctor_id, query.date).await?;
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "date": query.date,
        "available_slots": slots,
        "total": slots.len(),
    })))
}

#[axum::debug_handler]
pub async fn check_availability(
    State(state): State<DoctorState>,
    Extension(actor): Extension<Actor>,
    Path(doctor_id): Path<String>,
    Query(query): Query<CheckQuery>,
) -> Result<Json<Value>, AppError> {
    let ctx = state.tenants.open(&actor.tenant_id).await?;
    let doctor_service = DoctorService::new(&state.config);

    let check = doctor_service
        .check_availability(&ctx, &doctor_id, query.date, query.time)
        .await?;
    Ok(Json(json!(check)))
}
