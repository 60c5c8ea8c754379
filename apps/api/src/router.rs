use std::sync::Arc;

use axum::{
    Router,
    routing::get,
    Json,
};
use serde_json::{json, Value};

use appointment_cell::{appointment_routes, AppointmentBookingService, AppointmentState};
use doctor_cell::{doctor_routes, DoctorState};
use shared_config::AppConfig;
use tenant_cell::TenantRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tenants: Arc<TenantRegistry>,
    pub booking: Arc<AppointmentBookingService>,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn create_router(state: AppState) -> Router {
    let doctors = DoctorState {
        config: state.config.clone(),
        tenants: state.tenants.clone(),
    };
    let appointments = AppointmentState {
        config: state.config.clone(),
        tenants: state.tenants.clone(),
        booking: state.booking.clone(),
    };

    Router::new()
        .route("/", get(|| async { "Clinic API is running!" }))
        .route("/health", get(health))
        .nest("/doctors", doctor_routes(doctors))
        .nest("/appointments", appointment_routes(appointments))
}
