use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::actor_middleware;
use tenant_cell::TenantRegistry;

use crate::handlers;

#[derive(Clone)]
pub struct DoctorState {
    pub config: Arc<AppConfig>,
    pub tenants: Arc<TenantRegistry>,
}

pub fn doctor_routes(state: DoctorState) -> Router {
    Router::new()
        .route("/", post(handlers::create_doctor))
        .route("/{doctor_id}", get(handlers::get_doctor))
        .route("/{doctor_id}/availability", put(handlers::save_weekly_availability))
        .route("/{doctor_id}/availability/check", get(handlers::check_availability))
        .route("/{doctor_id}/available-slots", get(handlers::get_available_slots))
        .route(
            "/{doctor_id}/exceptions/{date}",
            put(handlers::upsert_date_exception).delete(handlers::remove_date_exception),
        )
        .layer(middleware::from_fn(actor_middleware))
        .with_state(state)
}
