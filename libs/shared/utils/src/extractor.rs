use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use shared_models::auth::{Actor, ActorRole};
use shared_models::error::AppError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .ok_or_else(|| AppError::Auth(format!("Missing {} header", name)))?
        .to_str()
        .map(str::trim)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Auth(format!("Invalid {} header", name)))
}

/// Builds the caller from the identity headers set by the authenticating gateway.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let tenant_id = header(headers, TENANT_HEADER)?;
    let id = header(headers, ACTOR_ID_HEADER)?;
    let role = header(headers, ACTOR_ROLE_HEADER)?;
    let role = ActorRole::parse(role).ok_or_else(|| AppError::Auth(format!("Unknown actor role '{}'", role)))?;
    let name = headers
        .get(ACTOR_NAME_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(id);

    Ok(Actor::new(id, name, role, tenant_id))
}

// Middleware that binds the gateway-authenticated actor to the request
pub async fn actor_middleware(mut request: Request<Body>, next: Next) -> Result<Response, AppError> {
    let actor = actor_from_headers(request.headers())?;
    debug!("Request by {} ({}) for tenant {}", actor.id, actor.role, actor.tenant_id);

    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}

pub fn extract_actor<B>(request: &Request<B>) -> Result<Actor, AppError> {
    request
        .extensions()
        .get::<Actor>()
        .cloned()
        .ok_or_else(|| AppError::Auth("Actor not found in request extensions".to_string()))
}
