use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;
use shared_utils::AppState;

use crate::handlers;

pub fn doctor_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/slots/bulk", post(handlers::get_bulk_available_slots))
        .route("/windows/archive-expired", post(handlers::archive_expired_windows))
        .route("/{doctor_id}/slots", get(handlers::get_available_slots))
        .route(
            "/{doctor_id}/windows",
            post(handlers::create_window).get(handlers::list_windows),
        )
        .route("/{doctor_id}/duty-hours", post(handlers::generate_duty_hours))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
