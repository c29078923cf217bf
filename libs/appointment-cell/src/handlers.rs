// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::civil_time::Clock;
use shared_utils::AppState;

use crate::models::{ActingParty, AppointmentView, CreateAppointmentRequest, ScheduleChangeRequest};
use crate::services::{AppointmentLifecycleService, BookingService};

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<AppointmentView>), AppError> {
    let actor = ActingParty::from_user(&user)?;
    let service = BookingService::new(&state);

    let appointment = service.create_appointment(&request, actor, state.clock.now()).await?;

    Ok((StatusCode::CREATED, Json(AppointmentView::from(&appointment))))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<AppointmentView>, AppError> {
    let service = AppointmentLifecycleService::new(&state);
    let appointment = service.get_appointment(appointment_id).await?;

    let visible = user.is_admin()
        || ActingParty::from_user(&user).map_or(false, |actor| actor.owns(&appointment));
    if !visible {
        debug!("User {} denied access to appointment {}", user.id, appointment_id);
        return Err(AppError::Forbidden("Not authorized to view this appointment".to_string()));
    }

    Ok(Json(AppointmentView::from(&appointment)))
}

/// Doctor move or patient reschedule; the caller's role decides which.
#[axum::debug_handler]
pub async fn change_schedule(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<ScheduleChangeRequest>,
) -> Result<Json<AppointmentView>, AppError> {
    let actor = ActingParty::from_user(&user)?;
    let service = BookingService::new(&state);

    let appointment = service
        .move_or_reschedule(appointment_id, actor, &request, state.clock.now())
        .await?;

    Ok(Json(AppointmentView::from(&appointment)))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<AppointmentView>, AppError> {
    let actor = ActingParty::from_user(&user)?;
    let service = AppointmentLifecycleService::new(&state);

    let appointment = service.cancel(appointment_id, actor, state.clock.now()).await?;

    Ok(Json(AppointmentView::from(&appointment)))
}

#[axum::debug_handler]
pub async fn approve_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<AppointmentView>, AppError> {
    let actor = ActingParty::from_user(&user)?;
    let service = AppointmentLifecycleService::new(&state);

    let appointment = service.approve(appointment_id, actor, state.clock.now()).await?;

    Ok(Json(AppointmentView::from(&appointment)))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<AppointmentView>, AppError> {
    let actor = ActingParty::from_user(&user)?;
    let service = AppointmentLifecycleService::new(&state);

    let appointment = service.complete(appointment_id, actor, state.clock.now()).await?;

    Ok(Json(AppointmentView::from(&appointment)))
}
