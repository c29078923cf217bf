use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_utils::civil_time::{format_civil_date, Clock};
use shared_utils::AppState;

use crate::models::{
    ArchiveResponse, AvailabilityError, BulkSlotRequest, CreateWindowRequest, DutyHourRequest,
    DutyHourResponse, SlotQuery, WindowQuery, WindowView,
};
use crate::services::{AvailabilityService, DutyHourService};

/// Only the doctor themselves (or an admin) may change a doctor's windows.
fn ensure_can_manage(user: &User, doctor_id: Uuid) -> Result<(), AvailabilityError> {
    let is_self = user.role_kind() == Some(Role::Doctor) && user.id == doctor_id.to_string();
    if is_self || user.is_admin() {
        Ok(())
    } else {
        Err(AvailabilityError::Unauthorized(
            "Not authorized to manage availability for this doctor".to_string(),
        ))
    }
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state);
    let slots = service.available_slots(doctor_id, query.clinic_id, &query.date).await?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "clinic_id": query.clinic_id,
        "date": query.date,
        "slots": slots,
    })))
}

#[axum::debug_handler]
pub async fn get_bulk_available_slots(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BulkSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state);
    let slots = service
        .bulk_available_slots(&request.doctor_ids, request.clinic_id, &request.date)
        .await?;

    Ok(Json(json!({
        "clinic_id": request.clinic_id,
        "date": request.date,
        "slots": slots,
    })))
}

#[axum::debug_handler]
pub async fn create_window(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateWindowRequest>,
) -> Result<Json<WindowView>, AppError> {
    ensure_can_manage(&user, doctor_id)?;

    let service = AvailabilityService::new(&state);
    let window = service.create_window(doctor_id, &request, state.clock.now()).await?;

    Ok(Json(WindowView::from(&window)))
}

#[axum::debug_handler]
pub async fn list_windows(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<WindowView>>, AppError> {
    let service = AvailabilityService::new(&state);
    let windows = service.list_windows(doctor_id, query.clinic_id, &query.date).await?;

    Ok(Json(windows.iter().map(WindowView::from).collect()))
}

#[axum::debug_handler]
pub async fn generate_duty_hours(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<DutyHourRequest>,
) -> Result<Json<DutyHourResponse>, AppError> {
    ensure_can_manage(&user, doctor_id)?;

    let service = DutyHourService::new(&state);
    let windows = service.generate_duty_hours(doctor_id, &request, state.clock.now()).await?;

    let (from, to) = match (windows.first(), windows.last()) {
        (Some(first), Some(last)) => (format_civil_date(first.date), format_civil_date(last.date)),
        _ => return Err(AppError::Internal("Duty-hour generation produced no windows".to_string())),
    };

    Ok(Json(DutyHourResponse {
        from,
        to,
        windows: windows.iter().map(WindowView::from).collect(),
    }))
}

#[axum::debug_handler]
pub async fn archive_expired_windows(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<ArchiveResponse>, AppError> {
    if !user.is_admin() {
        return Err(AppError::Forbidden("Only admins can run the expiry sweep".to_string()));
    }

    let service = AvailabilityService::new(&state);
    let archived = service.archive_expired_windows(state.clock.now()).await?;

    Ok(Json(ArchiveResponse { archived }))
}
