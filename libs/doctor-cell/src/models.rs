use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::error::AppError;
use shared_models::scheduling::AvailabilityWindow;
use shared_utils::civil_time::{format_civil_date, format_time_of_day, CivilTimeError};

// ==============================================================================
// SLOT MODELS
// ==============================================================================

/// One bookable slot, rendered as civil `HH:mm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotQuery {
    pub clinic_id: Uuid,
    pub date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkSlotRequest {
    pub doctor_ids: Vec<Uuid>,
    pub clinic_id: Uuid,
    pub date: String,
}

// ==============================================================================
// WINDOW MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWindowRequest {
    pub clinic_id: Uuid,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowQuery {
    pub clinic_id: Uuid,
    pub date: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DutyHourRequest {
    pub clinic_id: Uuid,
    pub start_time: String,
    pub end_time: String,
}

/// Wire shape of a window: civil date and times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowView {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub archived: bool,
}

impl From<&AvailabilityWindow> for WindowView {
    fn from(window: &AvailabilityWindow) -> Self {
        Self {
            id: window.id,
            doctor_id: window.doctor_id,
            clinic_id: window.clinic_id,
            date: format_civil_date(window.date),
            start_time: format_time_of_day(window.start_time),
            end_time: format_time_of_day(window.end_time),
            archived: !window.is_active(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DutyHourResponse {
    pub from: String,
    pub to: String,
    pub windows: Vec<WindowView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveResponse {
    pub archived: usize,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Error)]
pub enum AvailabilityError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("end must be after start")]
    InvalidTimeRange,

    #[error("availability conflicts with existing schedule")]
    WindowConflict,

    #[error("clinic/doctor not found")]
    AssignmentNotFound,

    #[error("{0}")]
    Unauthorized(String),

    #[error("scheduling busy, try again: {0}")]
    Busy(String),

    #[error("database error: {0}")]
    DatabaseError(String),
}

impl AvailabilityError {
    pub fn code(&self) -> &'static str {
        match self {
            AvailabilityError::InvalidInput(_) => "invalid_input",
            AvailabilityError::InvalidTimeRange => "invalid_time_range",
            AvailabilityError::WindowConflict => "availability_conflict",
            AvailabilityError::AssignmentNotFound => "not_found",
            AvailabilityError::Unauthorized(_) => "forbidden",
            AvailabilityError::Busy(_) => "retryable",
            AvailabilityError::DatabaseError(_) => "database",
        }
    }
}

impl From<CivilTimeError> for AvailabilityError {
    fn from(err: CivilTimeError) -> Self {
        AvailabilityError::InvalidInput(err.to_string())
    }
}

impl From<StoreError> for AvailabilityError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Busy(msg) | StoreError::Conflict(msg) => AvailabilityError::Busy(msg),
            StoreError::Unavailable(msg) | StoreError::Database(msg) => AvailabilityError::DatabaseError(msg),
        }
    }
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        let code = err.code().to_string();
        match err {
            AvailabilityError::InvalidInput(msg) => AppError::ValidationError(msg),
            AvailabilityError::AssignmentNotFound => AppError::NotFound(err.to_string()),
            AvailabilityError::Unauthorized(msg) => AppError::Forbidden(msg),
            AvailabilityError::Busy(msg) => AppError::ServiceUnavailable(msg),
            AvailabilityError::DatabaseError(msg) => AppError::Database(msg),
            AvailabilityError::WindowConflict => AppError::SchedulingConflict {
                code,
                message: err.to_string(),
            },
            AvailabilityError::InvalidTimeRange => AppError::Rejected {
                code,
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_errors_keep_stable_codes() {
        let err: AppError = AvailabilityError::WindowConflict.into();
        assert_eq!(err.code(), "availability_conflict");

        let err: AppError = AvailabilityError::InvalidTimeRange.into();
        assert_eq!(err.code(), "invalid_time_range");
        assert_eq!(err.to_string(), "Rejected (invalid_time_range): end must be after start");
    }

    #[test]
    fn lock_contention_is_retryable() {
        let err: AvailabilityError = StoreError::Busy("doctor:x".to_string()).into();
        assert_eq!(err.code(), "retryable");
    }
}
