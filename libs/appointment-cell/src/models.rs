use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::auth::{Role, User};
use shared_models::error::AppError;
use shared_models::scheduling::{Appointment, AppointmentStatus};
use shared_utils::civil_time::{format_civil_date, format_time_of_day, CivilTimeError};

// ==============================================================================
// ACTORS
// ==============================================================================

/// Who is asking for a scheduling change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActingParty {
    Patient(Uuid),
    Doctor(Uuid),
    /// Staff booking on a patient's behalf.
    Scholar(Uuid),
}

impl ActingParty {
    pub fn id(&self) -> Uuid {
        match self {
            ActingParty::Patient(id) | ActingParty::Doctor(id) | ActingParty::Scholar(id) => *id,
        }
    }

    pub fn from_user(user: &User) -> Result<Self, AppointmentError> {
        let id = Uuid::parse_str(&user.id)
            .map_err(|_| AppointmentError::Unauthorized("user id is not a valid UUID".to_string()))?;
        match user.role_kind() {
            Some(Role::Patient) => Ok(ActingParty::Patient(id)),
            Some(Role::Doctor) => Ok(ActingParty::Doctor(id)),
            Some(Role::Scholar) => Ok(ActingParty::Scholar(id)),
            _ => Err(AppointmentError::Unauthorized(
                "only patients, doctors and scholars can change appointments".to_string(),
            )),
        }
    }

    pub fn owns(&self, appointment: &Appointment) -> bool {
        match self {
            ActingParty::Patient(id) => appointment.patient_id == *id,
            ActingParty::Doctor(id) => appointment.doctor_id == *id,
            ActingParty::Scholar(id) => appointment.created_by == *id,
        }
    }
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointmentRequest {
    /// Required when a scholar books; a patient always books for themselves.
    pub patient_id: Option<Uuid>,
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub service_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleChangeRequest {
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentView {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub created_by: Uuid,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub service_type: String,
    pub status: AppointmentStatus,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Appointment> for AppointmentView {
    fn from(appointment: &Appointment) -> Self {
        Self {
            id: appointment.id,
            patient_id: appointment.patient_id,
            doctor_id: appointment.doctor_id,
            clinic_id: appointment.clinic_id,
            created_by: appointment.created_by,
            date: format_civil_date(appointment.date),
            start_time: format_time_of_day(appointment.start_time),
            end_time: format_time_of_day(appointment.end_time),
            service_type: appointment.service_type.clone(),
            status: appointment.status,
            remarks: appointment.remarks.clone(),
            created_at: appointment.created_at,
            updated_at: appointment.updated_at,
        }
    }
}

// ==============================================================================
// ERROR MODELS
// ==============================================================================

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid time range")]
    InvalidTimeRange,

    #[error("outside availability")]
    OutsideAvailability,

    #[error("slot already booked")]
    SlotAlreadyBooked,

    #[error("cannot move into the past")]
    InThePast,

    #[error("must be at least {days} days in advance")]
    InsufficientNotice { days: i64 },

    #[error("you already booked another appointment for this time")]
    PatientConflict,

    #[error("appointment is {0} and can no longer be modified")]
    NotModifiable(AppointmentStatus),

    #[error("cannot change status from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("consultation record required")]
    ConsultationRecordRequired,

    #[error("a reason is required to move an appointment")]
    ReasonRequired,

    #[error("Appointment not found")]
    NotFound,

    #[error("{0}")]
    Unauthorized(String),

    #[error("scheduling busy, try again: {0}")]
    Busy(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl AppointmentError {
    pub fn code(&self) -> &'static str {
        match self {
            AppointmentError::InvalidInput(_) => "invalid_input",
            AppointmentError::InvalidTimeRange => "invalid_time_range",
            AppointmentError::OutsideAvailability => "outside_availability",
            AppointmentError::SlotAlreadyBooked => "slot_already_booked",
            AppointmentError::InThePast => "in_the_past",
            AppointmentError::InsufficientNotice { .. } => "insufficient_notice",
            AppointmentError::PatientConflict => "patient_conflict",
            AppointmentError::NotModifiable(_) => "not_modifiable",
            AppointmentError::InvalidStatusTransition { .. } => "invalid_status_transition",
            AppointmentError::ConsultationRecordRequired => "consultation_record_required",
            AppointmentError::ReasonRequired => "reason_required",
            AppointmentError::NotFound => "not_found",
            AppointmentError::Unauthorized(_) => "forbidden",
            AppointmentError::Busy(_) => "retryable",
            AppointmentError::DatabaseError(_) => "database",
        }
    }
}

impl From<CivilTimeError> for AppointmentError {
    fn from(err: CivilTimeError) -> Self {
        AppointmentError::InvalidInput(err.to_string())
    }
}

/// Conflicts reaching this conversion have already used their retry.
impl From<StoreError> for AppointmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => AppointmentError::SlotAlreadyBooked,
            StoreError::Busy(msg) => AppointmentError::Busy(msg),
            StoreError::Unavailable(msg) | StoreError::Database(msg) => AppointmentError::DatabaseError(msg),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let code = err.code().to_string();
        match err {
            AppointmentError::InvalidInput(msg) => AppError::ValidationError(msg),
            AppointmentError::NotFound => AppError::NotFound(err.to_string()),
            AppointmentError::Unauthorized(msg) => AppError::Forbidden(msg),
            AppointmentError::Busy(msg) => AppError::ServiceUnavailable(msg),
            AppointmentError::DatabaseError(msg) => AppError::Database(msg),
            AppointmentError::SlotAlreadyBooked | AppointmentError::PatientConflict => {
                AppError::SchedulingConflict { code, message: err.to_string() }
            }
            _ => AppError::Rejected { code, message: err.to_string() },
        }
    }
}
