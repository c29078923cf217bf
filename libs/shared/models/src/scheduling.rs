// libs/shared/models/src/scheduling.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// AVAILABILITY
// ==============================================================================

/// An interval a doctor declared bookable at one clinic on one civil date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AvailabilityWindow {
    pub fn is_active(&self) -> bool {
        self.archived_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecializationCategory {
    /// Monday to Friday duty.
    Specialist,
    /// Monday to Saturday duty.
    GeneralPractice,
}

impl SpecializationCategory {
    pub fn duty_days(&self) -> u32 {
        match self {
            SpecializationCategory::Specialist => 5,
            SpecializationCategory::GeneralPractice => 6,
        }
    }
}

/// A doctor's posting at a clinic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicAssignment {
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub specialization: SpecializationCategory,
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub created_by: Uuid,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub service_type: String,
    pub status: AppointmentStatus,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Approved,
    Moved,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Statuses that occupy a doctor's (or patient's) time.
    pub const BLOCKING: [AppointmentStatus; 3] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Approved,
        AppointmentStatus::Moved,
    ];

    pub fn is_blocking(&self) -> bool {
        Self::BLOCKING.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Approved => write!(f, "approved"),
            AppointmentStatus::Moved => write!(f, "moved"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}
