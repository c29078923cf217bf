//! Unit-of-work abstraction over the scheduling tables.
//!
//! A booking decision reads windows and appointments, checks them, then
//! writes. All three steps run against one [`SchedulingTx`] obtained from
//! [`SchedulingStore::begin`]; no other writer touching the same lock scope
//! can interleave until the transaction is committed or dropped.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use shared_models::scheduling::{
    Appointment, AppointmentStatus, AvailabilityWindow, ClinicAssignment,
};

use crate::supabase::SupabaseError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A concurrent writer won: unique violation or serialization failure.
    #[error("write conflicts with a concurrent change: {0}")]
    Conflict(String),

    /// The lock scope stayed held by someone else past the retry budget.
    #[error("scheduling lock is busy: {0}")]
    Busy(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<SupabaseError> for StoreError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Conflict(msg) => StoreError::Conflict(msg),
            SupabaseError::Transport(e) => StoreError::Unavailable(e.to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// The set of lock keys a unit of work serializes on.
///
/// Keys are kept ordered so every caller acquires them in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockScope {
    keys: BTreeSet<String>,
}

impl LockScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doctor_day(doctor_id: Uuid, date: NaiveDate) -> Self {
        Self::new().with_doctor_day(doctor_id, date)
    }

    pub fn doctor_days<I>(doctor_id: Uuid, dates: I) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        dates
            .into_iter()
            .fold(Self::new(), |scope, date| scope.with_doctor_day(doctor_id, date))
    }

    pub fn with_doctor_day(mut self, doctor_id: Uuid, date: NaiveDate) -> Self {
        self.keys.insert(format!("doctor:{}:{}", doctor_id, date));
        self
    }

    pub fn with_patient_day(mut self, patient_id: Uuid, date: NaiveDate) -> Self {
        self.keys.insert(format!("patient:{}:{}", patient_id, date));
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.keys.insert(key.into());
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// One isolated read-check-write sequence. Dropping without [`commit`]
/// discards every staged write.
///
/// [`commit`]: SchedulingTx::commit
#[async_trait]
pub trait SchedulingTx: Send {
    /// Non-archived windows for the doctor/clinic/date, ordered by start.
    async fn active_windows(
        &mut self,
        doctor_id: Uuid,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, StoreError>;

    async fn doctor_appointments(
        &mut self,
        doctor_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn patient_appointments(
        &mut self,
        patient_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn appointment(&mut self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError>;

    async fn insert_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError>;

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError>;

    async fn has_consultation_record(&mut self, appointment_id: Uuid) -> Result<bool, StoreError>;

    async fn clinic_assignment(
        &mut self,
        doctor_id: Uuid,
        clinic_id: Uuid,
    ) -> Result<Option<ClinicAssignment>, StoreError>;

    async fn insert_window(&mut self, window: &AvailabilityWindow) -> Result<(), StoreError>;

    /// Deletes every window of (doctor, clinic) dated `from..=to`, then inserts `windows`.
    async fn replace_windows(
        &mut self,
        doctor_id: Uuid,
        clinic_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        windows: &[AvailabilityWindow],
    ) -> Result<(), StoreError>;

    /// Archives active windows dated strictly before `cutoff`. Returns how many.
    async fn archive_windows_before(
        &mut self,
        cutoff: NaiveDate,
        archived_at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SchedulingStore: Send + Sync {
    async fn begin(&self, scope: LockScope) -> Result<Box<dyn SchedulingTx>, StoreError>;
}
