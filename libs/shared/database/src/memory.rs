//! In-process scheduling store.
//!
//! `begin` takes a single mutex over the whole data set, so every unit of
//! work is serializable. Writes go to a working copy that replaces the
//! shared state on commit. A partial unique index on active appointments
//! (doctor, date, start) is enforced the way Postgres would.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use shared_models::scheduling::{
    Appointment, AppointmentStatus, AvailabilityWindow, ClinicAssignment,
};

use crate::store::{LockScope, SchedulingStore, SchedulingTx, StoreError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    windows: Vec<AvailabilityWindow>,
    appointments: HashMap<Uuid, Appointment>,
    assignments: Vec<ClinicAssignment>,
    consultation_records: HashSet<Uuid>,
}

impl MemoryState {
    fn check_unique_slot(&self, candidate: &Appointment) -> Result<(), StoreError> {
        if !candidate.status.is_blocking() {
            return Ok(());
        }
        let clash = self.appointments.values().any(|existing| {
            existing.id != candidate.id
                && existing.status.is_blocking()
                && existing.doctor_id == candidate.doctor_id
                && existing.date == candidate.date
                && existing.start_time == candidate.start_time
        });
        if clash {
            return Err(StoreError::Conflict(format!(
                "duplicate key (doctor_id, date, start_time) = ({}, {}, {})",
                candidate.doctor_id, candidate.date, candidate.start_time
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_assignment(&self, assignment: ClinicAssignment) {
        self.state.lock().await.assignments.push(assignment);
    }

    pub async fn seed_window(&self, window: AvailabilityWindow) {
        self.state.lock().await.windows.push(window);
    }

    pub async fn seed_appointment(&self, appointment: Appointment) {
        self.state.lock().await.appointments.insert(appointment.id, appointment);
    }

    pub async fn record_consultation(&self, appointment_id: Uuid) {
        self.state.lock().await.consultation_records.insert(appointment_id);
    }

    pub async fn appointments(&self) -> Vec<Appointment> {
        let state = self.state.lock().await;
        let mut appointments: Vec<Appointment> = state.appointments.values().cloned().collect();
        appointments.sort_by_key(|apt| (apt.date, apt.start_time));
        appointments
    }

    pub async fn windows(&self) -> Vec<AvailabilityWindow> {
        let state = self.state.lock().await;
        let mut windows = state.windows.clone();
        windows.sort_by_key(|w| (w.date, w.start_time));
        windows
    }
}

#[async_trait]
impl SchedulingStore for MemoryStore {
    async fn begin(&self, scope: LockScope) -> Result<Box<dyn SchedulingTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        debug!("Memory unit of work opened over {} lock keys", scope.len());
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

fn filter_by_status<'a, I>(appointments: I, statuses: &[AppointmentStatus]) -> Vec<Appointment>
where
    I: Iterator<Item = &'a Appointment>,
{
    let mut matched: Vec<Appointment> = appointments
        .filter(|apt| statuses.contains(&apt.status))
        .cloned()
        .collect();
    matched.sort_by_key(|apt| apt.start_time);
    matched
}

#[async_trait]
impl SchedulingTx for MemoryTx {
    async fn active_windows(
        &mut self,
        doctor_id: Uuid,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let mut windows: Vec<AvailabilityWindow> = self
            .working
            .windows
            .iter()
            .filter(|w| w.doctor_id == doctor_id && w.clinic_id == clinic_id && w.date == date)
            .filter(|w| w.is_active())
            .cloned()
            .collect();
        windows.sort_by_key(|w| w.start_time);
        Ok(windows)
    }

    async fn doctor_appointments(
        &mut self,
        doctor_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(filter_by_status(
            self.working
                .appointments
                .values()
                .filter(|apt| apt.doctor_id == doctor_id && apt.date == date),
            statuses,
        ))
    }

    async fn patient_appointments(
        &mut self,
        patient_id: Uuid,
        date: NaiveDate,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(filter_by_status(
            self.working
                .appointments
                .values()
                .filter(|apt| apt.patient_id == patient_id && apt.date == date),
            statuses,
        ))
    }

    async fn appointment(&mut self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.working.appointments.get(&appointment_id).cloned())
    }

    async fn insert_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError> {
        if self.working.appointments.contains_key(&appointment.id) {
            return Err(StoreError::Conflict(format!("appointment {} already exists", appointment.id)));
        }
        self.working.check_unique_slot(appointment)?;
        self.working.appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn update_appointment(&mut self, appointment: &Appointment) -> Result<(), StoreError> {
        if !self.working.appointments.contains_key(&appointment.id) {
            return Err(StoreError::Database(format!("appointment {} does not exist", appointment.id)));
        }
        self.working.check_unique_slot(appointment)?;
        self.working.appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn has_consultation_record(&mut self, appointment_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.working.consultation_records.contains(&appointment_id))
    }

    async fn clinic_assignment(
        &mut self,
        doctor_id: Uuid,
        clinic_id: Uuid,
    ) -> Result<Option<ClinicAssignment>, StoreError> {
        Ok(self
            .working
            .assignments
            .iter()
            .find(|a| a.doctor_id == doctor_id && a.clinic_id == clinic_id)
            .cloned())
    }

    async fn insert_window(&mut self, window: &AvailabilityWindow) -> Result<(), StoreError> {
        self.working.windows.push(window.clone());
        Ok(())
    }

    async fn replace_windows(
        &mut self,
        doctor_id: Uuid,
        clinic_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
        windows: &[AvailabilityWindow],
    ) -> Result<(), StoreError> {
        self.working.windows.retain(|w| {
            !(w.doctor_id == doctor_id && w.clinic_id == clinic_id && w.date >= from && w.date <= to)
        });
        self.working.windows.extend_from_slice(windows);
        Ok(())
    }

    async fn archive_windows_before(
        &mut self,
        cutoff: NaiveDate,
        archived_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut archived = 0;
        for window in self.working.windows.iter_mut() {
            if window.is_active() && window.date < cutoff {
                window.archived_at = Some(archived_at);
                archived += 1;
            }
        }
        Ok(archived)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn appointment(doctor_id: Uuid, start_hour: u32, status: AppointmentStatus) -> Appointment {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, start_hour, 0, 0).unwrap();
        Appointment {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id,
            clinic_id: Uuid::nil(),
            created_by: Uuid::nil(),
            date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            start_time: start,
            end_time: start + chrono::Duration::minutes(30),
            service_type: "consultation".to_string(),
            status,
            remarks: None,
            created_at: start,
            updated_at: start,
        }
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        let doctor = Uuid::new_v4();
        {
            let mut tx = store.begin(LockScope::new()).await.unwrap();
            tx.insert_appointment(&appointment(doctor, 1, AppointmentStatus::Pending))
                .await
                .unwrap();
        }
        assert!(store.appointments().await.is_empty());
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = MemoryStore::new();
        let doctor = Uuid::new_v4();
        let mut tx = store.begin(LockScope::new()).await.unwrap();
        tx.insert_appointment(&appointment(doctor, 1, AppointmentStatus::Pending))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.appointments().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_active_start_is_a_conflict() {
        let store = MemoryStore::new();
        let doctor = Uuid::new_v4();
        store.seed_appointment(appointment(doctor, 1, AppointmentStatus::Approved)).await;

        let mut tx = store.begin(LockScope::new()).await.unwrap();
        let result = tx
            .insert_appointment(&appointment(doctor, 1, AppointmentStatus::Pending))
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn cancelled_rows_do_not_hold_the_unique_slot() {
        let store = MemoryStore::new();
        let doctor = Uuid::new_v4();
        store.seed_appointment(appointment(doctor, 1, AppointmentStatus::Cancelled)).await;

        let mut tx = store.begin(LockScope::new()).await.unwrap();
        tx.insert_appointment(&appointment(doctor, 1, AppointmentStatus::Pending))
            .await
            .unwrap();
    }
}
