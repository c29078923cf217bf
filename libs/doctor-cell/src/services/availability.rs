use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_config::SchedulingRules;
use shared_database::{LockScope, SchedulingStore, SchedulingTx};
use shared_models::scheduling::{AppointmentStatus, AvailabilityWindow};
use shared_utils::civil_time::{civil_date_of, civil_instant, parse_civil_date, parse_time_of_day};
use shared_utils::interval::TimeInterval;
use shared_utils::AppState;

use crate::models::{AvailabilityError, CreateWindowRequest, SlotView};
use crate::services::slots::{generate_slots, to_slot_views};

/// Lock key shared by every expiry sweep.
const ARCHIVE_SWEEP_KEY: &str = "windows:archive";

pub struct AvailabilityService {
    store: Arc<dyn SchedulingStore>,
    rules: SchedulingRules,
}

impl AvailabilityService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: Arc::clone(&state.store),
            rules: state.config.scheduling.clone(),
        }
    }

    /// Free slots for one doctor at one clinic on a civil date.
    #[instrument(skip(self))]
    pub async fn available_slots(
        &self,
        doctor_id: Uuid,
        clinic_id: Uuid,
        date: &str,
    ) -> Result<Vec<SlotView>, AvailabilityError> {
        let date = parse_civil_date(date)?;
        let mut tx = self.store.begin(LockScope::new()).await?;
        let slots = self.slots_in(tx.as_mut(), doctor_id, clinic_id, date).await?;

        debug!("Doctor {} has {} free slots on {}", doctor_id, slots.len(), date);
        Ok(slots)
    }

    /// Same walk per doctor. Doctors without windows map to an empty list.
    #[instrument(skip(self, doctor_ids), fields(doctors = doctor_ids.len()))]
    pub async fn bulk_available_slots(
        &self,
        doctor_ids: &[Uuid],
        clinic_id: Uuid,
        date: &str,
    ) -> Result<BTreeMap<Uuid, Vec<SlotView>>, AvailabilityError> {
        let date = parse_civil_date(date)?;
        let mut tx = self.store.begin(LockScope::new()).await?;

        let mut by_doctor = BTreeMap::new();
        for doctor_id in doctor_ids {
            let slots = self.slots_in(tx.as_mut(), *doctor_id, clinic_id, date).await?;
            by_doctor.insert(*doctor_id, slots);
        }
        Ok(by_doctor)
    }

    async fn slots_in(
        &self,
        tx: &mut dyn SchedulingTx,
        doctor_id: Uuid,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<SlotView>, AvailabilityError> {
        let windows = tx.active_windows(doctor_id, clinic_id, date).await?;
        if windows.is_empty() {
            return Ok(Vec::new());
        }

        let blocking: Vec<TimeInterval> = tx
            .doctor_appointments(doctor_id, date, &AppointmentStatus::BLOCKING)
            .await?
            .iter()
            .map(TimeInterval::from)
            .collect();

        let slots = generate_slots(&windows, &blocking, self.rules.slot_minutes);
        Ok(to_slot_views(&slots))
    }

    /// Declares one consultation window. Rejects overlap with the doctor's
    /// other active windows at the same clinic and date.
    #[instrument(skip(self, request), fields(clinic_id = %request.clinic_id, date = %request.date))]
    pub async fn create_window(
        &self,
        doctor_id: Uuid,
        request: &CreateWindowRequest,
        now: DateTime<Utc>,
    ) -> Result<AvailabilityWindow, AvailabilityError> {
        let date = parse_civil_date(&request.date)?;
        let start = civil_instant(date, parse_time_of_day(&request.start_time)?);
        let end = civil_instant(date, parse_time_of_day(&request.end_time)?);

        let candidate = TimeInterval::new(start, end);
        if !candidate.is_valid() {
            return Err(AvailabilityError::InvalidTimeRange);
        }

        let mut tx = self.store.begin(LockScope::doctor_day(doctor_id, date)).await?;

        if tx.clinic_assignment(doctor_id, request.clinic_id).await?.is_none() {
            return Err(AvailabilityError::AssignmentNotFound);
        }

        let existing = tx.active_windows(doctor_id, request.clinic_id, date).await?;
        if existing.iter().any(|w| candidate.overlaps(&TimeInterval::from(w))) {
            return Err(AvailabilityError::WindowConflict);
        }

        let window = AvailabilityWindow {
            id: Uuid::new_v4(),
            doctor_id,
            clinic_id: request.clinic_id,
            date,
            start_time: start,
            end_time: end,
            archived_at: None,
            created_at: now,
        };
        tx.insert_window(&window).await?;
        tx.commit().await?;

        info!("Created availability window {} for doctor {}", window.id, doctor_id);
        Ok(window)
    }

    pub async fn list_windows(
        &self,
        doctor_id: Uuid,
        clinic_id: Uuid,
        date: &str,
    ) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
        let date = parse_civil_date(date)?;
        let mut tx = self.store.begin(LockScope::new()).await?;
        Ok(tx.active_windows(doctor_id, clinic_id, date).await?)
    }

    /// Archives every active window dated before today's civil date.
    #[instrument(skip(self))]
    pub async fn archive_expired_windows(&self, now: DateTime<Utc>) -> Result<usize, AvailabilityError> {
        let today = civil_date_of(now);
        let mut tx = self.store.begin(LockScope::new().with_key(ARCHIVE_SWEEP_KEY)).await?;
        let archived = tx.archive_windows_before(today, now).await?;
        tx.commit().await?;

        info!("Archived {} availability windows dated before {}", archived, today);
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_database::MemoryStore;
    use shared_utils::test_utils::{SchedulingFixtures, TestConfig};

    #[tokio::test]
    async fn slot_walk_excludes_blocking_statuses_only() {
        let store = MemoryStore::new();
        let (doctor, clinic, patient) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store.seed_window(SchedulingFixtures::window(doctor, clinic, "2025-03-03", "09:00", "10:00")).await;
        store
            .seed_appointment(SchedulingFixtures::appointment(
                patient, doctor, clinic, "2025-03-03", "09:00", "09:15", AppointmentStatus::Moved,
            ))
            .await;
        store
            .seed_appointment(SchedulingFixtures::appointment(
                patient, doctor, clinic, "2025-03-03", "09:15", "09:30", AppointmentStatus::Cancelled,
            ))
            .await;

        let state = TestConfig::default().to_state(store, SchedulingFixtures::clock_at("2025-03-01", "08:00"));
        let service = AvailabilityService::new(&state);

        let slots = service.available_slots(doctor, clinic, "2025-03-03").await.unwrap();
        let starts: Vec<&str> = slots.iter().map(|s| s.start.as_str()).collect();
        assert_eq!(starts, ["09:15", "09:30", "09:45"]);
    }

    #[test]
    fn malformed_date_never_reaches_the_store() {
        let state = TestConfig::default().to_state(MemoryStore::new(), SchedulingFixtures::clock_at("2025-03-01", "08:00"));
        let service = AvailabilityService::new(&state);

        let result = tokio_test::block_on(service.available_slots(Uuid::new_v4(), Uuid::new_v4(), "03/03/2025"));
        assert!(matches!(result, Err(AvailabilityError::InvalidInput(_))));
    }
}
