use std::future::Future;

use tracing::warn;
use uuid::Uuid;

use shared_database::{LockScope, SchedulingStore, SchedulingTx, StoreError};
use shared_models::scheduling::Appointment;

use crate::models::AppointmentError;

/// Why one attempt at a unit of work stopped.
#[derive(Debug)]
pub(crate) enum AttemptError {
    Rejected(AppointmentError),
    Store(StoreError),
}

impl From<AppointmentError> for AttemptError {
    fn from(err: AppointmentError) -> Self {
        AttemptError::Rejected(err)
    }
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        AttemptError::Store(err)
    }
}

impl From<AttemptError> for AppointmentError {
    fn from(err: AttemptError) -> Self {
        match err {
            AttemptError::Rejected(e) => e,
            AttemptError::Store(e) => e.into(),
        }
    }
}

/// Runs `attempt`, and once more if the store reports a write conflict.
/// A second conflict surfaces as "slot already booked".
pub(crate) async fn retry_on_conflict<T, F, Fut>(mut attempt: F) -> Result<T, AppointmentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut retried = false;
    loop {
        match attempt().await {
            Err(AttemptError::Store(StoreError::Conflict(detail))) if !retried => {
                warn!("Store conflict, retrying unit of work once: {}", detail);
                retried = true;
            }
            outcome => return outcome.map_err(AppointmentError::from),
        }
    }
}

/// Opens a unit of work locked on the appointment's doctor-day and
/// patient-day (plus whatever `widen` adds from the pre-read row) and
/// returns the appointment as read inside it.
///
/// The keys come from an unlocked pre-read; if the appointment's day or
/// doctor changed before the lock was taken the attempt reports a conflict
/// so the caller retries with fresh keys.
pub(crate) async fn begin_for_appointment<W>(
    store: &dyn SchedulingStore,
    appointment_id: Uuid,
    widen: W,
) -> Result<(Box<dyn SchedulingTx>, Appointment), AttemptError>
where
    W: FnOnce(LockScope, &Appointment) -> LockScope,
{
    let snapshot = {
        let mut peek = store.begin(LockScope::new()).await?;
        peek.appointment(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?
    };

    let scope = widen(
        LockScope::doctor_day(snapshot.doctor_id, snapshot.date)
            .with_patient_day(snapshot.patient_id, snapshot.date),
        &snapshot,
    );
    let mut tx = store.begin(scope).await?;

    let current = tx
        .appointment(appointment_id)
        .await?
        .ok_or(AppointmentError::NotFound)?;

    if current.date != snapshot.date || current.doctor_id != snapshot.doctor_id {
        return Err(AttemptError::Store(StoreError::Conflict(format!(
            "appointment {} changed before its lock was taken",
            appointment_id
        ))));
    }

    Ok((tx, current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn single_conflict_is_retried() {
        let calls = &AtomicU32::new(0);
        let result = retry_on_conflict(move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AttemptError::Store(StoreError::Conflict("first".to_string())))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_conflict_becomes_slot_already_booked() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AttemptError::Store(StoreError::Conflict("again".to_string())))
        })
        .await;

        assert!(matches!(result, Err(AppointmentError::SlotAlreadyBooked)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AttemptError::Rejected(AppointmentError::OutsideAvailability))
        })
        .await;

        assert!(matches!(result, Err(AppointmentError::OutsideAvailability)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
