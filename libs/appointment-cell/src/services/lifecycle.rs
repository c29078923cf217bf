// libs/appointment-cell/src/services/lifecycle.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_database::{LockScope, SchedulingStore};
use shared_models::scheduling::{Appointment, AppointmentStatus};
use shared_utils::AppState;

use crate::models::{ActingParty, AppointmentError};
use crate::services::unit_of_work::{begin_for_appointment, retry_on_conflict, AttemptError};

pub struct AppointmentLifecycleService {
    store: Arc<dyn SchedulingStore>,
}

/// All valid next statuses for a given current status.
pub fn valid_transitions(current: AppointmentStatus) -> &'static [AppointmentStatus] {
    match current {
        AppointmentStatus::Pending => &[
            AppointmentStatus::Approved,
            AppointmentStatus::Moved,
            AppointmentStatus::Cancelled,
        ],
        AppointmentStatus::Approved => &[
            AppointmentStatus::Completed,
            AppointmentStatus::Moved,
            AppointmentStatus::Cancelled,
        ],
        AppointmentStatus::Moved => &[
            AppointmentStatus::Approved,
            AppointmentStatus::Moved,
            AppointmentStatus::Cancelled,
        ],
        // Terminal states - no transitions allowed
        AppointmentStatus::Completed | AppointmentStatus::Cancelled => &[],
    }
}

pub fn validate_status_transition(
    current: AppointmentStatus,
    next: AppointmentStatus,
) -> Result<(), AppointmentError> {
    if current.is_terminal() {
        return Err(AppointmentError::NotModifiable(current));
    }
    if !valid_transitions(current).contains(&next) {
        warn!("Invalid status transition attempted: {} -> {}", current, next);
        return Err(AppointmentError::InvalidStatusTransition { from: current, to: next });
    }
    debug!("Status transition validated: {} -> {}", current, next);
    Ok(())
}

impl AppointmentLifecycleService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: Arc::clone(&state.store),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let mut tx = self.store.begin(LockScope::new()).await?;
        tx.appointment(appointment_id).await?.ok_or(AppointmentError::NotFound)
    }

    /// Owning patient or owning doctor, from any non-terminal status.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        appointment_id: Uuid,
        actor: ActingParty,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        if matches!(actor, ActingParty::Scholar(_)) {
            return Err(AppointmentError::Unauthorized(
                "only the patient or the doctor can cancel this appointment".to_string(),
            ));
        }
        retry_on_conflict(move || self.transition(appointment_id, actor, AppointmentStatus::Cancelled, now)).await
    }

    /// Owning doctor, from Pending or Moved.
    #[instrument(skip(self))]
    pub async fn approve(
        &self,
        appointment_id: Uuid,
        actor: ActingParty,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        require_doctor(actor)?;
        retry_on_conflict(move || self.transition(appointment_id, actor, AppointmentStatus::Approved, now)).await
    }

    /// Owning doctor, from Approved, once a consultation record exists.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        appointment_id: Uuid,
        actor: ActingParty,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        require_doctor(actor)?;
        retry_on_conflict(move || self.transition(appointment_id, actor, AppointmentStatus::Completed, now)).await
    }

    async fn transition(
        &self,
        appointment_id: Uuid,
        actor: ActingParty,
        next: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AttemptError> {
        let (mut tx, mut appointment) =
            begin_for_appointment(self.store.as_ref(), appointment_id, |scope, _| scope).await?;

        if !actor.owns(&appointment) {
            return Err(AppointmentError::Unauthorized("Not authorized to change this appointment".to_string()).into());
        }
        validate_status_transition(appointment.status, next)?;

        if next == AppointmentStatus::Completed && !tx.has_consultation_record(appointment_id).await? {
            return Err(AppointmentError::ConsultationRecordRequired.into());
        }

        let previous = appointment.status;
        appointment.status = next;
        appointment.updated_at = now;

        tx.update_appointment(&appointment).await?;
        tx.commit().await?;

        info!("Appointment {} status {} -> {}", appointment_id, previous, next);
        Ok(appointment)
    }
}

fn require_doctor(actor: ActingParty) -> Result<(), AppointmentError> {
    match actor {
        ActingParty::Doctor(_) => Ok(()),
        _ => Err(AppointmentError::Unauthorized(
            "only the appointment's doctor can do this".to_string(),
        )),
    }
}
