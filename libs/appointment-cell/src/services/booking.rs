// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::SchedulingRules;
use shared_database::{LockScope, SchedulingStore, SchedulingTx};
use shared_models::scheduling::{Appointment, AppointmentStatus};
use shared_utils::civil_time::{civil_days_between, civil_instant, parse_civil_date, parse_time_of_day};
use shared_utils::interval::TimeInterval;
use shared_utils::AppState;

use crate::models::{ActingParty, AppointmentError, CreateAppointmentRequest, ScheduleChangeRequest};
use crate::services::lifecycle::validate_status_transition;
use crate::services::unit_of_work::{begin_for_appointment, retry_on_conflict, AttemptError};

/// A requested civil date and interval, already normalised to instants.
#[derive(Debug, Clone, Copy)]
struct ProposedTime {
    date: NaiveDate,
    interval: TimeInterval,
}

impl ProposedTime {
    fn parse(date: &str, start: &str, end: &str) -> Result<Self, AppointmentError> {
        let date = parse_civil_date(date)?;
        let interval = TimeInterval::new(
            civil_instant(date, parse_time_of_day(start)?),
            civil_instant(date, parse_time_of_day(end)?),
        );
        if !interval.is_valid() {
            return Err(AppointmentError::InvalidTimeRange);
        }
        Ok(Self { date, interval })
    }
}

#[derive(Debug, Clone)]
struct NewBooking {
    patient_id: Uuid,
    doctor_id: Uuid,
    clinic_id: Uuid,
    service_type: String,
    time: ProposedTime,
}

pub struct BookingService {
    store: Arc<dyn SchedulingStore>,
    rules: SchedulingRules,
}

impl BookingService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: Arc::clone(&state.store),
            rules: state.config.scheduling.clone(),
        }
    }

    /// Books a new Pending appointment if the interval sits inside one of the
    /// doctor's active windows and clashes with none of the doctor's active
    /// appointments that day.
    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id, date = %request.date))]
    pub async fn create_appointment(
        &self,
        request: &CreateAppointmentRequest,
        actor: ActingParty,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        let patient_id = match (actor, request.patient_id) {
            (ActingParty::Patient(id), None) => id,
            (ActingParty::Patient(id), Some(requested)) if requested == id => id,
            (ActingParty::Scholar(_), Some(patient_id)) => patient_id,
            (ActingParty::Scholar(_), None) => {
                return Err(AppointmentError::InvalidInput("patient_id is required".to_string()))
            }
            _ => {
                return Err(AppointmentError::Unauthorized(
                    "only the patient or a scholar can book this appointment".to_string(),
                ))
            }
        };

        let booking = NewBooking {
            patient_id,
            doctor_id: request.doctor_id,
            clinic_id: request.clinic_id,
            service_type: request.service_type.clone(),
            time: ProposedTime::parse(&request.date, &request.start_time, &request.end_time)?,
        };
        let booking = &booking;

        let appointment = retry_on_conflict(move || self.try_create(booking, actor, now)).await?;

        info!(
            "Booked appointment {} for patient {} with doctor {}",
            appointment.id, appointment.patient_id, appointment.doctor_id
        );
        Ok(appointment)
    }

    async fn try_create(
        &self,
        booking: &NewBooking,
        actor: ActingParty,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AttemptError> {
        let date = booking.time.date;
        let scope = LockScope::doctor_day(booking.doctor_id, date).with_patient_day(booking.patient_id, date);
        let mut tx = self.store.begin(scope).await?;

        ensure_within_availability(tx.as_mut(), booking.doctor_id, booking.clinic_id, booking.time).await?;

        let doctor_busy: Vec<TimeInterval> = tx
            .doctor_appointments(booking.doctor_id, date, &AppointmentStatus::BLOCKING)
            .await?
            .iter()
            .map(TimeInterval::from)
            .collect();
        if booking.time.interval.overlaps_any(&doctor_busy) {
            debug!("Doctor {} already booked on {} for the requested interval", booking.doctor_id, date);
            return Err(AppointmentError::SlotAlreadyBooked.into());
        }

        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: booking.patient_id,
            doctor_id: booking.doctor_id,
            clinic_id: booking.clinic_id,
            created_by: actor.id(),
            date,
            start_time: booking.time.interval.start,
            end_time: booking.time.interval.end,
            service_type: booking.service_type.clone(),
            status: AppointmentStatus::Pending,
            remarks: None,
            created_at: now,
            updated_at: now,
        };

        tx.insert_appointment(&appointment).await?;
        tx.commit().await?;
        Ok(appointment)
    }

    /// Doctor move or patient reschedule, depending on who asks.
    ///
    /// Both land the appointment in `Moved` with the new date and times.
    /// A doctor must give a reason; a patient needs the configured notice
    /// and must not clash with their own other appointments.
    #[instrument(skip(self, request), fields(date = %request.date))]
    pub async fn move_or_reschedule(
        &self,
        appointment_id: Uuid,
        actor: ActingParty,
        request: &ScheduleChangeRequest,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AppointmentError> {
        if matches!(actor, ActingParty::Scholar(_)) {
            return Err(AppointmentError::Unauthorized(
                "only the patient or the doctor can change this appointment".to_string(),
            ));
        }

        let time = ProposedTime::parse(&request.date, &request.start_time, &request.end_time)?;
        let reason = request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        let reason = &reason;

        let appointment = retry_on_conflict(move || {
            self.try_move(appointment_id, actor, time, reason.clone(), now)
        })
        .await?;

        info!("Appointment {} moved to {} by {:?}", appointment.id, appointment.date, actor);
        Ok(appointment)
    }

    async fn try_move(
        &self,
        appointment_id: Uuid,
        actor: ActingParty,
        time: ProposedTime,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Appointment, AttemptError> {
        // Lock the target day for both parties as well as the current one.
        let (mut tx, mut appointment) =
            begin_for_appointment(self.store.as_ref(), appointment_id, |scope, snapshot| {
                scope
                    .with_doctor_day(snapshot.doctor_id, time.date)
                    .with_patient_day(snapshot.patient_id, time.date)
            })
            .await?;

        if !actor.owns(&appointment) {
            return Err(AppointmentError::Unauthorized("Not authorized to change this appointment".to_string()).into());
        }
        validate_status_transition(appointment.status, AppointmentStatus::Moved)?;
        if time.interval.start <= now {
            return Err(AppointmentError::InThePast.into());
        }

        let is_patient = matches!(actor, ActingParty::Patient(_));
        if is_patient {
            let notice = self.rules.reschedule_notice_days;
            if civil_days_between(now, time.interval.start) < notice {
                return Err(AppointmentError::InsufficientNotice { days: notice }.into());
            }
        } else if reason.is_none() {
            return Err(AppointmentError::ReasonRequired.into());
        }

        ensure_within_availability(tx.as_mut(), appointment.doctor_id, appointment.clinic_id, time).await?;

        let doctor_busy: Vec<TimeInterval> = tx
            .doctor_appointments(appointment.doctor_id, time.date, &AppointmentStatus::BLOCKING)
            .await?
            .iter()
            .filter(|other| other.id != appointment.id)
            .map(TimeInterval::from)
            .collect();
        if time.interval.overlaps_any(&doctor_busy) {
            return Err(AppointmentError::SlotAlreadyBooked.into());
        }

        if is_patient {
            let own_busy: Vec<TimeInterval> = tx
                .patient_appointments(appointment.patient_id, time.date, &AppointmentStatus::BLOCKING)
                .await?
                .iter()
                .filter(|other| other.id != appointment.id)
                .map(TimeInterval::from)
                .collect();
            if time.interval.overlaps_any(&own_busy) {
                warn!("Patient {} already has an appointment overlapping the new time", appointment.patient_id);
                return Err(AppointmentError::PatientConflict.into());
            }
        }

        appointment.date = time.date;
        appointment.start_time = time.interval.start;
        appointment.end_time = time.interval.end;
        appointment.status = AppointmentStatus::Moved;
        // A patient reschedule without a reason keeps the doctor's last remark.
        if reason.is_some() {
            appointment.remarks = reason;
        }
        appointment.updated_at = now;

        tx.update_appointment(&appointment).await?;
        tx.commit().await?;
        Ok(appointment)
    }
}

/// The whole interval must sit inside a single active window.
async fn ensure_within_availability(
    tx: &mut dyn SchedulingTx,
    doctor_id: Uuid,
    clinic_id: Uuid,
    time: ProposedTime,
) -> Result<(), AttemptError> {
    let windows = tx.active_windows(doctor_id, clinic_id, time.date).await?;
    let contained = windows
        .iter()
        .any(|window| TimeInterval::from(window).contains(&time.interval));
    if !contained {
        return Err(AppointmentError::OutsideAvailability.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposed_time_rejects_empty_and_inverted_ranges() {
        assert!(matches!(
            ProposedTime::parse("2025-03-03", "10:00", "10:00"),
            Err(AppointmentError::InvalidTimeRange)
        ));
        assert!(matches!(
            ProposedTime::parse("2025-03-03", "10:30", "10:00"),
            Err(AppointmentError::InvalidTimeRange)
        ));
    }

    #[test]
    fn proposed_time_rejects_malformed_strings() {
        assert!(matches!(
            ProposedTime::parse("2025-03-03", "9:00", "10:00"),
            Err(AppointmentError::InvalidInput(_))
        ));
        assert!(matches!(
            ProposedTime::parse("03-03-2025", "09:00", "10:00"),
            Err(AppointmentError::InvalidInput(_))
        ));
    }

    #[test]
    fn proposed_time_is_pinned_to_civil_zone() {
        let time = ProposedTime::parse("2025-03-03", "09:00", "09:30").unwrap();
        assert_eq!(time.interval.start.to_rfc3339(), "2025-03-03T01:00:00+00:00");
    }
}
