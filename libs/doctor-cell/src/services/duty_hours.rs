use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use shared_database::{LockScope, SchedulingStore};
use shared_models::scheduling::AvailabilityWindow;
use shared_utils::civil_time::{
    civil_date_of, civil_instant, days_until_monday, parse_time_of_day, weekday_of,
};
use shared_utils::AppState;

use crate::models::{AvailabilityError, DutyHourRequest};

/// Longest duty week (general practice, Monday to Saturday).
const MAX_DUTY_DAYS: i64 = 6;

pub struct DutyHourService {
    store: Arc<dyn SchedulingStore>,
}

/// First Monday on or after `now`'s civil date.
pub fn upcoming_monday(now: DateTime<Utc>) -> NaiveDate {
    let offset = days_until_monday(weekday_of(now));
    civil_date_of(now) + Duration::days(offset as i64)
}

impl DutyHourService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: Arc::clone(&state.store),
        }
    }

    /// Replaces the doctor's windows for the upcoming duty week at one clinic
    /// with one window per duty day spanning the given daily hours.
    #[instrument(skip(self, request), fields(clinic_id = %request.clinic_id))]
    pub async fn generate_duty_hours(
        &self,
        doctor_id: Uuid,
        request: &DutyHourRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<AvailabilityWindow>, AvailabilityError> {
        let daily_start = parse_time_of_day(&request.start_time)?;
        let daily_end = parse_time_of_day(&request.end_time)?;
        let monday = upcoming_monday(now);

        let scope = LockScope::doctor_days(
            doctor_id,
            (0..MAX_DUTY_DAYS).map(|offset| monday + Duration::days(offset)),
        );
        let mut tx = self.store.begin(scope).await?;

        let assignment = tx
            .clinic_assignment(doctor_id, request.clinic_id)
            .await?
            .ok_or(AvailabilityError::AssignmentNotFound)?;

        if civil_instant(monday, daily_end) <= civil_instant(monday, daily_start) {
            return Err(AvailabilityError::InvalidTimeRange);
        }

        let span = assignment.specialization.duty_days() as i64;
        let last_day = monday + Duration::days(span - 1);

        let windows: Vec<AvailabilityWindow> = (0..span)
            .map(|offset| {
                let date = monday + Duration::days(offset);
                AvailabilityWindow {
                    id: Uuid::new_v4(),
                    doctor_id,
                    clinic_id: request.clinic_id,
                    date,
                    start_time: civil_instant(date, daily_start),
                    end_time: civil_instant(date, daily_end),
                    archived_at: None,
                    created_at: now,
                }
            })
            .collect();

        tx.replace_windows(doctor_id, request.clinic_id, monday, last_day, &windows).await?;
        tx.commit().await?;

        info!(
            "Generated {} duty-hour windows for doctor {} ({} to {})",
            windows.len(), doctor_id, monday, last_day
        );
        Ok(windows)
    }
}
