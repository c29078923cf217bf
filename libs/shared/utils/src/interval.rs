// libs/shared/utils/src/interval.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shared_models::scheduling::{Appointment, AvailabilityWindow};

/// Half-open overlap: `[a_start, a_end)` and `[b_start, b_end)` share an instant.
///
/// Back-to-back intervals (one ends exactly when the other starts) do not overlap.
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// True when `[inner_start, inner_end)` lies entirely inside `[outer_start, outer_end)`.
pub fn contains(
    outer_start: DateTime<Utc>,
    outer_end: DateTime<Utc>,
    inner_start: DateTime<Utc>,
    inner_end: DateTime<Utc>,
) -> bool {
    outer_start <= inner_start && inner_end <= outer_end
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn contains(&self, other: &TimeInterval) -> bool {
        contains(self.start, self.end, other.start, other.end)
    }

    pub fn overlaps_any<'a, I>(&self, others: I) -> bool
    where
        I: IntoIterator<Item = &'a TimeInterval>,
    {
        others.into_iter().any(|other| self.overlaps(other))
    }
}

impl From<&Appointment> for TimeInterval {
    fn from(appointment: &Appointment) -> Self {
        Self::new(appointment.start_time, appointment.end_time)
    }
}

impl From<&AvailabilityWindow> for TimeInterval {
    fn from(window: &AvailabilityWindow) -> Self {
        Self::new(window.start_time, window.end_time)
    }
}
