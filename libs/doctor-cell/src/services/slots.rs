use chrono::Duration;

use shared_models::scheduling::AvailabilityWindow;
use shared_utils::civil_time::format_time_of_day;
use shared_utils::interval::TimeInterval;

use crate::models::SlotView;

/// Walks each window in `step_minutes` increments and keeps the candidates
/// that fit inside the window and touch no blocking interval.
///
/// Windows are processed in the order given (callers pass them sorted by
/// start); slots are never merged across windows.
pub fn generate_slots(
    windows: &[AvailabilityWindow],
    blocking: &[TimeInterval],
    step_minutes: i64,
) -> Vec<TimeInterval> {
    if step_minutes <= 0 {
        return Vec::new();
    }
    let step = Duration::minutes(step_minutes);
    let mut slots = Vec::new();

    for window in windows.iter().filter(|w| w.is_active()) {
        let mut cursor = window.start_time;
        while cursor + step <= window.end_time {
            let candidate = TimeInterval::new(cursor, cursor + step);
            if !candidate.overlaps_any(blocking) {
                slots.push(candidate);
            }
            cursor += step;
        }
    }

    slots
}

pub fn to_slot_views(slots: &[TimeInterval]) -> Vec<SlotView> {
    slots
        .iter()
        .map(|slot| SlotView {
            start: format_time_of_day(slot.start),
            end: format_time_of_day(slot.end),
        })
        .collect()
}
