pub mod availability;
pub mod duty_hours;
pub mod slots;

pub use availability::AvailabilityService;
pub use duty_hours::DutyHourService;
