pub mod booking;
pub mod lifecycle;
mod unit_of_work;

pub use booking::BookingService;
pub use lifecycle::AppointmentLifecycleService;
