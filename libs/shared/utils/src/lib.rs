pub mod civil_time;
pub mod extractor;
pub mod interval;
pub mod jwt;
pub mod state;
pub mod test_utils;

pub use state::AppState;
