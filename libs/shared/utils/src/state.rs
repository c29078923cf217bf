use std::sync::Arc;

use shared_config::AppConfig;
use shared_database::SchedulingStore;

use crate::civil_time::{Clock, SystemClock};

/// Everything a scheduling handler needs, shared across the router.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SchedulingStore>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn SchedulingStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(config: AppConfig, store: Arc<dyn SchedulingStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            clock,
        }
    }
}
