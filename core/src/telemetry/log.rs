use crate::prelude::DataQualityEvent;
use log::{debug, info, warn};

pub struct LogManager;

impl LogManager {
    pub fn new() -> Self {
        Self
    }

    pub fn record(&self, message: &str) {
        info!("{}", message);
    }

    /// Clamp notices go to debug so a long batch does not drown the warnings.
    pub fn event(&self, event: &DataQualityEvent) {
        if event.is_notice() {
            debug!("{}", event);
        } else {
            warn!("{}", event);
        }
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
