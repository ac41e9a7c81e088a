use crate::prelude::DataQualityEvent;
use serde::Serialize;
use std::sync::Mutex;

pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub processed: usize,
    pub events: usize,
    pub clamped: usize,
    pub errors: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    pub fn record_processed(&self, count: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.processed += count;
        }
    }

    pub fn record_event(&self, event: &DataQualityEvent) {
        if let Ok(mut metrics) = self.inner.lock() {
            if event.is_notice() {
                metrics.clamped += 1;
            } else {
                metrics.events += 1;
            }
        }
    }

    pub fn record_error(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.errors += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn clamps_and_warnings_are_counted_separately() {
        let recorder = MetricsRecorder::new();
        recorder.record_processed(5);
        recorder.record_event(&DataQualityEvent::NoForagingObservations);
        recorder.record_event(&DataQualityEvent::ClampedValue {
            subject_id: "s".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            field: "speed_km_day".into(),
            original: 3000.0,
            clamped: 1776.0,
        });
        recorder.record_error();

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.processed, 5);
        assert_eq!(snapshot.events, 1);
        assert_eq!(snapshot.clamped, 1);
        assert_eq!(snapshot.errors, 1);
    }
}
