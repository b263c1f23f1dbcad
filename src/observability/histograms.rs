//! Latency histogram metrics for ModelForge.
//!
//! Exposed through the Prometheus exporter so p50/p95/p99 can be derived
//! for inference and job execution.

use metrics::histogram;
use std::time::{Duration, Instant};

/// Histogram buckets for latency measurements (in seconds).
pub const LATENCY_BUCKETS: [f64; 14] = [
    0.0001, // 100µs
    0.0005, // 500µs
    0.001,  // 1ms
    0.005,  // 5ms
    0.01,   // 10ms
    0.025,  // 25ms
    0.05,   // 50ms
    0.1,    // 100ms
    0.25,   // 250ms
    0.5,    // 500ms
    1.0,    // 1s
    2.5,    // 2.5s
    5.0,    // 5s
    10.0,   // 10s
];

/// Record one model execution.
pub fn record_inference_latency(duration: Duration) {
    histogram!("modelforge_inference_duration_seconds").record(duration.as_secs_f64());
}

/// Record the time a job spent waiting before a worker picked it up.
pub fn record_job_queue_time(duration: Duration) {
    histogram!("modelforge_job_queue_seconds").record(duration.as_secs_f64());
}

/// Record the end-to-end execution time of a job attempt.
pub fn record_job_execution_latency(outcome: &str, duration: Duration) {
    histogram!(
        "modelforge_job_execution_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration.as_secs_f64());
}

/// A latency timer that records into a histogram when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
    label: Option<(&'static str, String)>,
}

impl LatencyTimer {
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
            label: None,
        }
    }

    pub fn with_label(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.label = Some((key, value.into()));
        self
    }

    /// Get elapsed time without recording.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let seconds = self.start.elapsed().as_secs_f64();
        match self.label.take() {
            Some((key, value)) => histogram!(self.metric_name, key => value).record(seconds),
            None => histogram!(self.metric_name).record(seconds),
        }
    }
}

/// Timer for one synchronous predict call.
pub fn predict_timer() -> LatencyTimer {
    LatencyTimer::new("modelforge_predict_duration_seconds")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_are_sorted() {
        assert!(LATENCY_BUCKETS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_timer_records_without_recorder() {
        let timer = LatencyTimer::new("test_metric").with_label("k", "v");
        assert!(timer.elapsed() < Duration::from_secs(1));
        record_inference_latency(Duration::from_millis(3));
        record_job_execution_latency("completed", Duration::from_millis(3));
    }
}
