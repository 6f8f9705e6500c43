/// Utility functions and helpers for the bridge loop
///
/// Round-trip latency bookkeeping, the bounded cooperative delay the loop
/// sleeps between polls, and human-readable formatting for the statistics
/// summary.

use std::time::Duration;
use tracing::trace;

/// Round-trip latency between a forwarded request and its relayed reply
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencyMetrics {
    pub samples: u64,
    pub total: Duration,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    pub avg: Duration,
}

impl LatencyMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request/reply round trip
    pub fn record(&mut self, latency: Duration) {
        self.samples += 1;
        self.total += latency;

        self.min = Some(self.min.map_or(latency, |min| min.min(latency)));
        self.max = Some(self.max.map_or(latency, |max| max.max(latency)));

        self.avg = self.total / self.samples as u32;
    }

    /// Most recent average, `None` before the first reply
    pub fn average(&self) -> Option<Duration> {
        (self.samples > 0).then_some(self.avg)
    }

    /// Reset all metrics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Wait roughly `delay`, yielding to the runtime
///
/// Tokio timers have millisecond resolution, so anything shorter only
/// yields. A sleep may end up to one timer tick late; frame boundaries are
/// decided from byte timestamps, so a late wake-up delays forwarding but
/// never merges or splits frames.
pub async fn cooperative_delay(delay: Duration) {
    if delay >= Duration::from_millis(1) {
        tokio::time::sleep(delay).await;
    } else {
        trace!("Delay {:?} below timer resolution, yielding", delay);
        tokio::task::yield_now().await;
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }

    /// Format latency metrics as a table
    pub fn format_latency(metrics: &LatencyMetrics) -> String {
        format!(
            "Reply Latency:\n\
             ├─ Replies: {}\n\
             ├─ Average: {}\n\
             ├─ Min: {}\n\
             └─ Max: {}",
            metrics.samples,
            metrics.average().map_or("N/A".to_string(), format_duration),
            metrics.min.map_or("N/A".to_string(), format_duration),
            metrics.max.map_or("N/A".to_string(), format_duration),
        )
    }
}
