//! Engine metrics collector.
//!
//! Tracks how often each lifecycle/update callback ran, how often it failed
//! and how long it took, plus a counter per lifecycle transition. Uses
//! interior mutability via `Mutex` so all recording methods take `&self`;
//! the manager shares one collector with every component through an `Arc`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Per-callback execution statistics.
#[derive(Debug, Clone, Default)]
pub struct CallbackMetrics {
    /// Total number of invocations that reached a bound method.
    pub call_count: u64,
    /// Number of invocations that returned an error or panicked.
    pub error_count: u64,
    /// Cumulative duration of all invocations.
    pub total_duration: Duration,
    /// Longest invocation observed.
    pub max_duration: Option<Duration>,
}

impl CallbackMetrics {
    /// Returns the average invocation duration, or `None` if nothing ran yet.
    pub fn average_duration(&self) -> Option<Duration> {
        if self.call_count == 0 {
            return None;
        }
        let nanos = self.total_duration.as_nanos() / u128::from(self.call_count);
        Some(Duration::new(
            (nanos / 1_000_000_000) as u64,
            (nanos % 1_000_000_000) as u32,
        ))
    }

    /// Returns the success rate as a value between 0.0 and 1.0.
    ///
    /// If no invocations have been recorded, returns 1.0 (100%).
    pub fn success_rate(&self) -> f64 {
        if self.call_count == 0 {
            return 1.0;
        }
        (self.call_count - self.error_count) as f64 / self.call_count as f64
    }
}

#[derive(Debug, Default)]
struct Inner {
    callbacks: HashMap<String, CallbackMetrics>,
    transitions: HashMap<String, u64>,
    notifications: u64,
}

/// Process-level engine metrics.
#[derive(Debug)]
pub struct EngineMetrics {
    inner: Mutex<Inner>,
    started: Instant,
}

impl EngineMetrics {
    /// Creates a new collector. The uptime clock starts immediately.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a single callback invocation.
    pub fn record_callback(&self, method: &str, duration: Duration, success: bool) {
        let mut inner = self.lock();
        let metrics = inner.callbacks.entry(method.to_string()).or_default();

        metrics.call_count += 1;
        if !success {
            metrics.error_count += 1;
        }
        metrics.total_duration += duration;
        metrics.max_duration = Some(match metrics.max_duration {
            Some(current) => current.max(duration),
            None => duration,
        });
    }

    /// Counts one lifecycle transition, keyed as `"from->to"`.
    pub fn record_transition(&self, from: &str, to: &str) {
        let mut inner = self.lock();
        *inner
            .transitions
            .entry(format!("{}->{}", from, to))
            .or_insert(0) += 1;
    }

    /// Counts one dependency notification processed by a component.
    pub fn record_notification(&self) {
        self.lock().notifications += 1;
    }

    /// Returns a clone of the metrics for one callback name.
    pub fn callback_metrics(&self, method: &str) -> Option<CallbackMetrics> {
        self.lock().callbacks.get(method).cloned()
    }

    /// Returns how many times the `from -> to` transition happened.
    pub fn transition_count(&self, from: &str, to: &str) -> u64 {
        self.lock()
            .transitions
            .get(&format!("{}->{}", from, to))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the number of dependency notifications processed.
    pub fn notification_count(&self) -> u64 {
        self.lock().notifications
    }

    /// Returns the total number of failed callback invocations.
    pub fn total_errors(&self) -> u64 {
        self.lock().callbacks.values().map(|m| m.error_count).sum()
    }

    /// Returns the elapsed time since the collector was created.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Produces a human-readable summary.
    ///
    /// ```text
    /// Uptime: 3s | Callbacks: 12 calls (1 errors) | Notifications: 40
    ///   start: 4 calls, avg 120us, 75% success
    ///   init: 4 calls, avg 80us, 100% success
    /// ```
    pub fn summary(&self) -> String {
        let inner = self.lock();
        let total_calls: u64 = inner.callbacks.values().map(|m| m.call_count).sum();
        let total_errors: u64 = inner.callbacks.values().map(|m| m.error_count).sum();

        let mut summary = format!(
            "Uptime: {}s | Callbacks: {} calls ({} errors) | Notifications: {}",
            self.uptime().as_secs(),
            total_calls,
            total_errors,
            inner.notifications,
        );

        let mut entries: Vec<_> = inner.callbacks.iter().collect();
        entries.sort_by(|a, b| b.1.call_count.cmp(&a.1.call_count).then(a.0.cmp(b.0)));

        for (name, metrics) in entries {
            let avg = match metrics.average_duration() {
                Some(d) => format_duration(d),
                None => "N/A".to_string(),
            };
            let success_pct = (metrics.success_rate() * 100.0).round() as u64;
            summary.push_str(&format!(
                "\n  {}: {} calls, avg {}, {}% success",
                name, metrics.call_count, avg, success_pct,
            ));
        }

        summary
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a duration in a human-friendly way.
fn format_duration(d: Duration) -> String {
    let micros = d.as_micros();
    if micros < 1_000 {
        format!("{}us", micros)
    } else if micros < 1_000_000 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = EngineMetrics::new();
        assert!(metrics.callback_metrics("init").is_none());
        assert_eq!(metrics.notification_count(), 0);
        assert_eq!(metrics.total_errors(), 0);
    }

    #[test]
    fn test_record_callback() {
        let metrics = EngineMetrics::new();
        metrics.record_callback("start", Duration::from_millis(10), true);
        metrics.record_callback("start", Duration::from_millis(30), false);

        let m = metrics.callback_metrics("start").unwrap();
        assert_eq!(m.call_count, 2);
        assert_eq!(m.error_count, 1);
        assert_eq!(m.average_duration(), Some(Duration::from_millis(20)));
        assert_eq!(m.max_duration, Some(Duration::from_millis(30)));
        assert!((m.success_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.total_errors(), 1);
    }

    #[test]
    fn test_transition_counts() {
        let metrics = EngineMetrics::new();
        metrics.record_transition("instantiated", "active");
        metrics.record_transition("instantiated", "active");
        metrics.record_transition("active", "instantiated");

        assert_eq!(metrics.transition_count("instantiated", "active"), 2);
        assert_eq!(metrics.transition_count("active", "instantiated"), 1);
        assert_eq!(metrics.transition_count("inactive", "active"), 0);
    }

    #[test]
    fn test_success_rate_zero_calls() {
        let m = CallbackMetrics::default();
        assert!((m.success_rate() - 1.0).abs() < f64::EPSILON);
        assert!(m.average_duration().is_none());
    }

    #[test]
    fn test_average_duration_past_u32_calls() {
        let m = CallbackMetrics {
            call_count: 1 << 32,
            total_duration: Duration::from_secs(1 << 33),
            ..Default::default()
        };
        assert_eq!(m.average_duration(), Some(Duration::from_secs(2)));

        let m = CallbackMetrics {
            call_count: 4,
            total_duration: Duration::from_millis(10),
            ..Default::default()
        };
        assert_eq!(m.average_duration(), Some(Duration::from_micros(2500)));
    }

    #[test]
    fn test_summary_format() {
        let metrics = EngineMetrics::new();
        metrics.record_callback("init", Duration::from_micros(200), true);
        metrics.record_callback("start", Duration::from_millis(2), false);
        metrics.record_notification();

        let summary = metrics.summary();
        assert!(summary.contains("Callbacks: 2 calls (1 errors)"));
        assert!(summary.contains("Notifications: 1"));
        assert!(summary.contains("init: 1 calls, avg 200us, 100% success"));
        assert!(summary.contains("start: 1 calls, avg 2ms, 0% success"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(500)), "500us");
        assert_eq!(format_duration(Duration::from_millis(200)), "200ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
    }
}
