//! Stage timings for the hotkey pipeline, in microseconds.
//! Each stage keeps a bounded window of recent samples; `summary` reports quantiles over it.

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;

const DEFAULT_WINDOW: usize = 1024;

pub mod metric_names {
    pub const QUEUE_WAIT: &str = "queue_wait";
    pub const CAPTURE_DONE: &str = "capture";
    pub const PROVIDER_CALL: &str = "provider_call";
    pub const TRANSLATE_DONE: &str = "translate";
    pub const DELIVER_DONE: &str = "deliver";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingSummary {
    pub count: usize,
    pub p50_us: f64,
    pub p95_us: f64,
    pub max_us: f64,
}

impl TimingSummary {
    fn over(window: &VecDeque<f64>) -> Self {
        let mut sorted: Vec<f64> = window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let at = |q: f64| {
            let idx = (q * (sorted.len() - 1) as f64).round() as usize;
            sorted[idx]
        };
        Self {
            count: sorted.len(),
            p50_us: at(0.50),
            p95_us: at(0.95),
            max_us: at(1.0),
        }
    }
}

pub struct MetricsRegistry {
    windows: Mutex<HashMap<&'static str, VecDeque<f64>>>,
    window: usize,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// Keep at most `window` samples per stage; older ones are dropped first.
    pub fn with_window(window: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window: window.max(1),
        }
    }

    pub fn record(&self, name: &'static str, value_us: f64) {
        let mut windows = self.windows.lock();
        let samples = windows.entry(name).or_default();
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(value_us);
        tracing::trace!(metric = name, value_us, "timing_recorded");
    }

    /// Quantiles per stage that has at least one sample, ordered by stage name.
    pub fn summary(&self) -> BTreeMap<&'static str, TimingSummary> {
        self.windows
            .lock()
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(&name, samples)| (name, TimingSummary::over(samples)))
            .collect()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_drops_oldest_samples() {
        let reg = MetricsRegistry::with_window(4);
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            reg.record(metric_names::CAPTURE_DONE, v);
        }
        let summary = reg.summary();
        let capture = &summary[metric_names::CAPTURE_DONE];
        assert_eq!(capture.count, 4);
        assert_eq!(capture.max_us, 50.0);
        assert_eq!(capture.p50_us, 40.0);
        assert!(!summary.contains_key(metric_names::DELIVER_DONE));
    }

    #[test]
    fn single_sample_is_every_quantile() {
        let reg = MetricsRegistry::new();
        reg.record(metric_names::TRANSLATE_DONE, 7.0);
        let t = &reg.summary()[metric_names::TRANSLATE_DONE];
        assert_eq!((t.p50_us, t.p95_us, t.max_us), (7.0, 7.0, 7.0));
    }
}
