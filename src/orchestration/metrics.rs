use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StepOutcome {
    Success,
    Failure,
}

impl StepOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Counters and histograms keyed by step name and outcome.
pub trait MetricsSink: Send + Sync {
    fn step_finished(&self, step: &str, outcome: StepOutcome, elapsed: Duration);

    fn confidence_observed(&self, step: &str, confidence: f64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn step_finished(&self, _step: &str, _outcome: StepOutcome, _elapsed: Duration) {}

    fn confidence_observed(&self, _step: &str, _confidence: f64) {}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub executions: BTreeMap<(String, StepOutcome), u64>,
    pub durations_ms: BTreeMap<String, Vec<u64>>,
    pub confidences: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn executions(&self, step: &str, outcome: StepOutcome) -> u64 {
        self.snapshot()
            .executions
            .get(&(step.to_string(), outcome))
            .copied()
            .unwrap_or(0)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn step_finished(&self, step: &str, outcome: StepOutcome, elapsed: Duration) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *inner
            .executions
            .entry((step.to_string(), outcome))
            .or_insert(0) += 1;
        if outcome == StepOutcome::Success {
            inner
                .durations_ms
                .entry(step.to_string())
                .or_default()
                .push(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        }
    }

    fn confidence_observed(&self, step: &str, confidence: f64) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .confidences
            .entry(step.to_string())
            .or_default()
            .push(confidence);
    }
}
