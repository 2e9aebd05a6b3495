//! In-process pipeline counters and validation timings.
//!
//! Counters are keyed by metric name plus a label set; label order does not
//! matter. The CLI logs a [`MetricsCollector::snapshot`] when a command
//! finishes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use ahash::AHashMap;
use serde_json::{json, Map, Value};

pub const STAGE_TRANSITIONS: &str = "pipeline_stage_transitions_total";
pub const OBSERVATION_RUNS: &str = "pipeline_observation_runs_total";
pub const CLASSIFIER_VOTES: &str = "classifier_votes_total";
pub const MODEL_RESOLUTIONS: &str = "model_resolution_total";
pub const AUTO_REVIEW_DECISIONS: &str = "auto_review_decisions_total";
pub const AUDITOR_VERDICTS: &str = "auditor_verdicts_total";
pub const VALIDATION_DURATION: &str = "validation_command_duration";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CounterKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl CounterKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    /// `name{k=v,k2=v2}`, or just `name` without labels.
    fn render(&self) -> String {
        if self.labels.is_empty() {
            return self.name.clone();
        }
        let pairs: Vec<String> = self.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}{{{}}}", self.name, pairs.join(","))
    }
}

#[derive(Debug, Default)]
struct Timing {
    count: AtomicU64,
    total_micros: AtomicU64,
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<AHashMap<CounterKey, AtomicU64>>,
    timings: RwLock<AHashMap<String, Timing>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = CounterKey::new(name, labels);
        {
            let map = self.counters.read().unwrap_or_else(|e| e.into_inner());
            if let Some(c) = map.get(&key) {
                c.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut map = self.counters.write().unwrap_or_else(|e| e.into_inner());
        map.entry(key)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = CounterKey::new(name, labels);
        let map = self.counters.read().unwrap_or_else(|e| e.into_inner());
        map.get(&key).map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn record_duration(&self, name: &str, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let record = |t: &Timing| {
            t.count.fetch_add(1, Ordering::Relaxed);
            t.total_micros.fetch_add(micros, Ordering::Relaxed);
        };
        {
            let map = self.timings.read().unwrap_or_else(|e| e.into_inner());
            if let Some(t) = map.get(name) {
                record(t);
                return;
            }
        }
        let mut map = self.timings.write().unwrap_or_else(|e| e.into_inner());
        record(map.entry(name.to_string()).or_default());
    }

    /// `{"counters": {"name{k=v}": n}, "timings": {"name": {"count", "total_ms"}}}`
    pub fn snapshot(&self) -> Value {
        let mut counters = Map::new();
        for (key, value) in self.counters.read().unwrap_or_else(|e| e.into_inner()).iter() {
            counters.insert(key.render(), json!(value.load(Ordering::Relaxed)));
        }
        let mut timings = Map::new();
        for (name, t) in self.timings.read().unwrap_or_else(|e| e.into_inner()).iter() {
            let total_micros = t.total_micros.load(Ordering::Relaxed);
            timings.insert(
                name.clone(),
                json!({
                    "count": t.count.load(Ordering::Relaxed),
                    "total_ms": total_micros as f64 / 1000.0,
                }),
            );
        }
        json!({ "counters": counters, "timings": timings })
    }
}

/// Process-wide collector shared by every pipeline component.
pub fn global_metrics() -> &'static MetricsCollector {
    static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
    INSTANCE.get_or_init(MetricsCollector::new)
}
