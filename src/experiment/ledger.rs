//! Global capped buffer of metric events

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::experiment::analyzer::Observations;
use crate::experiment::types::MetricEvent;
use crate::metrics::LEDGER_EVICTIONS_TOTAL;

/// Append-only event buffer shared by all experiments
///
/// Once `capacity` events are held, each append evicts the oldest event.
pub struct MetricLedger {
    events: Mutex<VecDeque<MetricEvent>>,
    capacity: usize,
}

impl MetricLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    /// Append an event; returns true when an older event was evicted
    pub fn append(&self, event: MetricEvent) -> bool {
        let mut events = self.events.lock();
        let evicted = if events.len() >= self.capacity {
            events.pop_front();
            LEDGER_EVICTIONS_TOTAL.inc();
            true
        } else {
            false
        };
        events.push_back(event);
        evicted
    }

    /// Values of an experiment's events grouped by variation and metric
    pub fn observations(&self, experiment_id: &str) -> Observations {
        let mut observations = Observations::new();
        for event in self
            .events
            .lock()
            .iter()
            .filter(|e| e.experiment_id == experiment_id)
        {
            observations
                .entry(event.variation_id.clone())
                .or_default()
                .entry(event.metric_id.clone())
                .or_default()
                .push(event.value.as_f64());
        }
        observations
    }

    pub fn events_for(&self, experiment_id: &str) -> Vec<MetricEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.experiment_id == experiment_id)
            .cloned()
            .collect()
    }

    pub fn remove_experiment(&self, experiment_id: &str) -> usize {
        let mut events = self.events.lock();
        let before = events.len();
        events.retain(|e| e.experiment_id != experiment_id);
        before - events.len()
    }

    /// Drop events recorded before `cutoff`
    pub fn sweep_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut events = self.events.lock();
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        before - events.len()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
