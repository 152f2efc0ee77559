//! Experiment registry
//!
//! Owns experiment configuration, per-variation sample counters and the most
//! recent analysis of each experiment.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{ExperimentError, Result};
use crate::experiment::analyzer::{ExperimentResults, StatisticalAnalyzer};
use crate::experiment::types::{Experiment, ExperimentConfig, ExperimentStatus};
use crate::metrics::EXPERIMENTS_REGISTERED;
use crate::validation::validate_experiment_config;

/// Registry entry for one experiment
#[derive(Debug, Clone)]
pub struct ExperimentRecord {
    pub experiment: Arc<Experiment>,
    /// Participants assigned since creation
    pub sample_size: u64,
    /// Participants assigned per variation id
    pub variation_samples: HashMap<String, u64>,
    /// Latest analysis (zeroed until the first run)
    pub results: ExperimentResults,
}

/// Snapshot handed to the analyzer
#[derive(Debug, Clone)]
pub struct AnalysisInputs {
    pub experiment: Arc<Experiment>,
    pub sample_size: u64,
    pub variation_samples: HashMap<String, u64>,
}

/// Counts of registered experiments by status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub draft: usize,
    pub active: usize,
    pub stopped: usize,
    pub completed: usize,
    pub cancelled: usize,
}

/// Stores experiments keyed by id
#[derive(Default)]
pub struct ExperimentRegistry {
    records: RwLock<HashMap<String, ExperimentRecord>>,
}

impl ExperimentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a new experiment
    ///
    /// Initializes a zeroed result bucket for every variation/metric pair.
    pub fn create(&self, config: ExperimentConfig, now: DateTime<Utc>) -> Result<Arc<Experiment>> {
        let experiment = Arc::new(validate_experiment_config(config, now)?);

        let mut records = self.records.write();
        if records.contains_key(&experiment.id) {
            return Err(ExperimentError::AlreadyExists(experiment.id.clone()));
        }

        let variation_samples = experiment
            .variations
            .iter()
            .map(|v| (v.id.clone(), 0))
            .collect();

        records.insert(
            experiment.id.clone(),
            ExperimentRecord {
                experiment: Arc::clone(&experiment),
                sample_size: 0,
                variation_samples,
                results: StatisticalAnalyzer::empty_results(&experiment),
            },
        );
        EXPERIMENTS_REGISTERED.set(records.len() as i64);

        info!(
            experiment_id = %experiment.id,
            variations = experiment.variations.len(),
            metrics = experiment.metrics.len(),
            method = experiment.allocation.method.as_str(),
            status = %experiment.status,
            "Experiment registered"
        );

        Ok(experiment)
    }

    pub fn get(&self, experiment_id: &str) -> Option<Arc<Experiment>> {
        self.records
            .read()
            .get(experiment_id)
            .map(|r| Arc::clone(&r.experiment))
    }

    pub fn list(&self) -> Vec<Arc<Experiment>> {
        self.records
            .read()
            .values()
            .map(|r| Arc::clone(&r.experiment))
            .collect()
    }

    pub fn list_by_status(&self, status: ExperimentStatus) -> Vec<Arc<Experiment>> {
        self.records
            .read()
            .values()
            .filter(|r| r.experiment.status == status)
            .map(|r| Arc::clone(&r.experiment))
            .collect()
    }

    /// Status of every registered experiment
    pub fn statuses(&self) -> HashMap<String, ExperimentStatus> {
        self.records
            .read()
            .iter()
            .map(|(id, r)| (id.clone(), r.experiment.status))
            .collect()
    }

    /// Pure status transition; no other state changes
    pub fn set_status(&self, experiment_id: &str, status: ExperimentStatus) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(experiment_id)
            .ok_or_else(|| ExperimentError::NotFound(experiment_id.to_string()))?;

        let previous = record.experiment.status;
        Arc::make_mut(&mut record.experiment).status = status;

        info!(
            experiment_id,
            from = %previous,
            to = %status,
            "Experiment status changed"
        );
        Ok(())
    }

    /// Increment experiment and variation sample counters
    pub fn record_assignment(&self, experiment_id: &str, variation_id: &str) {
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(experiment_id) {
            record.sample_size += 1;
            *record
                .variation_samples
                .entry(variation_id.to_string())
                .or_insert(0) += 1;
        }
    }

    pub fn analysis_inputs(&self, experiment_id: &str) -> Option<AnalysisInputs> {
        self.records.read().get(experiment_id).map(|r| AnalysisInputs {
            experiment: Arc::clone(&r.experiment),
            sample_size: r.sample_size,
            variation_samples: r.variation_samples.clone(),
        })
    }

    pub fn store_results(&self, experiment_id: &str, results: ExperimentResults) {
        if let Some(record) = self.records.write().get_mut(experiment_id) {
            record.results = results;
        }
    }

    pub fn latest_results(&self, experiment_id: &str) -> Option<ExperimentResults> {
        self.records
            .read()
            .get(experiment_id)
            .map(|r| r.results.clone())
    }

    /// Remove an experiment and its stored results
    pub fn remove(&self, experiment_id: &str) -> Option<ExperimentRecord> {
        let mut records = self.records.write();
        let removed = records.remove(experiment_id);
        EXPERIMENTS_REGISTERED.set(records.len() as i64);
        removed
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in self.records.read().values() {
            match record.experiment.status {
                ExperimentStatus::Draft => counts.draft += 1,
                ExperimentStatus::Active => counts.active += 1,
                ExperimentStatus::Stopped => counts.stopped += 1,
                ExperimentStatus::Completed => counts.completed += 1,
                ExperimentStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }
}
