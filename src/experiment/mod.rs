//! In-process experimentation engine
//!
//! `ExperimentEngine` is the single entry point. It is cheap to clone and
//! safe to share across threads; all clones operate on the same state.
//!
//! ```text
//! create_experiment ─► registry
//! assign ───────────► assignment engine ─► registry counters
//! track ────────────► assignment events + ledger ─► handlers / subscribers
//!                                                 └► debounced analyze
//! analyze ──────────► ledger observations ─► statistical analyzer ─► registry
//! ```
//!
//! Lock order when more than one component is touched: lifecycle gate,
//! registry, assignments, ledger, debounce table. `assign` and `track` hold
//! the gate shared for their writes; `clear` and the retention sweep hold it
//! exclusively, so no write lands for an experiment mid-removal.

pub mod analyzer;
pub mod assignment;
pub mod ledger;
pub mod recommendations;
pub mod registry;
pub mod scheduler;
pub mod sources;
pub mod types;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::errors::Result;
use crate::metrics::{
    ASSIGNMENTS_TOTAL, DEBOUNCED_ANALYSES_TOTAL, EVENTS_TRACKED_TOTAL, HANDLER_FAILURES_TOTAL,
    SWEEP_REMOVED_TOTAL,
};

pub use analyzer::{
    ExperimentResults, MetricSummary, SignificanceTest, SrmCheck, StatisticalAnalyzer, TestType,
    VariationResult, Winner,
};
pub use assignment::{AssignmentEngine, AssignmentOutcome};
pub use ledger::MetricLedger;
pub use recommendations::{Recommendation, RecommendationEngine, RecommendationType};
pub use registry::{ExperimentRegistry, StatusCounts};
pub use scheduler::{Debouncer, MaintenanceHandle, SweepReport};
pub use sources::{Clock, ManualClock, RandomSource, SeededRandom, SystemClock, ThreadRandom};
pub use types::{
    AllocationMethod, Criterion, Experiment, ExperimentConfig, ExperimentStatus, Metadata,
    MetricDefinition, MetricEvent, MetricType, MetricValue, OptimizationGoal,
    ParticipantAssignment, Variation,
};

/// Callback invoked synchronously for every recorded metric event
pub type EventHandler = Arc<dyn Fn(&MetricEvent) -> anyhow::Result<()> + Send + Sync>;

/// Engine-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSummary {
    pub total_experiments: usize,
    pub by_status: StatusCounts,
    pub total_assignments: usize,
    pub ledger_events: usize,
    pub ledger_capacity: usize,
    pub pending_analyses: usize,
    pub sticky_cache_entries: usize,
}

struct EngineInner {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    registry: ExperimentRegistry,
    assignments: AssignmentEngine,
    ledger: MetricLedger,
    debouncer: Arc<Debouncer>,
    handlers: RwLock<Vec<EventHandler>>,
    events_tx: broadcast::Sender<MetricEvent>,
    lifecycle: RwLock<()>,
}

impl EngineInner {
    fn analyze(&self, experiment_id: &str) -> Option<ExperimentResults> {
        let inputs = self.registry.analysis_inputs(experiment_id)?;
        let observations = self.ledger.observations(experiment_id);

        let results = StatisticalAnalyzer::analyze(
            &inputs.experiment,
            &observations,
            &inputs.variation_samples,
            inputs.sample_size,
            self.config.significance_level,
            self.clock.now(),
        );
        self.registry.store_results(experiment_id, results.clone());

        debug!(
            experiment_id,
            sample_size = results.total_sample_size,
            tests = results.tests.len(),
            significant = results.is_significant,
            winner = ?results.winner.as_ref().map(|w| w.variation_id.as_str()),
            srm = results.srm.detected,
            "Experiment analyzed"
        );

        Some(results)
    }

    fn run_retention_sweep(&self) -> SweepReport {
        let _lifecycle = self.lifecycle.write();
        let cutoff = self.clock.now() - chrono::Duration::days(self.config.retention_days);
        let statuses = self.registry.statuses();

        let (assignments_removed, participant_events_trimmed) =
            self.assignments.sweep(cutoff, |experiment_id| {
                statuses
                    .get(experiment_id)
                    .is_some_and(|status| !status.is_terminal())
            });
        let events_removed = self.ledger.sweep_older_than(cutoff);

        SWEEP_REMOVED_TOTAL
            .with_label_values(&["event"])
            .inc_by(events_removed as u64);
        SWEEP_REMOVED_TOTAL
            .with_label_values(&["assignment"])
            .inc_by(assignments_removed as u64);
        SWEEP_REMOVED_TOTAL
            .with_label_values(&["participant_event"])
            .inc_by(participant_events_trimmed as u64);

        let report = SweepReport {
            events_removed,
            assignments_removed,
            participant_events_trimmed,
        };

        info!(
            cutoff = %cutoff,
            events_removed,
            assignments_removed,
            participant_events_trimmed,
            "Retention sweep complete"
        );

        report
    }
}

/// Experiment registry, assignment, tracking and analysis in one handle
#[derive(Clone)]
pub struct ExperimentEngine {
    inner: Arc<EngineInner>,
}

impl Default for ExperimentEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl ExperimentEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_sources(config, Arc::new(SystemClock), Box::new(ThreadRandom))
    }

    /// Engine with injected time and randomness
    pub fn with_sources(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        random: Box<dyn RandomSource>,
    ) -> Self {
        config.log();
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));

        Self {
            inner: Arc::new(EngineInner {
                ledger: MetricLedger::new(config.ledger_capacity),
                debouncer: Debouncer::new(config.debounce()),
                registry: ExperimentRegistry::new(),
                assignments: AssignmentEngine::new(random),
                handlers: RwLock::new(Vec::new()),
                events_tx,
                lifecycle: RwLock::new(()),
                clock,
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Validate and register an experiment
    ///
    /// Fails with `Validation` for a malformed configuration and
    /// `AlreadyExists` for a duplicate id. Nothing is stored on failure.
    pub fn create_experiment(&self, config: ExperimentConfig) -> Result<Arc<Experiment>> {
        self.inner.registry.create(config, self.inner.clock.now())
    }

    pub fn get_experiment(&self, experiment_id: &str) -> Option<Arc<Experiment>> {
        self.inner.registry.get(experiment_id)
    }

    pub fn list_experiments(&self) -> Vec<Arc<Experiment>> {
        self.inner.registry.list()
    }

    pub fn list_by_status(&self, status: ExperimentStatus) -> Vec<Arc<Experiment>> {
        self.inner.registry.list_by_status(status)
    }

    /// Change an experiment's status; no other state is touched
    pub fn set_status(&self, experiment_id: &str, status: ExperimentStatus) -> Result<()> {
        self.inner.registry.set_status(experiment_id, status)
    }

    /// Remove an experiment with its results, assignments, events and any
    /// pending re-analysis. Other experiments are unaffected.
    pub fn clear(&self, experiment_id: &str) {
        let (removed, assignments, events) = {
            let _lifecycle = self.inner.lifecycle.write();
            let removed = self.inner.registry.remove(experiment_id).is_some();
            let assignments = self.inner.assignments.remove_experiment(experiment_id);
            let events = self.inner.ledger.remove_experiment(experiment_id);
            self.inner.debouncer.cancel(experiment_id);
            (removed, assignments, events)
        };

        if removed {
            info!(experiment_id, assignments, events, "Experiment cleared");
        } else {
            debug!(experiment_id, "Clear on unknown experiment");
        }
    }

    pub fn summary(&self) -> EngineSummary {
        EngineSummary {
            total_experiments: self.inner.registry.len(),
            by_status: self.inner.registry.status_counts(),
            total_assignments: self.inner.assignments.count(),
            ledger_events: self.inner.ledger.len(),
            ledger_capacity: self.inner.ledger.capacity(),
            pending_analyses: self.inner.debouncer.pending(),
            sticky_cache_entries: self.inner.assignments.sticky_cache_len(),
        }
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Variation id for a participant, assigning on first call
    ///
    /// None when the experiment is missing or not active, or the participant
    /// fails the allocation criteria. Repeat calls return the stored
    /// variation regardless of metadata.
    pub fn assign(
        &self,
        experiment_id: &str,
        participant_id: &str,
        metadata: Option<Metadata>,
    ) -> Option<String> {
        let _lifecycle = self.inner.lifecycle.read();
        let Some(experiment) = self.inner.registry.get(experiment_id) else {
            debug!(experiment_id, "Assign on unknown experiment");
            ASSIGNMENTS_TOTAL
                .with_label_values(&["none", "unknown_experiment"])
                .inc();
            return None;
        };

        let method = experiment.allocation.method.as_str();
        if !experiment.is_active() {
            debug!(experiment_id, status = %experiment.status, "Assign on inactive experiment");
            ASSIGNMENTS_TOTAL.with_label_values(&[method, "inactive"]).inc();
            return None;
        }

        let outcome = self.inner.assignments.assign(
            &experiment,
            participant_id,
            metadata.unwrap_or_default(),
            self.inner.clock.now(),
        );
        ASSIGNMENTS_TOTAL
            .with_label_values(&[method, outcome.as_str()])
            .inc();

        match &outcome {
            AssignmentOutcome::Assigned(variation_id) => {
                self.inner
                    .registry
                    .record_assignment(experiment_id, variation_id);
                debug!(experiment_id, participant_id, variation_id = %variation_id, method, "Participant assigned");
            }
            AssignmentOutcome::Ineligible => {
                debug!(experiment_id, participant_id, "Participant excluded by allocation criteria");
            }
            AssignmentOutcome::Existing(_) | AssignmentOutcome::NoVariation => {}
        }

        outcome.into_variation_id()
    }

    /// Payload of the participant's assigned variation; never assigns
    pub fn get_variation_config(
        &self,
        experiment_id: &str,
        participant_id: &str,
    ) -> Option<serde_json::Value> {
        let experiment = self.inner.registry.get(experiment_id)?;
        let variation_id = self
            .inner
            .assignments
            .variation_of(experiment_id, participant_id)?;
        experiment
            .variation(&variation_id)
            .map(|v| v.payload.clone())
    }

    pub fn get_assignment(
        &self,
        experiment_id: &str,
        participant_id: &str,
    ) -> Option<ParticipantAssignment> {
        self.inner.assignments.get(experiment_id, participant_id)
    }

    // =========================================================================
    // Tracking
    // =========================================================================

    /// Record a metric observation for an assigned participant
    ///
    /// Silently ignored unless the experiment is active, declares the metric
    /// and the participant is assigned. A recorded event is delivered to
    /// handlers and subscribers, then schedules a debounced re-analysis.
    pub fn track(
        &self,
        experiment_id: &str,
        participant_id: &str,
        metric_id: &str,
        value: impl Into<MetricValue>,
        metadata: Option<Metadata>,
    ) {
        // Released before handlers run so they may call back into the engine
        let event = {
            let _lifecycle = self.inner.lifecycle.read();
            let Some(experiment) = self.inner.registry.get(experiment_id) else {
                self.ignore_track(experiment_id, participant_id, "unknown_experiment");
                return;
            };
            if !experiment.is_active() {
                self.ignore_track(experiment_id, participant_id, "inactive");
                return;
            }
            if experiment.metric(metric_id).is_none() {
                self.ignore_track(experiment_id, participant_id, "unknown_metric");
                return;
            }
            let Some(variation_id) = self
                .inner
                .assignments
                .variation_of(experiment_id, participant_id)
            else {
                self.ignore_track(experiment_id, participant_id, "unassigned");
                return;
            };

            let event = MetricEvent {
                id: Uuid::new_v4(),
                experiment_id: experiment_id.to_string(),
                participant_id: participant_id.to_string(),
                variation_id,
                metric_id: metric_id.to_string(),
                value: value.into(),
                timestamp: self.inner.clock.now(),
                metadata: metadata.unwrap_or_default(),
            };

            self.inner.assignments.append_event(&event);
            self.inner.ledger.append(event.clone());
            event
        };
        EVENTS_TRACKED_TOTAL.with_label_values(&["recorded"]).inc();

        self.notify(&event);
        self.schedule_analysis(experiment_id);
    }

    fn ignore_track(&self, experiment_id: &str, participant_id: &str, reason: &'static str) {
        debug!(experiment_id, participant_id, reason, "Track ignored");
        EVENTS_TRACKED_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Events of an experiment currently held in the ledger
    pub fn metric_events(&self, experiment_id: &str) -> Vec<MetricEvent> {
        self.inner.ledger.events_for(experiment_id)
    }

    // =========================================================================
    // Subscribers
    // =========================================================================

    /// Register a handler called for every recorded event
    ///
    /// Errors and panics from a handler are logged and counted; they never
    /// reach the caller of `track` or stop delivery to other handlers.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&MetricEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.handlers.write().push(Arc::new(handler));
    }

    /// Receiver for every recorded event
    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.inner.events_tx.subscribe()
    }

    fn notify(&self, event: &MetricEvent) {
        let handlers: Vec<EventHandler> = self.inner.handlers.read().clone();

        for (index, handler) in handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    HANDLER_FAILURES_TOTAL.inc();
                    warn!(
                        handler = index,
                        event_id = %event.id,
                        experiment_id = %event.experiment_id,
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(_) => {
                    HANDLER_FAILURES_TOTAL.inc();
                    warn!(
                        handler = index,
                        event_id = %event.id,
                        experiment_id = %event.experiment_id,
                        "Event handler panicked"
                    );
                }
            }
        }

        // No receivers is not an error
        let _ = self.inner.events_tx.send(event.clone());
    }

    // =========================================================================
    // Analysis
    // =========================================================================

    fn schedule_analysis(&self, experiment_id: &str) {
        let inner = Arc::downgrade(&self.inner);
        let id = experiment_id.to_string();

        self.inner.debouncer.schedule(experiment_id, move || {
            if let Some(inner) = inner.upgrade() {
                DEBOUNCED_ANALYSES_TOTAL.inc();
                inner.analyze(&id);
            }
        });
    }

    /// Run the statistical analysis now and store the result
    pub fn analyze(&self, experiment_id: &str) -> Option<ExperimentResults> {
        self.inner.analyze(experiment_id)
    }

    /// Most recent stored analysis, without recomputing
    pub fn latest_results(&self, experiment_id: &str) -> Option<ExperimentResults> {
        self.inner.registry.latest_results(experiment_id)
    }

    /// Fresh analysis turned into recommendations, highest confidence first
    pub fn get_recommendations(&self, experiment_id: &str) -> Vec<Recommendation> {
        let Some(experiment) = self.inner.registry.get(experiment_id) else {
            return Vec::new();
        };
        let Some(results) = self.inner.analyze(experiment_id) else {
            return Vec::new();
        };
        RecommendationEngine::recommend(&experiment, &results, self.inner.clock.now())
    }

    pub fn pending_analyses(&self) -> usize {
        self.inner.debouncer.pending()
    }

    /// Debounced analyses that have run since the engine was created
    pub fn debounced_analyses(&self) -> u64 {
        self.inner.debouncer.fired()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Drop data older than the retention window and assignments of
    /// completed, cancelled or removed experiments
    pub fn run_retention_sweep(&self) -> SweepReport {
        self.inner.run_retention_sweep()
    }

    /// Start the periodic retention sweep on the current tokio runtime
    ///
    /// The task holds the engine weakly and ends once every engine handle is
    /// dropped, or when the returned handle is shut down or dropped.
    pub fn start_maintenance(&self) -> Result<MaintenanceHandle> {
        let handle = scheduler::spawn_periodic(
            self.inner.config.sweep_interval(),
            Arc::downgrade(&self.inner),
            |inner: &EngineInner| {
                inner.run_retention_sweep();
            },
        )?;

        info!(
            interval_secs = self.inner.config.sweep_interval_secs,
            retention_days = self.inner.config.retention_days,
            "Retention sweep scheduled"
        );
        Ok(handle)
    }
}
