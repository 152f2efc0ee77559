//! Experiment Engine Library
//!
//! In-process A/B and multivariate experimentation for services that want
//! assignment, metric collection and significance testing without an
//! external experimentation platform.
//!
//! # Key Features
//! - Validated experiment registry with lifecycle status
//! - Random, hash and sticky participant allocation with eligibility criteria
//! - Capped metric ledger with event handlers and broadcast subscribers
//! - t-tests, two-proportion z-tests and Benjamini-Hochberg correction
//! - Rule-based stop / extend / modify recommendations
//! - Debounced re-analysis and periodic retention sweeps on tokio
//!
//! # Example
//! ```no_run
//! use experiment_engine::{
//!     ExperimentConfig, ExperimentEngine, ExperimentStatus, MetricDefinition, Variation,
//! };
//!
//! let engine = ExperimentEngine::default();
//! engine
//!     .create_experiment(
//!         ExperimentConfig::builder("checkout", "Checkout button")
//!             .with_variation(Variation::control("blue", 50.0))
//!             .with_variation(Variation::new("green", 50.0))
//!             .with_metric(MetricDefinition::conversion("purchase"))
//!             .with_status(ExperimentStatus::Active)
//!             .build(),
//!     )
//!     .unwrap();
//!
//! if let Some(variation) = engine.assign("checkout", "user-42", None) {
//!     println!("user-42 sees {variation}");
//!     engine.track("checkout", "user-42", "purchase", true, None);
//! }
//! ```

pub mod config;
pub mod constants;
pub mod errors;
pub mod experiment;
pub mod metrics;
pub mod stats;
pub mod tracing_setup;
pub mod validation;

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use parking_lot;
pub use uuid;

pub use config::EngineConfig;
pub use errors::{ExperimentError, Result};
pub use experiment::{
    AllocationMethod, EngineSummary, Experiment, ExperimentConfig, ExperimentEngine,
    ExperimentResults, ExperimentStatus, ManualClock, Metadata, MetricDefinition, MetricEvent,
    MetricType, MetricValue, OptimizationGoal, Recommendation, RecommendationType, SeededRandom,
    SweepReport, Variation,
};
