//! Participant assignment
//!
//! Maps participants to variations and keeps the assignment stable for the
//! lifetime of the experiment. Three allocation methods share one selection
//! rule: a point in [0, 100) is located on the cumulative traffic shares of
//! the variations in declared order.
//!
//! - Random: uniform draw per new participant
//! - Hash: `|h(participant)| % 100` with a multiply-by-31 rolling hash
//! - Sticky: the hash bucket cached per participant id, shared across
//!   experiments so overlapping experiments put a participant at the same
//!   position

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::constants::{HASH_BUCKETS, HASH_MULTIPLIER};
use crate::experiment::sources::RandomSource;
use crate::experiment::types::{
    AllocationMethod, Experiment, Metadata, MetricEvent, ParticipantAssignment, Variation,
};
use crate::metrics::STICKY_CACHE_HITS;

/// 32-bit polynomial rolling hash over UTF-16 code units (h = h * 31 + c)
pub fn participant_hash(participant_id: &str) -> i32 {
    participant_id.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_mul(HASH_MULTIPLIER)
            .wrapping_add(i32::from(unit))
    })
}

/// Bucket in [0, 100) for a participant id
pub fn hash_bucket(participant_id: &str) -> u32 {
    participant_hash(participant_id).unsigned_abs() % HASH_BUCKETS
}

/// First variation whose cumulative traffic share reaches `point`
///
/// Falls back to the first variation when rounding leaves `point` above the
/// final cumulative share.
pub fn select_by_share(variations: &[Variation], point: f64) -> Option<&Variation> {
    let mut cumulative = 0.0;
    for variation in variations {
        cumulative += variation.traffic;
        if cumulative >= point {
            return Some(variation);
        }
    }
    variations.first()
}

/// Result of an assignment attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentOutcome {
    /// Participant was already assigned; original variation returned
    Existing(String),
    /// Newly assigned
    Assigned(String),
    /// Failed inclusion or matched exclusion criteria
    Ineligible,
    /// Experiment has no variations to choose from
    NoVariation,
}

impl AssignmentOutcome {
    pub fn variation_id(&self) -> Option<&str> {
        match self {
            Self::Existing(id) | Self::Assigned(id) => Some(id),
            Self::Ineligible | Self::NoVariation => None,
        }
    }

    pub fn into_variation_id(self) -> Option<String> {
        match self {
            Self::Existing(id) | Self::Assigned(id) => Some(id),
            Self::Ineligible | Self::NoVariation => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Existing(_) => "existing",
            Self::Assigned(_) => "assigned",
            Self::Ineligible => "ineligible",
            Self::NoVariation => "no_variation",
        }
    }
}

/// Assignment store plus allocation strategies
pub struct AssignmentEngine {
    /// experiment id -> participant id -> assignment
    assignments: RwLock<HashMap<String, HashMap<String, ParticipantAssignment>>>,
    /// participant id -> sticky bucket, independent of experiment
    sticky_buckets: DashMap<String, u32>,
    random: Mutex<Box<dyn RandomSource>>,
}

impl AssignmentEngine {
    pub fn new(random: Box<dyn RandomSource>) -> Self {
        Self {
            assignments: RwLock::new(HashMap::new()),
            sticky_buckets: DashMap::new(),
            random: Mutex::new(random),
        }
    }

    /// Assign a participant, or return their existing assignment
    ///
    /// The caller has already checked that the experiment is active. The
    /// write lock is held across lookup and insert, so concurrent calls for
    /// the same participant agree on one variation.
    pub fn assign(
        &self,
        experiment: &Experiment,
        participant_id: &str,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> AssignmentOutcome {
        let mut assignments = self.assignments.write();

        if let Some(existing) = assignments
            .get(&experiment.id)
            .and_then(|participants| participants.get(participant_id))
        {
            return AssignmentOutcome::Existing(existing.variation_id.clone());
        }

        if !experiment.allocation.admits(&metadata) {
            return AssignmentOutcome::Ineligible;
        }

        let Some(variation) = self.select_variation(experiment, participant_id) else {
            return AssignmentOutcome::NoVariation;
        };
        let variation_id = variation.id.clone();

        assignments
            .entry(experiment.id.clone())
            .or_default()
            .insert(
                participant_id.to_string(),
                ParticipantAssignment {
                    experiment_id: experiment.id.clone(),
                    participant_id: participant_id.to_string(),
                    variation_id: variation_id.clone(),
                    assigned_at: now,
                    metadata,
                    events: Vec::new(),
                },
            );

        AssignmentOutcome::Assigned(variation_id)
    }

    /// Pick a variation with the experiment's allocation method
    pub fn select_variation<'a>(
        &self,
        experiment: &'a Experiment,
        participant_id: &str,
    ) -> Option<&'a Variation> {
        if experiment.variations.is_empty() {
            return None;
        }

        let point = match experiment.allocation.method {
            AllocationMethod::Random => self.random.lock().next_unit() * 100.0,
            AllocationMethod::Hash => f64::from(hash_bucket(participant_id)),
            AllocationMethod::Sticky => f64::from(self.sticky_bucket(participant_id)),
        };

        select_by_share(&experiment.variations, point)
    }

    /// Cached hash bucket; the first writer wins under concurrent calls
    pub fn sticky_bucket(&self, participant_id: &str) -> u32 {
        if let Some(bucket) = self.sticky_buckets.get(participant_id) {
            STICKY_CACHE_HITS.inc();
            return *bucket;
        }

        *self
            .sticky_buckets
            .entry(participant_id.to_string())
            .or_insert_with(|| hash_bucket(participant_id))
    }

    pub fn sticky_cache_len(&self) -> usize {
        self.sticky_buckets.len()
    }

    pub fn get(&self, experiment_id: &str, participant_id: &str) -> Option<ParticipantAssignment> {
        self.assignments
            .read()
            .get(experiment_id)
            .and_then(|participants| participants.get(participant_id))
            .cloned()
    }

    pub fn variation_of(&self, experiment_id: &str, participant_id: &str) -> Option<String> {
        self.assignments
            .read()
            .get(experiment_id)
            .and_then(|participants| participants.get(participant_id))
            .map(|a| a.variation_id.clone())
    }

    /// Attach an event to its participant's assignment
    pub fn append_event(&self, event: &MetricEvent) -> bool {
        let mut assignments = self.assignments.write();
        match assignments
            .get_mut(&event.experiment_id)
            .and_then(|participants| participants.get_mut(&event.participant_id))
        {
            Some(assignment) => {
                assignment.events.push(event.clone());
                true
            }
            None => false,
        }
    }

    /// Drop every assignment of an experiment, returning how many were removed
    pub fn remove_experiment(&self, experiment_id: &str) -> usize {
        self.assignments
            .write()
            .remove(experiment_id)
            .map(|participants| participants.len())
            .unwrap_or(0)
    }

    /// Retention sweep over assignments
    ///
    /// Removes assignments of experiments for which `is_live` is false and
    /// assignments made before `cutoff`; trims older events from the rest.
    /// Returns (assignments removed, participant events trimmed).
    pub fn sweep(&self, cutoff: DateTime<Utc>, is_live: impl Fn(&str) -> bool) -> (usize, usize) {
        let mut removed = 0;
        let mut trimmed = 0;

        self.assignments.write().retain(|experiment_id, participants| {
            if !is_live(experiment_id.as_str()) {
                removed += participants.len();
                return false;
            }

            participants.retain(|_, assignment| {
                if assignment.assigned_at < cutoff {
                    removed += 1;
                    return false;
                }
                let before = assignment.events.len();
                assignment.events.retain(|e| e.timestamp >= cutoff);
                trimmed += before - assignment.events.len();
                true
            });

            !participants.is_empty()
        });

        (removed, trimmed)
    }

    pub fn count(&self) -> usize {
        self.assignments.read().values().map(|p| p.len()).sum()
    }
}
