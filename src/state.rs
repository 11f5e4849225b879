//! Job state: the candidate sequence and its attempts
//!
//! [`JobState`] owns the ordered candidate sequence, the attempts run
//! against each candidate, and the exploration logic that grows the
//! sequence toward the culprit change. Only adjacent candidates are ever
//! compared; the sequence grows by inserting synthesized midpoints and
//! never shrinks or reorders.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::attempt::{Attempt, AttemptId, AttemptSnapshot, AttemptView, MeasurementBackend};
use crate::change::{Change, MidpointError, MidpointResolver};
use crate::compare::{compare_samples, Comparison};
use crate::quest::QuestList;

/// Version tag of the persisted state schema. Snapshots from a newer
/// schema are rejected on restore.
pub const SCHEMA_VERSION: u32 = 1;

/// The internal state of a job: quests, candidate sequence, attempt sets
/// and the per-candidate sampling budget.
#[derive(Debug)]
pub struct JobState {
    /// Shared with every attempt; one object, never deep-copied.
    quests: Arc<QuestList>,

    /// Ordered candidate sequence. Order is semantically meaningful: only
    /// adjacent entries are compared.
    changes: Vec<Change>,

    /// Every change in the sequence has a non-empty entry here, seeded
    /// with `repeat_count` attempts at insertion time.
    attempts: HashMap<Change, Vec<Attempt>>,

    /// Planned number of attempts per candidate before an undetected
    /// difference is declared "same".
    repeat_count: usize,

    next_attempt_id: u64,
}

impl JobState {
    pub fn new(quests: Arc<QuestList>, repeat_count: usize) -> Self {
        Self {
            quests,
            changes: Vec::new(),
            attempts: HashMap::new(),
            repeat_count,
            next_attempt_id: 0,
        }
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn repeat_count(&self) -> usize {
        self.repeat_count
    }

    pub fn attempts_for(&self, change: &Change) -> &[Attempt] {
        self.attempts.get(change).map_or(&[], Vec::as_slice)
    }

    /// Append a candidate (or insert it at `index`) and seed it with
    /// `repeat_count` fresh attempts.
    pub fn add_change(&mut self, change: Change, index: Option<usize>) {
        match index {
            Some(index) => self.changes.insert(index, change.clone()),
            None => self.changes.push(change.clone()),
        }
        self.attempts.insert(change.clone(), Vec::new());
        for _ in 0..self.repeat_count {
            self.add_attempt(&change);
        }
    }

    /// One more attempt for a candidate already in the sequence.
    pub fn add_attempt(&mut self, change: &Change) {
        let id = AttemptId(self.next_attempt_id);
        self.next_attempt_id += 1;
        let attempt = Attempt::new(id, Arc::clone(&self.quests), change.clone());
        self.attempts.entry(change.clone()).or_default().push(attempt);
    }

    /// Compare candidates and bisect by adding more candidates as needed.
    ///
    /// For every adjacent pair: if the results differ, synthesize the
    /// midpoint and insert it between the pair; if more information is
    /// needed, add one attempt to whichever side has fewer (ties go to the
    /// left candidate).
    ///
    /// The pair indices are evaluated against the sequence length at call
    /// entry. A midpoint inserted mid-scan is therefore not re-examined
    /// against its new neighbors within the same call (its fresh attempts
    /// make that pair pending anyway), and the pair past the last snapshot
    /// index is picked up on the next invocation. Convergence relies on
    /// this method running once per tick until no pair needs action.
    pub fn explore(&mut self, resolver: &dyn MidpointResolver) -> anyhow::Result<()> {
        let len_at_entry = self.changes.len();
        for index in 1..len_at_entry {
            let change_a = self.changes[index - 1].clone();
            let change_b = self.changes[index].clone();

            match self.compare(&change_a, &change_b) {
                Comparison::Different => {
                    match resolver.midpoint(&change_a, &change_b) {
                        Ok(midpoint) => {
                            // Adjacent commits have no point strictly
                            // between them; the resolver then echoes an
                            // endpoint back.
                            if midpoint != change_a && midpoint != change_b {
                                info!(change = %midpoint, "adding bisection midpoint");
                                self.add_change(midpoint, Some(index));
                            }
                        }
                        // This pair cannot be refined further.
                        Err(MidpointError::NoLinearRelation) => {}
                        Err(MidpointError::Provider(err)) => return Err(err),
                    }
                }
                Comparison::Unknown => {
                    let count_a = self.attempts_for(&change_a).len();
                    let count_b = self.attempts_for(&change_b).len();
                    // Earliest-index candidate wins ties.
                    let target = if count_a <= count_b { change_a } else { change_b };
                    self.add_attempt(&target);
                }
                Comparison::Pending | Comparison::Same => {}
            }
        }
        Ok(())
    }

    /// Advance every incomplete attempt. Returns true if at least one was
    /// advanced; never blocks waiting for completion.
    pub fn schedule_work(&mut self, backend: &dyn MeasurementBackend) -> anyhow::Result<bool> {
        let mut work_left = false;
        for attempts in self.attempts.values_mut() {
            for attempt in attempts {
                if attempt.completed() {
                    continue;
                }
                attempt.schedule_work(backend)?;
                work_left = true;
            }
        }
        Ok(work_left)
    }

    /// Compare two candidates' attempt outcomes.
    ///
    /// Any incomplete attempt on either side makes the answer pending. A
    /// statistically significant difference in either failure behavior or
    /// any quest's result values is different. Once both sides have
    /// exhausted the sampling budget without one, they are declared the
    /// same; until then the answer is unknown.
    pub fn compare(&self, change_a: &Change, change_b: &Change) -> Comparison {
        let attempts_a = self.attempts_for(change_a);
        let attempts_b = self.attempts_for(change_b);

        if attempts_a
            .iter()
            .chain(attempts_b)
            .any(|attempt| !attempt.completed())
        {
            return Comparison::Pending;
        }

        // A change in failure behavior alone counts as a difference.
        let failures_a: Vec<&str> = attempts_a
            .iter()
            .map(|attempt| attempt.failure().unwrap_or(""))
            .collect();
        let failures_b: Vec<&str> = attempts_b
            .iter()
            .map(|attempt| attempt.failure().unwrap_or(""))
            .collect();
        if compare_samples(&failures_a, &failures_b) == Comparison::Different {
            return Comparison::Different;
        }

        let results_a = combine_results_per_quest(attempts_a);
        let results_b = combine_results_per_quest(attempts_b);
        for quest in self.quests.iter() {
            let empty = Vec::new();
            let sample_a = results_a.get(quest.id()).unwrap_or(&empty);
            let sample_b = results_b.get(quest.id()).unwrap_or(&empty);
            if compare_samples(sample_a, sample_b) == Comparison::Different {
                return Comparison::Different;
            }
        }

        // "Same" here means we failed to reject the null hypothesis after
        // running everything we planned to. It is not proof of equivalence.
        if attempts_a.len() >= self.repeat_count && attempts_b.len() >= self.repeat_count {
            return Comparison::Same;
        }

        Comparison::Unknown
    }

    /// The adjacent pairs whose outcomes differ, as (index of the later
    /// candidate, the later candidate).
    pub fn differences(&self) -> Vec<(usize, &Change)> {
        (1..self.changes.len())
            .filter(|&index| {
                self.compare(&self.changes[index - 1], &self.changes[index])
                    == Comparison::Different
            })
            .map(|index| (index, &self.changes[index]))
            .collect()
    }

    pub fn as_view(&self) -> JobStateView {
        let comparisons = (1..self.changes.len())
            .map(|index| self.compare(&self.changes[index - 1], &self.changes[index]))
            .collect();

        // result_values[candidate][quest] is the concatenated sample for
        // that candidate and quest.
        let result_values = self
            .changes
            .iter()
            .map(|change| {
                let combined = combine_results_per_quest(self.attempts_for(change));
                self.quests
                    .iter()
                    .map(|quest| combined.get(quest.id()).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();

        let attempts = self
            .changes
            .iter()
            .map(|change| self.attempts_for(change).iter().map(Attempt::as_view).collect())
            .collect();

        JobStateView {
            quests: self.quests.iter().map(|quest| quest.display_name()).collect(),
            changes: self.changes.clone(),
            comparisons,
            result_values,
            attempts,
        }
    }

    pub fn snapshot(&self) -> JobStateSnapshot {
        JobStateSnapshot {
            version: SCHEMA_VERSION,
            quests: self.quests.iter().map(|quest| quest.id().to_string()).collect(),
            changes: self.changes.clone(),
            attempts: self
                .changes
                .iter()
                .map(|change| self.attempts_for(change).iter().map(Attempt::snapshot).collect())
                .collect(),
            repeat_count: self.repeat_count,
            next_attempt_id: self.next_attempt_id,
        }
    }

    /// Rebuild state from a snapshot against the live quest list.
    ///
    /// Quests are behind a trait and are not themselves persisted; the
    /// snapshot carries their ids and restore validates that the caller
    /// passed the same list.
    pub fn restore(
        snapshot: JobStateSnapshot,
        quests: Arc<QuestList>,
    ) -> Result<Self, SnapshotError> {
        if snapshot.version != SCHEMA_VERSION {
            return Err(SnapshotError::VersionMismatch {
                found: snapshot.version,
                supported: SCHEMA_VERSION,
            });
        }

        let live_ids: Vec<String> = quests.iter().map(|quest| quest.id().to_string()).collect();
        if snapshot.quests != live_ids {
            return Err(SnapshotError::QuestMismatch {
                snapshot: snapshot.quests,
                live: live_ids,
            });
        }

        if snapshot.attempts.len() != snapshot.changes.len() {
            return Err(SnapshotError::ShapeMismatch {
                rows: snapshot.attempts.len(),
                changes: snapshot.changes.len(),
            });
        }

        let mut attempts = HashMap::new();
        for (change, row) in snapshot.changes.iter().zip(snapshot.attempts) {
            if row.is_empty() {
                return Err(SnapshotError::EmptyAttemptSet {
                    change: change.to_string(),
                });
            }
            let restored: Vec<Attempt> = row
                .into_iter()
                .map(|attempt| {
                    Attempt::from_snapshot(attempt, Arc::clone(&quests), change.clone())
                })
                .collect();
            attempts.insert(change.clone(), restored);
        }

        Ok(Self {
            quests,
            changes: snapshot.changes,
            attempts,
            repeat_count: snapshot.repeat_count,
            next_attempt_id: snapshot.next_attempt_id,
        })
    }
}

fn combine_results_per_quest(attempts: &[Attempt]) -> BTreeMap<String, Vec<f64>> {
    let mut aggregate: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for attempt in attempts {
        let Some(values) = attempt.result_values() else {
            continue;
        };
        for (quest_id, results) in values {
            aggregate
                .entry(quest_id.clone())
                .or_default()
                .extend_from_slice(results);
        }
    }
    aggregate
}

/// Serialized view of the state, as embedded in job views.
#[derive(Debug, Clone, Serialize)]
pub struct JobStateView {
    pub quests: Vec<String>,
    pub changes: Vec<Change>,
    /// One entry per adjacent pair: length is `changes.len() - 1`.
    pub comparisons: Vec<Comparison>,
    /// `result_values[candidate][quest]` concatenated sample table.
    pub result_values: Vec<Vec<Vec<f64>>>,
    /// `attempts[candidate][attempt]` record table.
    pub attempts: Vec<Vec<AttemptView>>,
}

/// Versioned persisted form of [`JobState`]. The storage layer decides
/// where this goes; the schema is explicit so it survives refactors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStateSnapshot {
    pub version: u32,
    pub quests: Vec<String>,
    pub changes: Vec<Change>,
    /// Parallel to `changes`: `attempts[i]` are the attempts of
    /// `changes[i]`, in creation order.
    pub attempts: Vec<Vec<AttemptSnapshot>>,
    pub repeat_count: usize,
    pub next_attempt_id: u64,
}

/// Errors restoring a persisted snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("unsupported snapshot version {found} (supported: {supported})")]
    VersionMismatch { found: u32, supported: u32 },

    #[error("snapshot quests {snapshot:?} do not match live quests {live:?}")]
    QuestMismatch {
        snapshot: Vec<String>,
        live: Vec<String>,
    },

    #[error("attempt table has {rows} rows for {changes} candidates")]
    ShapeMismatch { rows: usize, changes: usize },

    #[error("candidate {change} has no attempts")]
    EmptyAttemptSet { change: String },
}
