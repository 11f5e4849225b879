//! Attempts: one measurement trial per candidate
//!
//! An [`Attempt`] runs every quest of the job once against one change. The
//! actual execution happens out of band in the measurement substrate; the
//! attempt only asks the substrate to start or advance the trial and records
//! the outcome once one is reported. [`Attempt::schedule_work`] never
//! blocks, so real progress is only observed on a later tick.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::change::Change;
use crate::quest::QuestList;

/// Engine-assigned serial identifying one attempt to the measurement
/// substrate across ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal outcome of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    /// The trial failed; the description is itself a comparison dimension,
    /// since a change in failure behavior alone counts as a difference.
    Failure(String),

    /// Quest id to the ordered result values that quest produced.
    Measurements(BTreeMap<String, Vec<f64>>),
}

/// What the measurement substrate reports when polled.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialStatus {
    /// The trial is running (or was just started); poll again next tick.
    Pending,
    Completed(TrialOutcome),
}

/// Collaborator that executes trials asynchronously.
pub trait MeasurementBackend {
    /// Start the trial for `id` if it is not running yet, otherwise report
    /// its progress. Must be idempotent and must not block.
    fn poll_trial(
        &self,
        id: AttemptId,
        change: &Change,
        quests: &QuestList,
    ) -> anyhow::Result<TrialStatus>;
}

/// One trial of all quests against one change.
///
/// Owned exclusively by the job state that created it; the quest list is
/// the job-wide shared handle, never a copy.
#[derive(Debug)]
pub struct Attempt {
    id: AttemptId,
    quests: Arc<QuestList>,
    change: Change,
    outcome: Option<TrialOutcome>,
}

impl Attempt {
    pub fn new(id: AttemptId, quests: Arc<QuestList>, change: Change) -> Self {
        Self {
            id,
            quests,
            change,
            outcome: None,
        }
    }

    pub fn id(&self) -> AttemptId {
        self.id
    }

    pub fn change(&self) -> &Change {
        &self.change
    }

    pub fn completed(&self) -> bool {
        self.outcome.is_some()
    }

    /// Failure description, if the trial completed by failing.
    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            Some(TrialOutcome::Failure(description)) => Some(description),
            _ => None,
        }
    }

    /// Measured result values, if the trial completed successfully.
    pub fn result_values(&self) -> Option<&BTreeMap<String, Vec<f64>>> {
        match &self.outcome {
            Some(TrialOutcome::Measurements(values)) => Some(values),
            _ => None,
        }
    }

    /// Ask the substrate to start or advance this trial. Idempotent: a
    /// completed attempt is left untouched.
    pub fn schedule_work(&mut self, backend: &dyn MeasurementBackend) -> anyhow::Result<()> {
        if self.completed() {
            return Ok(());
        }
        match backend.poll_trial(self.id, &self.change, &self.quests)? {
            TrialStatus::Pending => {}
            TrialStatus::Completed(outcome) => self.outcome = Some(outcome),
        }
        Ok(())
    }

    pub fn as_view(&self) -> AttemptView {
        AttemptView {
            id: self.id,
            completed: self.completed(),
            failure: self.failure().map(str::to_string),
            result_values: self.result_values().cloned().unwrap_or_default(),
        }
    }

    pub(crate) fn snapshot(&self) -> AttemptSnapshot {
        AttemptSnapshot {
            id: self.id,
            outcome: self.outcome.clone(),
        }
    }

    pub(crate) fn from_snapshot(
        snapshot: AttemptSnapshot,
        quests: Arc<QuestList>,
        change: Change,
    ) -> Self {
        Self {
            id: snapshot.id,
            quests,
            change,
            outcome: snapshot.outcome,
        }
    }
}

/// Serialized record of one attempt, as exposed in job views.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptView {
    pub id: AttemptId,
    pub completed: bool,
    pub failure: Option<String>,
    pub result_values: BTreeMap<String, Vec<f64>>,
}

/// Persisted form of one attempt. The owning change and the quest list are
/// stored once at the state level, not per attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSnapshot {
    pub id: AttemptId,
    pub outcome: Option<TrialOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Commit;
    use crate::quest::{self, MetricQuest, Quest};
    use std::cell::RefCell;

    fn quests() -> Arc<QuestList> {
        quest::shared(vec![Box::new(MetricQuest::new("latency")) as Box<dyn Quest>])
    }

    fn change() -> Change {
        Change::new(Commit::new("chromium", "abc123"))
    }

    /// Pending on the first poll, completed on the second.
    struct TwoPhaseBackend {
        polls: RefCell<u32>,
    }

    impl MeasurementBackend for TwoPhaseBackend {
        fn poll_trial(
            &self,
            _id: AttemptId,
            _change: &Change,
            _quests: &QuestList,
        ) -> anyhow::Result<TrialStatus> {
            let mut polls = self.polls.borrow_mut();
            *polls += 1;
            if *polls == 1 {
                Ok(TrialStatus::Pending)
            } else {
                let mut values = BTreeMap::new();
                values.insert("latency".to_string(), vec![42.0]);
                Ok(TrialStatus::Completed(TrialOutcome::Measurements(values)))
            }
        }
    }

    #[test]
    fn test_completes_across_polls() {
        let backend = TwoPhaseBackend {
            polls: RefCell::new(0),
        };
        let mut attempt = Attempt::new(AttemptId(1), quests(), change());
        assert!(!attempt.completed());

        attempt.schedule_work(&backend).unwrap();
        assert!(!attempt.completed());

        attempt.schedule_work(&backend).unwrap();
        assert!(attempt.completed());
        assert_eq!(attempt.failure(), None);
        assert_eq!(
            attempt.result_values().unwrap()["latency"],
            vec![42.0]
        );
    }

    #[test]
    fn test_schedule_work_is_idempotent_once_completed() {
        let backend = TwoPhaseBackend {
            polls: RefCell::new(0),
        };
        let mut attempt = Attempt::new(AttemptId(1), quests(), change());
        attempt.schedule_work(&backend).unwrap();
        attempt.schedule_work(&backend).unwrap();
        assert!(attempt.completed());

        // No further polls reach the backend.
        attempt.schedule_work(&backend).unwrap();
        assert_eq!(*backend.polls.borrow(), 2);
    }

    #[test]
    fn test_failure_is_captured() {
        struct FailingBackend;
        impl MeasurementBackend for FailingBackend {
            fn poll_trial(
                &self,
                _id: AttemptId,
                _change: &Change,
                _quests: &QuestList,
            ) -> anyhow::Result<TrialStatus> {
                Ok(TrialStatus::Completed(TrialOutcome::Failure(
                    "Exception: boom".to_string(),
                )))
            }
        }

        let mut attempt = Attempt::new(AttemptId(7), quests(), change());
        attempt.schedule_work(&FailingBackend).unwrap();
        assert!(attempt.completed());
        assert_eq!(attempt.failure(), Some("Exception: boom"));
        assert_eq!(attempt.result_values(), None);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let backend = TwoPhaseBackend {
            polls: RefCell::new(1), // completes on first poll
        };
        let mut attempt = Attempt::new(AttemptId(3), quests(), change());
        attempt.schedule_work(&backend).unwrap();

        let snapshot = attempt.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: AttemptSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Attempt::from_snapshot(back, quests(), change());

        assert_eq!(restored.id(), AttemptId(3));
        assert!(restored.completed());
        assert_eq!(restored.result_values(), attempt.result_values());
    }
}
