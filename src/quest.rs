//! Quests: units of measurement configuration
//!
//! A quest describes one thing to measure for a candidate change (run a
//! benchmark, read a metric out of its output, ...). The engine never looks
//! inside a quest; it only needs a stable identity to key result samples by
//! and a display name for serialized views.
//!
//! The quest list of a job is shared as one `Arc<QuestList>` across every
//! attempt of every candidate. It is never deep-copied, so all attempts
//! observe the same list object.

use std::fmt;
use std::sync::Arc;

/// Capability interface for a unit of measurement configuration.
pub trait Quest: fmt::Debug {
    /// Stable identity, used as the lookup key for result samples.
    fn id(&self) -> &str;

    /// Human-readable name shown in serialized job views.
    fn display_name(&self) -> String {
        self.id().to_string()
    }
}

/// The ordered quest list of a job, shared by reference everywhere.
pub type QuestList = Vec<Box<dyn Quest>>;

/// Build the shared quest list handle from concrete quests.
pub fn shared(quests: QuestList) -> Arc<QuestList> {
    Arc::new(quests)
}

/// A quest that measures one named metric.
///
/// The simplest concrete quest; richer variants (run-test, read-value)
/// live with the measurement substrate, behind the same trait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuest {
    name: String,
}

impl MetricQuest {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Quest for MetricQuest {
    fn id(&self) -> &str {
        &self.name
    }
}
