//! Bisecar - statistical bisection engine for performance culprits
//!
//! Given an ordered sequence of candidate changes, bisecar runs repeated
//! measurement trials per candidate, compares adjacent candidates with a
//! nonparametric rank test, and inserts synthesized midpoints between
//! candidates whose results differ until the difference is pinned to a
//! single change. The control loop advances in bounded, externally
//! scheduled ticks, so a job tolerates interruption and at-least-once
//! redelivery.
//!
//! Storage, trial execution, tick scheduling and notification posting are
//! collaborator traits; this crate is the decision core.

pub mod attempt;
pub mod change;
pub mod compare;
pub mod job;
pub mod mann_whitney;
pub mod quest;
pub mod state;
