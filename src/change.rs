//! Candidate changes and midpoint synthesis
//!
//! A [`Change`] is one point in the explored space: a base commit, optional
//! dependency-commit overrides, and an optional uncommitted patch. Changes
//! are immutable and compared by value.
//!
//! Synthesizing a change "between" two others needs commit-log access, so
//! it lives behind the [`MidpointResolver`] collaborator trait. Two changes
//! can only be bisected when they sit on a common interpolable axis: same
//! patch, same dependency repositories. Anything else is a
//! [`MidpointError::NoLinearRelation`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One commit in one repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commit {
    pub repository: String,
    pub git_hash: String,
}

impl Commit {
    pub fn new(repository: impl Into<String>, git_hash: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            git_hash: git_hash.into(),
        }
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.git_hash)
    }
}

/// An uncommitted local modification applied on top of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Patch {
    pub server: String,
    pub issue: u64,
    pub patchset: u64,
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.server, self.issue, self.patchset)
    }
}

/// One candidate point in the search space.
///
/// The first commit is the base; any further commits override dependency
/// repositories. Identity is by value: two changes with the same commits
/// and patch are the same candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Change {
    commits: Vec<Commit>,
    patch: Option<Patch>,
}

impl Change {
    pub fn new(base_commit: Commit) -> Self {
        Self {
            commits: vec![base_commit],
            patch: None,
        }
    }

    pub fn with_dep(mut self, dep: Commit) -> Self {
        self.commits.push(dep);
        self
    }

    pub fn with_patch(mut self, patch: Patch) -> Self {
        self.patch = Some(patch);
        self
    }

    pub fn base_commit(&self) -> &Commit {
        // Constructed with at least the base commit.
        &self.commits[0]
    }

    /// Every commit referenced by this change, base first. Used for commit
    /// metadata lookup when composing notifications.
    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    pub fn patch(&self) -> Option<&Patch> {
        self.patch.as_ref()
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_commit())?;
        for dep in &self.commits[1..] {
            write!(f, " + {dep}")?;
        }
        if let Some(patch) = &self.patch {
            write!(f, " + {patch}")?;
        }
        Ok(())
    }
}

/// Whether a midpoint between two changes could exist at all.
///
/// True when both changes carry the same patch and reference the same
/// repositories in the same order, leaving the commit positions as the only
/// axis of variation. Resolver implementations use this as the precheck
/// before consulting the commit log.
pub fn linearly_related(a: &Change, b: &Change) -> bool {
    a.patch == b.patch
        && a.commits.len() == b.commits.len()
        && a.commits
            .iter()
            .zip(&b.commits)
            .all(|(x, y)| x.repository == y.repository)
}

/// Failure modes of midpoint synthesis.
#[derive(Debug, Error)]
pub enum MidpointError {
    /// The two changes are not on a common interpolable axis, e.g. an
    /// arbitrary local modification against a plain commit. The pair cannot
    /// be refined further; exploration treats this as a dead end, not a
    /// job failure.
    #[error("no linear relation between candidate changes")]
    NoLinearRelation,

    /// Anything else (commit-log lookup failed, ...). Propagates and fails
    /// the tick.
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

/// Collaborator that synthesizes a change between two others.
pub trait MidpointResolver {
    /// Produce a change strictly between `a` and `b` where possible.
    ///
    /// When `a` and `b` are adjacent commits there is nothing strictly
    /// between them; implementations then return either endpoint, which the
    /// exploration loop recognizes and skips.
    fn midpoint(&self, a: &Change, b: &Change) -> Result<Change, MidpointError>;
}
