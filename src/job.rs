//! The bisection job controller
//!
//! A [`Job`] wraps a [`JobState`] with run/failure/completion status and
//! drives it one tick at a time. Ticks are requested through the external
//! [`Scheduler`] and delivered at-least-once; [`Job::run`] resets failure
//! markers at entry so a retried tick starts clean. The `&mut self`
//! receiver is the single-tick-in-flight discipline: the borrow checker
//! rules out two ticks mutating one job concurrently.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::attempt::MeasurementBackend;
use crate::change::{Change, Commit, MidpointResolver};
use crate::quest::QuestList;
use crate::state::{JobState, JobStateView};

/// Delay before the next tick. Fast enough to keep overhead low while
/// waiting on trials, slow enough not to hammer the scheduler.
pub const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Attempts seeded per candidate when the caller does not choose.
pub const DEFAULT_REPEAT_COUNT: usize = 12;

const ROUND_PUSHPIN: char = '\u{1f4cd}';
const MIDDLE_DOT: char = '\u{b7}';

/// Job identifier, rendered as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(JobId)
    }
}

/// Reference to an external issue that receives progress comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(pub u64);

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque marker for a tick request in flight at the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TaskHandle(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Idle => "idle",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Metadata of one commit, for notification bylines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub message: String,
    pub author: String,
    pub time: String,
}

/// Collaborator that re-invokes the job's tick after a delay.
pub trait Scheduler {
    fn schedule_tick(&self, job: JobId, delay: Duration) -> anyhow::Result<TaskHandle>;
}

/// Collaborator that posts progress comments to an external issue.
pub trait Notifier {
    fn post_comment(&self, issue: IssueId, comment: &str) -> anyhow::Result<()>;
}

/// Collaborator that looks up commit metadata for notifications.
pub trait CommitInfoProvider {
    fn commit_info(&self, commit: &Commit) -> anyhow::Result<CommitInfo>;
}

/// The external collaborators a tick needs, bundled so callers wire them
/// once.
pub struct JobContext<'a> {
    pub resolver: &'a dyn MidpointResolver,
    pub backend: &'a dyn MeasurementBackend,
    pub scheduler: &'a dyn Scheduler,
    pub notifier: &'a dyn Notifier,
    pub commits: &'a dyn CommitInfoProvider,
}

/// A bisection job.
pub struct Job {
    id: JobId,

    /// Request parameters, kept verbatim for the serialized view.
    arguments: serde_json::Value,

    /// When true, exploration picks additional candidates (bisects). When
    /// false, only the candidates added by the caller are measured.
    auto_explore: bool,

    repeat_count: usize,
    issue: Option<IssueId>,

    created: SystemTime,
    updated: SystemTime,
    started: bool,

    /// Description of the failure that ended the last tick, if any.
    exception: Option<String>,

    /// The in-flight tick request. Present while the job is running.
    task: Option<TaskHandle>,

    state: JobState,
}

impl Job {
    pub fn new(
        id: JobId,
        arguments: serde_json::Value,
        quests: Arc<QuestList>,
        auto_explore: bool,
        repeat_count: Option<usize>,
        issue: Option<IssueId>,
    ) -> Self {
        let repeat_count = repeat_count.unwrap_or(DEFAULT_REPEAT_COUNT);
        let now = SystemTime::now();
        Self {
            id,
            arguments,
            auto_explore,
            repeat_count,
            issue,
            created: now,
            updated: now,
            started: false,
            exception: None,
            task: None,
            state: JobState::new(quests, repeat_count),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    pub fn status(&self) -> Status {
        if self.task.is_some() {
            Status::Running
        } else if self.exception.is_some() {
            Status::Failed
        } else if !self.started {
            Status::Idle
        } else {
            Status::Completed
        }
    }

    /// Seed a candidate before starting the job.
    pub fn add_change(&mut self, change: Change) {
        self.state.add_change(change, None);
        self.touch();
    }

    /// Request the first tick and announce the job.
    pub fn start(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<()> {
        self.started = true;
        self.schedule(ctx.scheduler)?;
        self.post_comment(ctx, "started")?;
        self.touch();
        Ok(())
    }

    /// One tick: explore (when auto_explore), advance attempts, then either
    /// request another tick or complete.
    ///
    /// Failure and running markers are cleared up front, so an
    /// at-least-once redelivery of the same tick is safe: a retry that
    /// succeeds leaves no stale failure behind. Any error is captured into
    /// the job, reported, and returned to the invoker so its own
    /// retry/alerting still fires.
    pub fn run(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<()> {
        self.exception = None; // in case the job succeeds on retry
        self.task = None; // in case the tick fails below
        self.started = true;

        let outcome = self.tick(ctx);
        self.touch();
        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fail(ctx, &err);
                Err(err)
            }
        }
    }

    fn tick(&mut self, ctx: &JobContext<'_>) -> anyhow::Result<()> {
        if self.auto_explore {
            self.state.explore(ctx.resolver)?;
        }
        let work_left = self.state.schedule_work(ctx.backend)?;

        if work_left {
            self.schedule(ctx.scheduler)?;
        } else {
            self.post_comment(ctx, "completed")?;
        }
        Ok(())
    }

    fn schedule(&mut self, scheduler: &dyn Scheduler) -> anyhow::Result<()> {
        self.task = Some(scheduler.schedule_tick(self.id, TICK_INTERVAL)?);
        Ok(())
    }

    fn fail(&mut self, ctx: &JobContext<'_>, err: &anyhow::Error) {
        self.exception = Some(format!("{err:#}"));
        // The job is already failing; a notification error only gets
        // logged.
        if let Err(notify_err) = self.post_comment(ctx, "stopped with an error") {
            warn!(job = %self.id, error = %notify_err, "could not post failure comment");
        }
    }

    /// Compose and post a progress comment. No-op without an issue
    /// reference.
    fn post_comment(&self, ctx: &JobContext<'_>, status: &str) -> anyhow::Result<()> {
        let Some(issue) = self.issue else {
            return Ok(());
        };

        let mut comment = format!("{ROUND_PUSHPIN} Bisection job {id} {status}.", id = self.id);
        for (_, change) in self.state.differences() {
            for commit in change.commits() {
                let info = ctx.commits.commit_info(commit)?;
                let subject = info.message.lines().next().unwrap_or_default();
                comment.push_str(&format!(
                    "\n\n{subject}\nBy {author} {MIDDLE_DOT} {time}\n{commit}",
                    author = info.author,
                    time = info.time,
                ));
            }
        }

        ctx.notifier.post_comment(issue, &comment)
    }

    fn touch(&mut self) {
        self.updated = SystemTime::now();
    }

    pub fn as_view(&self, include_state: bool) -> JobView {
        JobView {
            job_id: self.id.to_string(),
            arguments: self.arguments.clone(),
            auto_explore: self.auto_explore,
            repeat_count: self.repeat_count,
            created: unix_ms(self.created),
            updated: unix_ms(self.updated),
            exception: self.exception.clone(),
            status: self.status(),
            state: include_state.then(|| self.state.as_view()),
        }
    }
}

fn unix_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Serialized job view, with the state tables flattened in when requested.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub arguments: serde_json::Value,
    pub auto_explore: bool,
    pub repeat_count: usize,
    /// Unix milliseconds.
    pub created: u64,
    pub updated: u64,
    pub exception: Option<String>,
    pub status: Status,
    #[serde(flatten)]
    pub state: Option<JobStateView>,
}
