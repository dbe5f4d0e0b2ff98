use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

use crate::cause::BuildCause;
use crate::event::EventType;

/// Maximum size for build output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

const TRUNCATION_NOTICE: &str = "\n... (output truncated)";

/// Represents the status of a scheduled build
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Waiting out the job's quiet period; further triggers coalesce into it.
    Queued,
    Running,
    Success,
    Failed,
    /// Handed off without a local command to run.
    Dispatched,
}

impl BuildStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::Dispatched
        )
    }
}

/// A build scheduled by a webhook delivery
#[derive(Debug, Clone, Serialize)]
pub struct Build {
    pub id: String,
    pub job_path: String,
    pub action_type: EventType,
    pub branch: Option<String>,
    pub revision: String,
    pub description: String,
    pub cause: BuildCause,
    pub status: BuildStatus,
    /// Number of deliveries folded into this build.
    pub trigger_count: u32,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub output_truncated: bool,
    pub error: Option<String>,
}

impl Build {
    /// Create a new build in Queued status
    pub fn new(job_path: &str, revision: String, branch: Option<String>, cause: BuildCause) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            job_path: job_path.to_string(),
            action_type: cause.action_type,
            branch,
            revision,
            description: cause.short_description(),
            cause,
            status: BuildStatus::Queued,
            trigger_count: 1,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: None,
            output_truncated: false,
            error: None,
        }
    }

    /// Replace what a queued build will build with a newer delivery.
    pub fn coalesce(&mut self, revision: String, branch: Option<String>, cause: BuildCause) {
        self.action_type = cause.action_type;
        self.revision = revision;
        self.branch = branch;
        self.description = cause.short_description();
        self.cause = cause;
        self.trigger_count += 1;
    }

    pub fn mark_running(&mut self) {
        self.status = BuildStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark build as successful with output (truncates if too large)
    pub fn mark_success(&mut self, output: String) {
        self.status = BuildStatus::Success;
        self.completed_at = Some(Utc::now());
        let (output, truncated) = truncate_output(output);
        self.output = Some(output);
        self.output_truncated = truncated;
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = BuildStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn mark_dispatched(&mut self) {
        self.status = BuildStatus::Dispatched;
        self.completed_at = Some(Utc::now());
    }
}

/// Cuts `output` to [`MAX_OUTPUT_SIZE`] bytes on a char boundary.
fn truncate_output(mut output: String) -> (String, bool) {
    if output.len() <= MAX_OUTPUT_SIZE {
        return (output, false);
    }
    let mut cut = MAX_OUTPUT_SIZE;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str(TRUNCATION_NOTICE);
    (output, true)
}

/// Bounded in-memory build history, oldest first.
#[derive(Debug)]
pub struct BuildStore {
    builds: VecDeque<Build>,
    max_builds: usize,
}

impl BuildStore {
    pub fn new(max_builds: usize) -> Self {
        Self {
            builds: VecDeque::new(),
            max_builds: max_builds.max(1),
        }
    }

    /// Adds a build, evicting the oldest finished builds once over capacity.
    pub fn add(&mut self, build: Build) {
        self.builds.push_back(build);
        while self.builds.len() > self.max_builds {
            match self.builds.iter().position(|b| b.status.is_finished()) {
                Some(index) => {
                    self.builds.remove(index);
                }
                None => break,
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Build> {
        self.builds.iter().find(|b| b.id == id)
    }

    /// Applies `f` to the build with `id`; returns false if it is unknown.
    pub fn update<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Build),
    {
        match self.builds.iter_mut().find(|b| b.id == id) {
            Some(build) => {
                f(build);
                true
            }
            None => false,
        }
    }

    pub fn current(&self) -> Option<&Build> {
        self.builds
            .iter()
            .find(|b| b.status == BuildStatus::Running)
    }

    pub fn queued(&self) -> Vec<&Build> {
        self.builds
            .iter()
            .filter(|b| b.status == BuildStatus::Queued)
            .collect()
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<&Build> {
        self.builds.iter().rev().take(limit).collect()
    }

    pub fn by_job(&self, job_path: &str) -> Vec<&Build> {
        self.builds
            .iter()
            .rev()
            .filter(|b| b.job_path == job_path)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }
}
