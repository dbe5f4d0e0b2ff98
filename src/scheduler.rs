//! Build scheduling
//!
//! The webhook endpoint hands accepted deliveries to a [`BuildScheduler`]. The
//! endpoint never waits for the build itself; whatever quiet period or queueing the
//! scheduler applies happens after the webhook has been acknowledged.
//!
//! [`QueueScheduler`] is the in-process implementation: one pending build per job
//! that absorbs further triggers until its quiet period elapses, then a single
//! executor slot shared by all jobs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info};

use crate::build::{Build, BuildStore};
use crate::cause::BuildCause;
use crate::error::BridgeError;
use crate::jobs::Job;

/// Who a build is scheduled on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Trusted execution context used for verified webhook deliveries.
    System,
    Anonymous,
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::System => f.write_str("SYSTEM"),
            Principal::Anonymous => f.write_str("anonymous"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub revision: String,
    pub branch: Option<String>,
    pub cause: BuildCause,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledBuild {
    pub build_id: String,
    /// True when the request was folded into an already queued build.
    pub coalesced: bool,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{principal} may not schedule builds of '{job}'")]
    NotPermitted { principal: Principal, job: String },
}

#[async_trait]
pub trait BuildScheduler: Send + Sync {
    async fn schedule(
        &self,
        principal: &Principal,
        job: Arc<Job>,
        request: BuildRequest,
    ) -> Result<ScheduledBuild, SchedulerError>;
}

#[derive(Debug)]
struct Pending {
    build_id: String,
    deadline: Instant,
}

struct Inner {
    builds: Arc<Mutex<BuildStore>>,
    /// Queued build per job path. Lock before `builds` when both are needed.
    pending: Mutex<HashMap<String, Pending>>,
    /// Only one build command runs at a time.
    execution_lock: Mutex<()>,
}

#[derive(Clone)]
pub struct QueueScheduler {
    inner: Arc<Inner>,
}

impl QueueScheduler {
    pub fn new(builds: Arc<Mutex<BuildStore>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                builds,
                pending: Mutex::new(HashMap::new()),
                execution_lock: Mutex::new(()),
            }),
        }
    }

    pub fn builds(&self) -> Arc<Mutex<BuildStore>> {
        Arc::clone(&self.inner.builds)
    }
}

#[async_trait]
impl BuildScheduler for QueueScheduler {
    async fn schedule(
        &self,
        principal: &Principal,
        job: Arc<Job>,
        request: BuildRequest,
    ) -> Result<ScheduledBuild, SchedulerError> {
        if *principal != Principal::System {
            return Err(SchedulerError::NotPermitted {
                principal: principal.clone(),
                job: job.path.clone(),
            });
        }

        let deadline = Instant::now() + job.quiet_period;
        let mut pending = self.inner.pending.lock().await;

        if let Some(entry) = pending.get_mut(&job.path) {
            entry.deadline = deadline;
            let build_id = entry.build_id.clone();
            let mut builds = self.inner.builds.lock().await;
            builds.update(&build_id, |b| {
                b.coalesce(request.revision, request.branch, request.cause)
            });
            info!(
                "Build {} for job '{}' still queued, merged newer trigger into it",
                build_id, job.path
            );
            return Ok(ScheduledBuild {
                build_id,
                coalesced: true,
            });
        }

        let build = Build::new(&job.path, request.revision, request.branch, request.cause);
        let build_id = build.id.clone();
        info!(
            "Queued build {} for job '{}': {} (quiet period {}s)",
            build_id,
            job.path,
            build.description,
            job.quiet_period.as_secs()
        );
        self.inner.builds.lock().await.add(build);
        pending.insert(
            job.path.clone(),
            Pending {
                build_id: build_id.clone(),
                deadline,
            },
        );
        drop(pending);

        let inner = Arc::clone(&self.inner);
        let id = build_id.clone();
        tokio::spawn(async move {
            inner.wait_and_run(job, id).await;
        });

        Ok(ScheduledBuild {
            build_id,
            coalesced: false,
        })
    }
}

impl Inner {
    async fn wait_and_run(&self, job: Arc<Job>, build_id: String) {
        // The deadline moves each time another trigger coalesces in.
        loop {
            let deadline = {
                let mut pending = self.pending.lock().await;
                match pending.get(&job.path) {
                    Some(entry) if entry.build_id != build_id => return,
                    Some(entry) if entry.deadline > Instant::now() => entry.deadline,
                    Some(_) => {
                        pending.remove(&job.path);
                        break;
                    }
                    None => return,
                }
            };
            sleep_until(deadline).await;
        }

        let Some(command) = job.command.as_deref() else {
            let mut builds = self.builds.lock().await;
            builds.update(&build_id, |b| b.mark_dispatched());
            info!("Build {} for job '{}' dispatched", build_id, job.path);
            return;
        };

        let _guard = self.execution_lock.lock().await;

        let env = {
            let mut builds = self.builds.lock().await;
            let mut env = BTreeMap::new();
            builds.update(&build_id, |b| {
                b.mark_running();
                env = build_environment(b);
            });
            env
        };

        info!("Build {} - running job '{}'", build_id, job.path);
        match run_build_command(command, job.working_dir.as_deref(), &env).await {
            Ok(output) => {
                info!("Build {} completed successfully.", build_id);
                let mut builds = self.builds.lock().await;
                builds.update(&build_id, |b| b.mark_success(output));
            }
            Err(e) => {
                error!("Build {} failed: {}", build_id, e);
                let mut builds = self.builds.lock().await;
                builds.update(&build_id, |b| b.mark_failed(e.to_string()));
            }
        }
    }
}

/// Webhook cause variables plus the build's own identifiers.
pub fn build_environment(build: &Build) -> BTreeMap<String, String> {
    let mut env = build.cause.environment();
    env.insert("CODING_BUILD_ID".to_string(), build.id.clone());
    env.insert("CODING_JOB_PATH".to_string(), build.job_path.clone());
    env.insert("CODING_BUILD_CAUSE".to_string(), build.description.clone());
    env.insert("CODING_COMMIT_SHA".to_string(), build.revision.clone());
    env
}

/// Runs `command` (split on whitespace: program then args) with `env` added to the
/// inherited environment. Returns stdout on success.
pub async fn run_build_command(
    command: &str,
    working_dir: Option<&std::path::Path>,
    env: &BTreeMap<String, String>,
) -> Result<String, BridgeError> {
    let mut parts = command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| BridgeError::CommandFailed("command is empty".to_string()))?;
    let args: Vec<&str> = parts.collect();

    let mut cmd = Command::new(program);
    cmd.args(&args).envs(env);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    debug!(
        "Running (cwd = {:?}): {} {}",
        working_dir,
        program,
        args.join(" ")
    );
    let output = cmd.output().await.map_err(|e| {
        BridgeError::CommandFailed(format!("'{}' failed to start: {}", program, e))
    })?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("command output:\n{}", stdout);
        Ok(stdout)
    } else {
        Err(BridgeError::CommandFailed(format!(
            "'{}' exited with {}:\n{}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}
