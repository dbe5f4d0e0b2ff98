//! Job registry
//!
//! Jobs live in a tree of folders, addressed by slash-separated paths such as
//! `team/backend/api`. The tree is built once from configuration and only read
//! afterwards, so it is shared behind an `Arc` without locking.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::JobConfig;
use crate::error::{BridgeError, Result};
use crate::filter::BranchFilter;
use crate::trigger::TriggerConfig;

/// A configured job that webhooks can trigger.
#[derive(Debug, Clone)]
pub struct Job {
    pub path: String,
    pub trigger: TriggerConfig,
    pub quiet_period: Duration,
    /// Run for each build with the build environment; `None` only records the build.
    pub command: Option<String>,
    pub working_dir: Option<PathBuf>,
}

impl Job {
    pub fn from_config(config: &JobConfig) -> Result<Self> {
        let segments = path_segments(&config.path)?;
        let branch_filter =
            BranchFilter::new(&config.branch_filter).map_err(|source| BridgeError::InvalidFilter {
                path: config.path.clone(),
                source,
            })?;

        Ok(Self {
            path: segments.join("/"),
            trigger: TriggerConfig {
                webhook_secret: config.webhook_secret.clone(),
                trigger_on_push: config.trigger_on_push,
                trigger_on_merge_request: config.trigger_on_merge_request,
                allowed_merge_request_actions: config.merge_request_actions.to_set(),
                ci_skip: config.ci_skip,
                branch_filter,
            },
            quiet_period: Duration::from_secs(config.quiet_period_secs),
            command: config
                .command
                .as_ref()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            working_dir: config.working_dir.clone(),
        })
    }
}

#[derive(Debug)]
enum Node {
    Folder(BTreeMap<String, Node>),
    Job(Arc<Job>),
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    root: BTreeMap<String, Node>,
    count: usize,
}

impl JobRegistry {
    /// Builds the tree, rejecting duplicate paths and jobs that would shadow a folder.
    pub fn from_config(configs: &[JobConfig]) -> Result<Self> {
        let mut registry = Self::default();
        for config in configs {
            registry.insert(Job::from_config(config)?)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, job: Job) -> Result<()> {
        let segments: Vec<String> = job.path.split('/').map(String::from).collect();
        let Some((name, folders)) = segments.split_last() else {
            return Err(invalid(&job.path, "path is empty"));
        };

        let mut current = &mut self.root;
        let mut walked = Vec::new();
        for folder in folders {
            walked.push(folder.as_str());
            let node = current
                .entry(folder.clone())
                .or_insert_with(|| Node::Folder(BTreeMap::new()));
            current = match node {
                Node::Folder(children) => children,
                Node::Job(_) => {
                    let reason = format!("'{}' is already a job", walked.join("/"));
                    return Err(invalid(&job.path, &reason));
                }
            };
        }

        match current.get(name) {
            Some(Node::Job(_)) => Err(invalid(&job.path, "duplicate job path")),
            Some(Node::Folder(_)) => Err(invalid(&job.path, "path is already a folder")),
            None => {
                current.insert(name.clone(), Node::Job(Arc::new(job)));
                self.count += 1;
                Ok(())
            }
        }
    }

    /// Walks `path` through folders; the first job reached wins and any remaining
    /// segments are ignored. A path that ends on a folder is unresolved.
    pub fn resolve(&self, path: &str) -> Option<Arc<Job>> {
        let mut current = &self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match current.get(segment)? {
                Node::Job(job) => return Some(Arc::clone(job)),
                Node::Folder(children) => current = children,
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// All job paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        fn walk(nodes: &BTreeMap<String, Node>, out: &mut Vec<String>) {
            for node in nodes.values() {
                match node {
                    Node::Job(job) => out.push(job.path.clone()),
                    Node::Folder(children) => walk(children, out),
                }
            }
        }
        let mut out = Vec::with_capacity(self.count);
        walk(&self.root, &mut out);
        out
    }
}

fn invalid(path: &str, reason: &str) -> BridgeError {
    BridgeError::InvalidJobPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Splits a configured path, allowing leading and trailing slashes only.
fn path_segments(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(invalid(path, "path is empty"));
    }
    let segments: Vec<&str> = trimmed.split('/').map(str::trim).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid(path, "path has an empty segment"));
    }
    Ok(segments)
}
