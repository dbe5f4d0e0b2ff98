pub mod api;
pub mod build;
pub mod cause;
pub mod error;
pub mod event;
pub mod filter;
pub mod jobs;
pub mod logging;
pub mod normalize;
pub mod scheduler;
pub mod signature;
pub mod trigger;

use axum::{Router, routing};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::build::BuildStore;
use crate::error::{BridgeError, Result};
use crate::filter::BranchFilterSpec;
use crate::jobs::JobRegistry;
use crate::scheduler::BuildScheduler;

pub const DEFAULT_WEBHOOK_ROOT: &str = "coding";
pub const DEFAULT_MAX_BUILDS: usize = 50;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    /// First path segment of webhook URLs, `/<webhook_root>/<job path>`.
    pub webhook_root: String,
    pub max_builds: usize,
    pub log_dir: Option<PathBuf>,
    pub log_max_files: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            webhook_root: DEFAULT_WEBHOOK_ROOT.to_string(),
            max_builds: DEFAULT_MAX_BUILDS,
            log_dir: None,
            log_max_files: logging::DEFAULT_MAX_LOG_FILES,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobConfig {
    pub path: String,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default = "default_true")]
    pub trigger_on_push: bool,
    #[serde(default = "default_true")]
    pub trigger_on_merge_request: bool,
    #[serde(default)]
    pub merge_request_actions: ActionList,
    #[serde(default = "default_true")]
    pub ci_skip: bool,
    #[serde(default)]
    pub quiet_period_secs: u64,
    pub command: Option<String>,
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub branch_filter: BranchFilterSpec,
}

fn default_true() -> bool {
    true
}

/// Merge request actions, written either as a TOML list or as one string.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum ActionList {
    List(Vec<String>),
    /// Comma, newline or space separated.
    Text(String),
}

impl Default for ActionList {
    fn default() -> Self {
        ActionList::List(Vec::new())
    }
}

impl ActionList {
    pub fn to_set(&self) -> BTreeSet<String> {
        let split = |s: &str| -> Vec<String> {
            s.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|a| !a.is_empty())
                .map(String::from)
                .collect()
        };
        match self {
            ActionList::List(items) => items.iter().flat_map(|i| split(i)).collect(),
            ActionList::Text(text) => split(text).into_iter().collect(),
        }
    }
}

/// Parse a configuration document
pub fn parse_config(contents: &str) -> Result<BridgeConfig> {
    let config: BridgeConfig = toml::from_str(contents)?;
    if config.server.webhook_root.trim_matches('/').is_empty() {
        return Err(BridgeError::ConfigError(
            "server.webhook_root must not be empty".to_string(),
        ));
    }
    Ok(config)
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<BridgeConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        BridgeError::ConfigError(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    parse_config(&contents).map_err(|e| match e {
        BridgeError::TomlParseError(e) => {
            BridgeError::ConfigError(format!("Failed to parse config file {:?}: {}", path, e))
        }
        other => other,
    })
}

pub struct AppState {
    pub config: BridgeConfig,
    pub jobs: JobRegistry,
    pub scheduler: Arc<dyn BuildScheduler>,
    pub builds: Arc<Mutex<BuildStore>>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Builds the job registry, failing on any invalid job definition.
    pub fn new(
        config: BridgeConfig,
        builds: Arc<Mutex<BuildStore>>,
        scheduler: Arc<dyn BuildScheduler>,
    ) -> Result<Self> {
        let jobs = JobRegistry::from_config(&config.jobs)?;
        Ok(Self {
            config,
            jobs,
            scheduler,
            builds,
            start_time: Instant::now(),
            started_at: Utc::now(),
        })
    }
}

pub type SharedState = Arc<AppState>;

pub fn create_router(state: SharedState) -> Router {
    let webhook_route = format!(
        "/{}/{{*job_path}}",
        state.config.server.webhook_root.trim_matches('/')
    );

    Router::new()
        .route("/", routing::get(api::root))
        .route("/status", routing::get(api::status))
        .route("/builds/{id}", routing::get(api::get_build))
        .route(&webhook_route, routing::any(api::handle_webhook))
        .layer(CatchPanicLayer::custom(api::handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
