//! Shared helpers for the HTTP tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use coding_ci_trigger::build::BuildStore;
use coding_ci_trigger::jobs::Job;
use coding_ci_trigger::scheduler::{
    BuildRequest, BuildScheduler, Principal, ScheduledBuild, SchedulerError,
};
use coding_ci_trigger::{AppState, create_router, parse_config};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tower::ServiceExt;

pub const SECRET: &str = "s3cret";

/// One call to [`RecordingScheduler::schedule`].
#[derive(Debug)]
pub struct ScheduleCall {
    pub principal: Principal,
    pub job_path: String,
    pub request: BuildRequest,
}

/// Test double that forwards every schedule call to a channel.
pub struct RecordingScheduler {
    calls: mpsc::UnboundedSender<ScheduleCall>,
}

#[async_trait]
impl BuildScheduler for RecordingScheduler {
    async fn schedule(
        &self,
        principal: &Principal,
        job: Arc<Job>,
        request: BuildRequest,
    ) -> Result<ScheduledBuild, SchedulerError> {
        let _ = self.calls.send(ScheduleCall {
            principal: principal.clone(),
            job_path: job.path.clone(),
            request,
        });
        Ok(ScheduledBuild {
            build_id: "recorded".to_string(),
            coalesced: false,
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub calls: mpsc::UnboundedReceiver<ScheduleCall>,
    pub builds: Arc<Mutex<BuildStore>>,
}

impl TestApp {
    pub fn new(config: &str) -> Self {
        let config = parse_config(config).expect("test config parses");
        let (tx, rx) = mpsc::unbounded_channel();
        let builds = Arc::new(Mutex::new(BuildStore::new(10)));
        let scheduler = Arc::new(RecordingScheduler { calls: tx });
        let state = AppState::new(config, Arc::clone(&builds), scheduler)
            .expect("test jobs are valid");
        Self {
            router: create_router(Arc::new(state)),
            calls: rx,
            builds,
        }
    }

    /// A `webapp` job with [`SECRET`] and a `team/backend/api` job without one.
    pub fn standard() -> Self {
        Self::new(&format!(
            r#"
            [[job]]
            path = "webapp"
            webhook_secret = "{SECRET}"

            [[job]]
            path = "team/backend/api"
            merge_request_actions = "create, synchronize"

            [job.branch_filter]
            mode = "include_exclude"
            include = "main"
            "#
        ))
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Waits briefly for the spawned scheduler hand-off.
    pub async fn next_call(&mut self) -> Option<ScheduleCall> {
        tokio::time::timeout(Duration::from_secs(2), self.calls.recv())
            .await
            .ok()
            .flatten()
    }

    /// True if no schedule call arrives within a short grace period.
    pub async fn no_call(&mut self) -> bool {
        tokio::time::timeout(Duration::from_millis(200), self.calls.recv())
            .await
            .is_err()
    }
}

pub fn v2_request(uri: &str, event: &str, body: &str, signature: Option<&str>) -> Request<Body> {
    with_event_headers(uri, event, body, signature, Some("v2"))
}

/// A v2 delivery that leaves the schema version to be implied by the delivery header.
pub fn unversioned_request(uri: &str, event: &str, body: &str, signature: &str) -> Request<Body> {
    with_event_headers(uri, event, body, Some(signature), None)
}

fn with_event_headers(
    uri: &str,
    event: &str,
    body: &str,
    signature: Option<&str>,
    version: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("X-Coding-Event", event)
        .header("X-Coding-Delivery", "delivery-1");
    if let Some(version) = version {
        builder = builder.header("X-Coding-WebHook-Version", version);
    }
    if let Some(signature) = signature {
        builder = builder.header("X-Coding-Signature", signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn legacy_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
