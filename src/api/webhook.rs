//! Webhook handler for Coding push and merge request events

use axum::{
    body::Bytes,
    extract::{Path, State as AxumState},
    http::{HeaderMap, Method, StatusCode},
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::normalize::{self, EVENT_HEADER, header_value};
use crate::scheduler::{BuildRequest, Principal};
use crate::signature;
use crate::trigger::{self, Outcome};

const PING_EVENT: &str = "ping";

/// Handles any request under `/<webhook root>/<job path>`.
///
/// Only POST deliveries are processed. The response only ever carries a status and
/// a generic message; the reasons behind a rejection go to the logs.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    method: Method,
    Path(job_path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let Some(job) = state.jobs.resolve(&job_path) else {
        info!("No job found for webhook path '{}'", job_path);
        return (StatusCode::NOT_FOUND, "Job not found");
    };

    if method == Method::GET {
        return (
            StatusCode::BAD_REQUEST,
            "This URL receives Coding webhooks and is not meant for browser visits",
        );
    }
    if method != Method::POST {
        info!("Ignoring {} request for job '{}'", method, job.path);
        return (StatusCode::NO_CONTENT, "");
    }

    if header_value(&headers, EVENT_HEADER) == Some(PING_EVENT) {
        info!("Received ping for job '{}'", job.path);
        return (StatusCode::OK, "OK");
    }

    let event = match normalize::normalize(&body, &headers) {
        Ok(event) => event,
        Err(e) if e.is_ignorable() => {
            info!("Ignoring delivery for job '{}': {}", job.path, e);
            return (StatusCode::OK, "OK");
        }
        Err(e) => {
            warn!(
                "Could not parse webhook for job '{}': {}\nPayload: {}",
                job.path, e, e.body
            );
            return (StatusCode::BAD_REQUEST, "Invalid webhook payload");
        }
    };

    let delivery = event.delivery_id.as_deref().unwrap_or("-");
    if !signature::verify(&event, &job.trigger.webhook_secret) {
        info!(
            "Signature verification failed for job '{}' (delivery {}, schema {})",
            job.path, delivery, event.schema_version
        );
        return (StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    let decision = trigger::decide(&event, &job.trigger);
    debug!(
        "Decision for job '{}' (delivery {}): {:?}",
        job.path, delivery, decision.outcome
    );

    match &decision.outcome {
        Outcome::Build => {}
        Outcome::Rejected(reason) => {
            info!(
                "Not building job '{}' for {} event (delivery {}): {}",
                job.path, decision.action_type, delivery, reason
            );
            return (StatusCode::OK, "OK");
        }
        Outcome::NoRevision => {
            warn!(
                "Could not resolve a revision to build for job '{}' from {} event (delivery {})",
                job.path, decision.action_type, delivery
            );
            return (StatusCode::OK, "OK");
        }
    }

    let Some(revision) = decision.revision_to_build else {
        warn!("Build decision for job '{}' has no revision", job.path);
        return (StatusCode::OK, "OK");
    };
    let request = BuildRequest {
        revision,
        branch: decision.branch,
        cause: decision.cause,
    };

    info!(
        "Scheduling build of job '{}' at {} ({})",
        job.path,
        request.revision,
        request.cause.short_description()
    );

    // Acknowledge right away; quiet periods and queueing are the scheduler's business.
    let scheduler = Arc::clone(&state.scheduler);
    tokio::spawn(async move {
        let job_path = job.path.clone();
        match scheduler.schedule(&Principal::System, job, request).await {
            Ok(scheduled) => debug!(
                "Job '{}' build {} scheduled (coalesced: {})",
                job_path, scheduled.build_id, scheduled.coalesced
            ),
            Err(e) => error!("Failed to schedule build of job '{}': {}", job_path, e),
        }
    });

    (StatusCode::OK, "OK")
}
