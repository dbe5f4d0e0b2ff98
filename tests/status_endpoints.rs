//! Tests for the read-only status surface.

mod common;

use axum::{body::Body, http::Request, http::StatusCode};
use coding_ci_trigger::build::Build;
use coding_ci_trigger::cause::BuildCause;
use coding_ci_trigger::event::{CanonicalEvent, EventPayload, PushData, SchemaVersion};
use common::{TestApp, body_text};

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn sample_build(job: &str) -> Build {
    let event = CanonicalEvent {
        schema_version: SchemaVersion::V2,
        delivery_id: None,
        sender: Default::default(),
        repository: Default::default(),
        payload: EventPayload::Push(PushData {
            ref_name: "refs/heads/main".into(),
            before: "aaa".into(),
            after: "bbb".into(),
            commits: Vec::new(),
        }),
        raw_body: Vec::new(),
        signature_token: String::new(),
    };
    let cause = BuildCause::from_event(&event, Some("bbb"));
    Build::new(job, "bbb".into(), Some("main".into()), cause)
}

#[tokio::test]
async fn root_returns_banner() {
    let app = TestApp::standard();
    let response = app.send(get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Coding webhook trigger"));
}

#[tokio::test]
async fn status_lists_jobs_and_builds() {
    // Arrange
    let app = TestApp::standard();
    app.builds.lock().await.add(sample_build("webapp"));

    // Act
    let response = app.send(get("/status")).await;

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["server"]["name"], "coding_ci_trigger");
    assert_eq!(json["config"]["total_jobs"], 2);
    assert_eq!(json["builds"]["queued_count"], 1);
    assert_eq!(json["builds"]["recent"][0]["job_path"], "webapp");
    assert_eq!(json["builds"]["recent"][0]["status"], "queued");
}

#[tokio::test]
async fn status_filters_by_job() {
    let app = TestApp::standard();
    {
        let mut builds = app.builds.lock().await;
        builds.add(sample_build("webapp"));
        builds.add(sample_build("team/backend/api"));
    }

    let response = app.send(get("/status?job=webapp")).await;

    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["builds"]["recent_count"], 1);
    assert_eq!(json["builds"]["recent"][0]["job_path"], "webapp");
}

#[tokio::test]
async fn build_lookup_by_id() {
    let app = TestApp::standard();
    let build = sample_build("webapp");
    let id = build.id.clone();
    app.builds.lock().await.add(build);

    let response = app.send(get(&format!("/builds/{id}"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["id"], id.as_str());
    assert_eq!(json["revision"], "bbb");
    assert_eq!(json["description"], "Started by Coding push");

    let response = app.send(get("/builds/unknown")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn custom_webhook_root() {
    let app = TestApp::new(
        r#"
        [server]
        webhook_root = "hooks"

        [[job]]
        path = "webapp"
        "#,
    );

    let response = app.send(get("/hooks/webapp")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send(get("/coding/webapp")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
