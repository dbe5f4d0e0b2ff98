//! v2 webhook payloads.
//!
//! The event name comes from the `X-Coding-Event` header and selects a typed
//! payload; the HMAC signature comes from `X-Coding-Signature`.

use axum::http::HeaderMap;
use serde::Deserialize;

use super::{EVENT_HEADER, LooseId, ParseErrorKind, SIGNATURE_HEADER, header_value};
use crate::event::{
    CanonicalEvent, Commit, EventPayload, Identity, MergeRequestData, PushData, Repository,
    SchemaVersion, project_path,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum V2Event {
    Push,
    MergeRequest,
    PullRequest,
}

impl V2Event {
    /// Maps the header value; the platform sends `merge request` with a space.
    fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "push" => Some(V2Event::Push),
            "merge request" | "merge_request" => Some(V2Event::MergeRequest),
            "pull request" | "pull_request" => Some(V2Event::PullRequest),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct V2User {
    login: Option<String>,
    global_key: Option<String>,
    name: Option<String>,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct V2Repository {
    id: Option<LooseId>,
    name: Option<String>,
    ssh_url: Option<String>,
    clone_url: Option<String>,
    https_url: Option<String>,
    html_url: Option<String>,
    web_url: Option<String>,
    owner: Option<V2User>,
}

#[derive(Debug, Deserialize)]
struct V2Person {
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct V2Commit {
    id: Option<String>,
    sha: Option<String>,
    message: Option<String>,
    committer: Option<V2Person>,
    author: Option<V2Person>,
}

#[derive(Debug, Deserialize)]
struct V2Push {
    #[serde(rename = "ref")]
    ref_name: Option<String>,
    before: Option<String>,
    after: Option<String>,
    commits: Option<Vec<V2Commit>>,
    repository: Option<V2Repository>,
    sender: Option<V2User>,
}

#[derive(Debug, Deserialize)]
struct V2Ref {
    #[serde(rename = "ref")]
    ref_name: Option<String>,
    repo: Option<V2Repository>,
}

#[derive(Debug, Deserialize)]
struct V2MergeRequest {
    id: Option<u64>,
    number: Option<u64>,
    title: Option<String>,
    body: Option<String>,
    merge_commit_sha: Option<String>,
    state: Option<String>,
    action: Option<String>,
    html_url: Option<String>,
    user: Option<V2User>,
    base: Option<V2Ref>,
    head: Option<V2Ref>,
    target_branch: Option<String>,
    source_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct V2MergeRequestEvent {
    action: Option<String>,
    number: Option<u64>,
    merge_request: Option<V2MergeRequest>,
    pull_request: Option<V2MergeRequest>,
    repository: Option<V2Repository>,
    sender: Option<V2User>,
}

pub(super) fn parse(raw_body: &[u8], headers: &HeaderMap) -> Result<CanonicalEvent, ParseErrorKind> {
    let event_name = header_value(headers, EVENT_HEADER).ok_or(ParseErrorKind::MissingEventHeader)?;
    let event = V2Event::from_header(event_name)
        .ok_or_else(|| ParseErrorKind::UnsupportedEvent(event_name.to_string()))?;
    let signature_token = header_value(headers, SIGNATURE_HEADER)
        .unwrap_or_default()
        .to_string();

    let (payload, sender, repository) = match event {
        V2Event::Push => parse_push(raw_body)?,
        V2Event::MergeRequest | V2Event::PullRequest => {
            parse_merge_request(raw_body, event == V2Event::PullRequest)?
        }
    };

    Ok(CanonicalEvent {
        schema_version: SchemaVersion::V2,
        delivery_id: None,
        sender,
        repository,
        payload,
        raw_body: raw_body.to_vec(),
        signature_token,
    })
}

fn parse_push(raw_body: &[u8]) -> Result<(EventPayload, Identity, Repository), ParseErrorKind> {
    let push: V2Push = serde_json::from_slice(raw_body)?;
    let ref_name = push.ref_name.ok_or(ParseErrorKind::Incomplete {
        event: "push",
        field: "ref",
    })?;

    let data = PushData {
        ref_name,
        before: push.before.unwrap_or_default(),
        after: push.after.unwrap_or_default(),
        commits: push
            .commits
            .unwrap_or_default()
            .into_iter()
            .map(to_commit)
            .collect(),
    };

    Ok((
        EventPayload::Push(data),
        push.sender.map(to_identity).unwrap_or_default(),
        push.repository.map(to_repository).unwrap_or_default(),
    ))
}

fn parse_merge_request(
    raw_body: &[u8],
    pull_request: bool,
) -> Result<(EventPayload, Identity, Repository), ParseErrorKind> {
    let hook: V2MergeRequestEvent = serde_json::from_slice(raw_body)?;
    let event_name = if pull_request { "pull_request" } else { "merge_request" };
    let mr = hook.merge_request.or(hook.pull_request).ok_or(ParseErrorKind::Incomplete {
        event: event_name,
        field: "merge_request",
    })?;

    let target_ref = mr
        .base
        .as_ref()
        .and_then(|b| b.ref_name.clone())
        .or(mr.target_branch)
        .unwrap_or_default();
    let (source_ref, source_repo) = match mr.head {
        Some(head) => (head.ref_name, head.repo),
        None => (None, None),
    };
    let source_ref = source_ref.or(mr.source_branch).unwrap_or_default();

    let data = MergeRequestData {
        id: mr.id,
        iid: mr.number.or(hook.number),
        title: mr.title.unwrap_or_default(),
        body: mr.body,
        action: hook.action.or(mr.action).unwrap_or_default(),
        state: mr.state,
        merge_commit_sha: mr.merge_commit_sha.filter(|sha| !sha.is_empty()),
        source_ref,
        target_ref,
        web_url: mr.html_url,
        source_repository: if pull_request {
            source_repo.map(to_repository)
        } else {
            None
        },
        author: mr.user.map(to_identity),
    };

    let sender = hook
        .sender
        .map(to_identity)
        .or_else(|| data.author.clone())
        .unwrap_or_default();
    let repository = hook.repository.map(to_repository).unwrap_or_default();
    let payload = if pull_request {
        EventPayload::PullRequest(data)
    } else {
        EventPayload::MergeRequest(data)
    };
    Ok((payload, sender, repository))
}

fn to_identity(user: V2User) -> Identity {
    Identity {
        display_name: user.name,
        login_id: user.login.or(user.global_key),
        profile_url: user.html_url,
    }
}

fn to_repository(repo: V2Repository) -> Repository {
    let web_url = repo.html_url.or(repo.web_url);
    let project_path = web_url.as_deref().map(project_path).unwrap_or_default();
    Repository {
        id: repo.id.map(LooseId::into_string),
        name: repo.name,
        ssh_url: repo.ssh_url,
        https_url: repo.clone_url.or(repo.https_url),
        web_url,
        owner_login_id: repo.owner.and_then(|o| o.login.or(o.global_key)),
        project_path,
    }
}

fn to_commit(commit: V2Commit) -> Commit {
    let (author_name, author_email) = commit
        .committer
        .or(commit.author)
        .map(|c| (c.name, c.email))
        .unwrap_or_default();
    Commit {
        sha: commit.id.or(commit.sha).unwrap_or_default(),
        message: commit.message,
        author_name,
        author_email,
    }
}
