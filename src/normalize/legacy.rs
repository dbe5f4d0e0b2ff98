//! Legacy (v1) webhook payloads.
//!
//! The event type travels in the body: an `event` field when present, otherwise it
//! is inferred from which nested object the payload carries. The shared secret is
//! the body's `token` field.

use serde::Deserialize;

use super::{LooseId, ParseErrorKind};
use crate::event::{
    CanonicalEvent, Commit, EventPayload, Identity, MergeRequestData, PushData, Repository,
    SchemaVersion, project_path,
};

#[derive(Debug, Deserialize)]
struct LegacyHook {
    event: Option<String>,
    token: Option<String>,
    #[serde(rename = "ref")]
    ref_name: Option<String>,
    before: Option<String>,
    after: Option<String>,
    commits: Option<Vec<LegacyCommit>>,
    repository: Option<LegacyRepository>,
    user: Option<LegacyUser>,
    merge_request: Option<LegacyMergeRequest>,
    pull_request: Option<LegacyMergeRequest>,
}

#[derive(Debug, Deserialize)]
struct LegacyUser {
    name: Option<String>,
    global_key: Option<String>,
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyRepository {
    project_id: Option<LooseId>,
    name: Option<String>,
    ssh_url: Option<String>,
    https_url: Option<String>,
    web_url: Option<String>,
    owner: Option<LegacyUser>,
}

#[derive(Debug, Deserialize)]
struct LegacyCommit {
    sha: Option<String>,
    short_message: Option<String>,
    committer: Option<LegacyCommitter>,
}

#[derive(Debug, Deserialize)]
struct LegacyCommitter {
    name: Option<String>,
    email: Option<String>,
}

/// Merge requests and pull requests share one shape; only pull requests carry
/// `source_repository`.
#[derive(Debug, Deserialize)]
struct LegacyMergeRequest {
    id: Option<u64>,
    number: Option<u64>,
    title: Option<String>,
    body: Option<String>,
    merge_commit_sha: Option<String>,
    status: Option<String>,
    action: Option<String>,
    target_branch: Option<String>,
    source_branch: Option<String>,
    web_url: Option<String>,
    user: Option<LegacyUser>,
    source_repository: Option<LegacyRepository>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyEvent {
    Push,
    MergeRequest,
    PullRequest,
}

impl LegacyHook {
    fn event(&self) -> Result<LegacyEvent, ParseErrorKind> {
        match self.event.as_deref().map(str::trim) {
            Some("push") => Ok(LegacyEvent::Push),
            Some("merge_request") | Some("merge request") => Ok(LegacyEvent::MergeRequest),
            Some("pull_request") | Some("pull request") => Ok(LegacyEvent::PullRequest),
            Some(other) if !other.is_empty() => Err(ParseErrorKind::UnsupportedEvent(other.to_string())),
            _ => self.infer_event(),
        }
    }

    fn infer_event(&self) -> Result<LegacyEvent, ParseErrorKind> {
        if self.merge_request.is_some() {
            Ok(LegacyEvent::MergeRequest)
        } else if self.pull_request.is_some() {
            Ok(LegacyEvent::PullRequest)
        } else if self.ref_name.is_some() {
            Ok(LegacyEvent::Push)
        } else {
            Err(ParseErrorKind::UnsupportedEvent("unknown".to_string()))
        }
    }
}

pub(super) fn parse(raw_body: &[u8]) -> Result<CanonicalEvent, ParseErrorKind> {
    let hook: LegacyHook = serde_json::from_slice(raw_body)?;
    let event = hook.event()?;
    let repository = hook.repository.map(to_repository).unwrap_or_default();
    let sender = hook.user.map(to_identity);

    let (payload, sender) = match event {
        LegacyEvent::Push => {
            let ref_name = hook.ref_name.ok_or(ParseErrorKind::Incomplete {
                event: "push",
                field: "ref",
            })?;
            let push = PushData {
                ref_name,
                before: hook.before.unwrap_or_default(),
                after: hook.after.unwrap_or_default(),
                commits: hook
                    .commits
                    .unwrap_or_default()
                    .into_iter()
                    .map(to_commit)
                    .collect(),
            };
            (EventPayload::Push(push), sender.unwrap_or_default())
        }
        LegacyEvent::MergeRequest => {
            let mr = hook.merge_request.ok_or(ParseErrorKind::Incomplete {
                event: "merge_request",
                field: "merge_request",
            })?;
            let mr = to_merge_request(mr, false);
            let sender = sender.or_else(|| mr.author.clone()).unwrap_or_default();
            (EventPayload::MergeRequest(mr), sender)
        }
        LegacyEvent::PullRequest => {
            let pr = hook.pull_request.ok_or(ParseErrorKind::Incomplete {
                event: "pull_request",
                field: "pull_request",
            })?;
            let pr = to_merge_request(pr, true);
            let sender = sender.or_else(|| pr.author.clone()).unwrap_or_default();
            (EventPayload::PullRequest(pr), sender)
        }
    };

    Ok(CanonicalEvent {
        schema_version: SchemaVersion::V1,
        delivery_id: None,
        sender,
        repository,
        payload,
        raw_body: raw_body.to_vec(),
        signature_token: hook.token.unwrap_or_default(),
    })
}

fn to_identity(user: LegacyUser) -> Identity {
    Identity {
        display_name: user.name,
        login_id: user.global_key,
        profile_url: user.web_url,
    }
}

fn to_repository(repo: LegacyRepository) -> Repository {
    let project_path = repo.web_url.as_deref().map(project_path).unwrap_or_default();
    Repository {
        id: repo.project_id.map(LooseId::into_string),
        name: repo.name,
        ssh_url: repo.ssh_url,
        https_url: repo.https_url,
        web_url: repo.web_url,
        owner_login_id: repo.owner.and_then(|o| o.global_key),
        project_path,
    }
}

fn to_commit(commit: LegacyCommit) -> Commit {
    let (author_name, author_email) = commit
        .committer
        .map(|c| (c.name, c.email))
        .unwrap_or_default();
    Commit {
        sha: commit.sha.unwrap_or_default(),
        message: commit.short_message,
        author_name,
        author_email,
    }
}

fn to_merge_request(mr: LegacyMergeRequest, cross_repository: bool) -> MergeRequestData {
    let source_repository = if cross_repository {
        mr.source_repository.map(to_repository)
    } else {
        None
    };
    MergeRequestData {
        id: mr.id,
        iid: mr.number,
        title: mr.title.unwrap_or_default(),
        body: mr.body,
        action: mr.action.unwrap_or_default(),
        state: mr.status,
        merge_commit_sha: mr.merge_commit_sha.filter(|sha| !sha.is_empty()),
        source_ref: mr.source_branch.unwrap_or_default(),
        target_ref: mr.target_branch.unwrap_or_default(),
        web_url: mr.web_url,
        source_repository,
        author: mr.user.map(to_identity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;

    const REPOSITORY: &str = r#"{
        "project_id": 1024,
        "name": "webapp",
        "ssh_url": "git@git.coding.net:alice/webapp.git",
        "https_url": "https://git.coding.net/alice/webapp.git",
        "web_url": "https://coding.net/u/alice/p/webapp",
        "owner": {"global_key": "alice", "name": "Alice"}
    }"#;

    #[test]
    fn parses_push_with_explicit_event() {
        let body = format!(
            r#"{{
                "event": "push",
                "token": "s3cret",
                "ref": "refs/heads/main",
                "before": "aaa",
                "after": "bbb",
                "commits": [
                    {{"sha": "b1", "short_message": "first", "committer": {{"name": "Alice", "email": "a@x"}}}},
                    {{"sha": "bbb", "short_message": "second"}}
                ],
                "repository": {REPOSITORY},
                "user": {{"global_key": "alice", "name": "Alice", "web_url": "https://coding.net/u/alice"}}
            }}"#
        );
        let event = parse(body.as_bytes()).unwrap();
        assert_eq!(event.event_type(), EventType::Push);
        assert_eq!(event.schema_version, SchemaVersion::V1);
        assert_eq!(event.signature_token, "s3cret");
        assert_eq!(event.sender.login_id.as_deref(), Some("alice"));
        assert_eq!(event.repository.id.as_deref(), Some("1024"));
        assert_eq!(event.repository.project_path, "alice/webapp");
        assert_eq!(event.repository.owner_login_id.as_deref(), Some("alice"));

        let push = event.push().unwrap();
        assert_eq!(push.ref_name, "refs/heads/main");
        assert_eq!(push.commits.len(), 2);
        assert_eq!(push.last_commit().unwrap().sha, "bbb");
        assert_eq!(push.commits[0].author_email.as_deref(), Some("a@x"));
        assert_eq!(event.raw_body, body.as_bytes());
    }

    #[test]
    fn infers_merge_request_from_shape() {
        let body = format!(
            r#"{{
                "token": "t",
                "repository": {REPOSITORY},
                "merge_request": {{
                    "id": 7, "number": 3, "title": "Add login", "body": "details",
                    "action": "synchronize", "status": "open",
                    "merge_commit_sha": "m3rge",
                    "source_branch": "feature/login", "target_branch": "main",
                    "web_url": "https://coding.net/u/alice/p/webapp/git/merge/3",
                    "user": {{"global_key": "bob", "name": "Bob"}}
                }}
            }}"#
        );
        let event = parse(body.as_bytes()).unwrap();
        assert_eq!(event.event_type(), EventType::MergeRequest);
        let mr = event.merge_request().unwrap();
        assert_eq!(mr.action, "synchronize");
        assert_eq!(mr.iid, Some(3));
        assert_eq!(mr.target_ref, "main");
        assert_eq!(mr.merge_commit_sha.as_deref(), Some("m3rge"));
        assert!(mr.source_repository.is_none());
        // no top-level user: the author stands in as sender
        assert_eq!(event.sender.login_id.as_deref(), Some("bob"));
    }

    #[test]
    fn pull_request_keeps_source_repository() {
        let body = format!(
            r#"{{
                "event": "pull_request",
                "repository": {REPOSITORY},
                "pull_request": {{
                    "id": 9, "number": 4, "title": "Fork fix", "action": "create",
                    "merge_commit_sha": "pr123",
                    "source_branch": "fix", "target_branch": "main",
                    "source_repository": {{
                        "name": "webapp",
                        "ssh_url": "git@git.coding.net:carol/webapp.git",
                        "web_url": "https://coding.net/u/carol/p/webapp",
                        "owner": {{"global_key": "carol"}}
                    }}
                }}
            }}"#
        );
        let event = parse(body.as_bytes()).unwrap();
        assert_eq!(event.event_type(), EventType::PullRequest);
        let source = event.merge_request().unwrap().source_repository.as_ref().unwrap();
        assert_eq!(source.owner_login_id.as_deref(), Some("carol"));
        assert_eq!(source.project_path, "carol/webapp");
    }

    #[test]
    fn merge_request_event_without_object_is_incomplete() {
        let body = br#"{"event": "merge_request", "token": "t"}"#;
        let err = parse(body).unwrap_err();
        assert!(matches!(
            err,
            ParseErrorKind::Incomplete { field: "merge_request", .. }
        ));
    }

    #[test]
    fn unknown_event_is_unsupported() {
        let err = parse(br#"{"event": "ping"}"#).unwrap_err();
        assert!(matches!(err, ParseErrorKind::UnsupportedEvent(name) if name == "ping"));

        let err = parse(br#"{"zen": "keep it simple"}"#).unwrap_err();
        assert!(matches!(err, ParseErrorKind::UnsupportedEvent(_)));
    }

    #[test]
    fn missing_token_is_empty() {
        let event = parse(br#"{"ref": "refs/heads/dev", "after": "abc"}"#).unwrap();
        assert_eq!(event.signature_token, "");
        assert_eq!(event.repository, Repository::default());
    }
}
