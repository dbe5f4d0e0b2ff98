//! Canonical webhook event model
//!
//! Both wire formats are normalized into [`CanonicalEvent`]; everything past the
//! parsing boundary (verification, trigger decision, build cause) only sees this type.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// Kind of event that reached the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Push,
    MergeRequest,
    PullRequest,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Push => "push",
            EventType::MergeRequest => "merge_request",
            EventType::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire format generation that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    /// Legacy format: event inferred from body shape, shared token in the body.
    V1,
    /// Header-discriminated format signed with HMAC-SHA1.
    V2,
}

impl SchemaVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::V1 => "v1",
            SchemaVersion::V2 => "v2",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "v1" => Some(SchemaVersion::V1),
            "v2" => Some(SchemaVersion::V2),
            _ => None,
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user as seen by the webhook sender.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub display_name: Option<String>,
    pub login_id: Option<String>,
    pub profile_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub id: Option<String>,
    pub name: Option<String>,
    pub ssh_url: Option<String>,
    pub https_url: Option<String>,
    pub web_url: Option<String>,
    pub owner_login_id: Option<String>,
    /// `owner/project`, derived from `web_url`; empty when the URL has no known shape.
    pub project_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Commit {
    pub sha: String,
    pub message: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushData {
    pub ref_name: String,
    pub before: String,
    pub after: String,
    /// Oldest first, as delivered.
    pub commits: Vec<Commit>,
}

impl PushData {
    /// A push whose `after` is missing or the null object id deletes the branch.
    pub fn is_branch_deletion(&self) -> bool {
        self.after.is_empty() || is_null_sha(&self.after)
    }

    pub fn last_commit(&self) -> Option<&Commit> {
        self.commits.last()
    }
}

/// Merge request or pull request data.
///
/// A pull request is a merge request whose source branch may live in another
/// repository, so it only differs by `source_repository`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeRequestData {
    pub id: Option<u64>,
    pub iid: Option<u64>,
    pub title: String,
    pub body: Option<String>,
    pub action: String,
    pub state: Option<String>,
    pub merge_commit_sha: Option<String>,
    pub source_ref: String,
    pub target_ref: String,
    pub web_url: Option<String>,
    pub source_repository: Option<Repository>,
    pub author: Option<Identity>,
}

/// Event-specific payload. The variant fixes the event type, so a push can never
/// carry merge request data and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Push(PushData),
    MergeRequest(MergeRequestData),
    PullRequest(MergeRequestData),
}

/// Normalized representation of one inbound delivery. Built once per request and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    pub schema_version: SchemaVersion,
    pub delivery_id: Option<String>,
    pub sender: Identity,
    pub repository: Repository,
    pub payload: EventPayload,
    /// Exact bytes received; the HMAC is computed over these.
    pub raw_body: Vec<u8>,
    /// Token (v1) or signature header value (v2). Empty when none was presented.
    pub signature_token: String,
}

impl CanonicalEvent {
    pub fn event_type(&self) -> EventType {
        match self.payload {
            EventPayload::Push(_) => EventType::Push,
            EventPayload::MergeRequest(_) => EventType::MergeRequest,
            EventPayload::PullRequest(_) => EventType::PullRequest,
        }
    }

    pub fn push(&self) -> Option<&PushData> {
        match &self.payload {
            EventPayload::Push(push) => Some(push),
            _ => None,
        }
    }

    pub fn merge_request(&self) -> Option<&MergeRequestData> {
        match &self.payload {
            EventPayload::MergeRequest(mr) | EventPayload::PullRequest(mr) => Some(mr),
            EventPayload::Push(_) => None,
        }
    }
}

/// True for a non-empty object id made only of zeros.
pub fn is_null_sha(sha: &str) -> bool {
    !sha.is_empty() && sha.bytes().all(|b| b == b'0')
}

/// Strips the ref namespace, `refs/heads/main` => `main`.
pub fn shorten_ref(ref_name: &str) -> &str {
    ["refs/heads/", "refs/tags/", "refs/remotes/"]
        .iter()
        .find_map(|prefix| ref_name.strip_prefix(prefix))
        .unwrap_or(ref_name)
}

static PROFESSIONAL_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^/]+/[ut]/([^/]+)/p/([^/]+).*$").expect("valid project url regex")
});

static ENTERPRISE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://([^./]+)\.[^/]+/p/([^/]+).*$").expect("valid enterprise url regex")
});

/// Derives `owner/project` from a repository web URL.
///
/// Supports `https://host/u/<owner>/p/<project>` (also `/t/` for teams) and the
/// enterprise form `https://<team>.host/p/<project>`. Returns an empty string for
/// anything else.
pub fn project_path(web_url: &str) -> String {
    [&*PROFESSIONAL_URL, &*ENTERPRISE_URL]
        .iter()
        .find_map(|re| {
            re.captures(web_url)
                .map(|caps| format!("{}/{}", &caps[1], &caps[2]))
        })
        .unwrap_or_default()
}
