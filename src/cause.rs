//! Build cause metadata
//!
//! Everything a build description or the build environment needs, derived from a
//! [`CanonicalEvent`]. Never carries the webhook token.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::event::{CanonicalEvent, EventPayload, EventType, shorten_ref};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildCause {
    pub action_type: EventType,
    pub user_login: Option<String>,
    pub user_name: Option<String>,
    pub user_url: Option<String>,
    pub repo_url: Option<String>,
    pub repo_https_url: Option<String>,
    pub repo_web_url: Option<String>,
    pub project_path: Option<String>,
    pub ref_name: Option<String>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub commit_sha: Option<String>,
    pub merge_request_id: Option<u64>,
    pub merge_request_iid: Option<u64>,
    pub merge_request_title: Option<String>,
    pub merge_request_body: Option<String>,
    pub merge_request_url: Option<String>,
    pub source_branch: Option<String>,
    pub target_branch: Option<String>,
    pub source_repo_url: Option<String>,
    pub source_project_path: Option<String>,
    pub source_user: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl BuildCause {
    /// Builds the metadata for `event`; `revision` is the resolved revision, if any.
    pub fn from_event(event: &CanonicalEvent, revision: Option<&str>) -> Self {
        let repo = &event.repository;
        let mut cause = BuildCause {
            action_type: event.event_type(),
            user_login: event.sender.login_id.clone(),
            user_name: event.sender.display_name.clone(),
            user_url: event.sender.profile_url.clone(),
            repo_url: repo.ssh_url.clone(),
            repo_https_url: repo.https_url.clone(),
            repo_web_url: repo.web_url.clone(),
            project_path: non_empty(&repo.project_path),
            ref_name: None,
            before: None,
            after: None,
            commit_sha: revision.map(String::from),
            merge_request_id: None,
            merge_request_iid: None,
            merge_request_title: None,
            merge_request_body: None,
            merge_request_url: None,
            source_branch: None,
            target_branch: None,
            source_repo_url: None,
            source_project_path: None,
            source_user: None,
        };

        match &event.payload {
            EventPayload::Push(push) => {
                cause.ref_name = non_empty(&push.ref_name);
                cause.before = non_empty(&push.before);
                cause.after = non_empty(&push.after);
                if cause.commit_sha.is_none() {
                    cause.commit_sha = cause.after.clone();
                }
            }
            EventPayload::MergeRequest(mr) | EventPayload::PullRequest(mr) => {
                cause.merge_request_id = mr.id;
                cause.merge_request_iid = mr.iid;
                cause.merge_request_title = non_empty(&mr.title);
                cause.merge_request_body = mr.body.clone();
                cause.merge_request_url = mr.web_url.clone();
                cause.source_branch = non_empty(shorten_ref(&mr.source_ref));
                cause.target_branch = non_empty(shorten_ref(&mr.target_ref));
                if let Some(author) = &mr.author {
                    // the author is who the build is for; the sender login stays as a fallback
                    if author.display_name.is_some() {
                        cause.user_name = author.display_name.clone();
                    }
                    if author.profile_url.is_some() {
                        cause.user_url = author.profile_url.clone();
                    }
                    if cause.user_login.is_none() {
                        cause.user_login = author.login_id.clone();
                    }
                }
                if let Some(source) = &mr.source_repository {
                    cause.source_repo_url = source.ssh_url.clone();
                    cause.source_project_path = non_empty(&source.project_path);
                    cause.source_user = source.owner_login_id.clone();
                }
            }
        }
        cause
    }

    /// One-line human description of why the build started.
    pub fn short_description(&self) -> String {
        let user = self.user_name.as_deref().filter(|u| !u.is_empty());
        let iid = self
            .merge_request_iid
            .map(|n| n.to_string())
            .unwrap_or_default();
        let title = self.merge_request_title.as_deref().unwrap_or_default();
        let source = self.source_branch.as_deref().unwrap_or_default();
        let target = self.target_branch.as_deref().unwrap_or_default();

        match self.action_type {
            EventType::Push => match user {
                Some(user) => format!("Started by Coding push by {user}"),
                None => "Started by Coding push".to_string(),
            },
            EventType::MergeRequest => format!(
                "Coding Merge Request #{iid} by {}: {title} ({source} => {target})",
                user.unwrap_or("Unknown")
            ),
            EventType::PullRequest => format!(
                "Coding Pull Request #{iid} by {}: {title} ({}:{source} => {target})",
                user.unwrap_or("Unknown"),
                self.source_user.as_deref().unwrap_or_default()
            ),
        }
    }

    /// Environment variables exported to the build. Values that do not apply to the
    /// action type, or are unknown, are left out.
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                env.insert(key.to_string(), value);
            }
        };

        put("CODING_ACTION_TYPE", Some(self.action_type.as_str().to_string()));
        put("CODING_USER_LOGIN", self.user_login.clone());
        put("CODING_USER_NAME", self.user_name.clone());
        put("CODING_USER_URL", self.user_url.clone());
        put("CODING_REPO_URL", self.repo_url.clone());
        put("CODING_REPO_HTTPS_URL", self.repo_https_url.clone());
        put("CODING_PROJECT_PATH", self.project_path.clone());
        put("CODING_COMMIT_SHA", self.commit_sha.clone());

        match self.action_type {
            EventType::Push => {
                put("WEBHOOK_PUSH_REF", self.ref_name.clone());
                put("WEBHOOK_PUSH_BEFORE", self.before.clone());
                put("WEBHOOK_PUSH_AFTER", self.after.clone());
            }
            EventType::MergeRequest | EventType::PullRequest => {
                put("CODING_MR_ID", self.merge_request_id.map(|n| n.to_string()));
                put("CODING_MR_IID", self.merge_request_iid.map(|n| n.to_string()));
                put("CODING_MR_URL", self.merge_request_url.clone());
                put("CODING_MR_TITLE", self.merge_request_title.clone());
                put("CODING_MR_SOURCE_BRANCH", self.source_branch.clone());
                put("CODING_MR_TARGET_BRANCH", self.target_branch.clone());
                if self.action_type == EventType::PullRequest {
                    put("CODING_PR_SOURCE_REPO_URL", self.source_repo_url.clone());
                    put("CODING_PR_SOURCE_PROJECT_PATH", self.source_project_path.clone());
                }
            }
        }
        env
    }
}
