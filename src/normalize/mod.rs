//! Payload normalizer
//!
//! Turns a raw body plus request headers into a [`CanonicalEvent`]. The schema
//! version is picked from the headers first:
//!
//! 1. an explicit `X-Coding-WebHook-Version` header wins;
//! 2. otherwise an `X-Coding-Delivery` header implies v2;
//! 3. otherwise the delivery is legacy (v1).
//!
//! Version-specific field names and event inference stay inside [`legacy`] and [`v2`].

pub mod legacy;
pub mod v2;

use axum::http::HeaderMap;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use thiserror::Error;

use crate::event::{CanonicalEvent, SchemaVersion};

pub const VERSION_HEADER: &str = "x-coding-webhook-version";
pub const DELIVERY_HEADER: &str = "x-coding-delivery";
pub const EVENT_HEADER: &str = "x-coding-event";
pub const SIGNATURE_HEADER: &str = "x-coding-signature";

/// Why a delivery could not be turned into a [`CanonicalEvent`].
#[derive(Debug, Error)]
pub enum ParseErrorKind {
    #[error("unsupported webhook version '{0}'")]
    UnsupportedVersion(String),

    #[error("missing X-Coding-Event header")]
    MissingEventHeader,

    /// Well-formed delivery for an event this bridge does not handle.
    #[error("unsupported event '{0}'")]
    UnsupportedEvent(String),

    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("incomplete {event} payload: missing {field}")]
    Incomplete {
        event: &'static str,
        field: &'static str,
    },
}

static TOKEN_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"("token"\s*:\s*)"(?:[^"\\]|\\.)*""#).expect("valid token field regex")
});

/// Masks every `"token": "..."` value so legacy shared secrets stay out of logs.
pub fn redact_body(raw_body: &[u8]) -> String {
    let body = String::from_utf8_lossy(raw_body);
    TOKEN_FIELD.replace_all(&body, r#"${1}"[REDACTED]""#).into_owned()
}

/// Parse failure with the offending body kept for diagnostics, tokens masked.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub body: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, raw_body: &[u8]) -> Self {
        Self {
            kind,
            body: redact_body(raw_body),
        }
    }

    /// Unsupported events are acknowledged, not rejected.
    pub fn is_ignorable(&self) -> bool {
        matches!(self.kind, ParseErrorKind::UnsupportedEvent(_))
    }
}

/// Returns a header value, treating empty values as absent.
pub(crate) fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Picks the wire format for a delivery.
pub fn select_version(headers: &HeaderMap) -> Result<SchemaVersion, ParseErrorKind> {
    if let Some(version) = header_value(headers, VERSION_HEADER) {
        return SchemaVersion::parse(version)
            .ok_or_else(|| ParseErrorKind::UnsupportedVersion(version.to_string()));
    }
    if header_value(headers, DELIVERY_HEADER).is_some() {
        return Ok(SchemaVersion::V2);
    }
    Ok(SchemaVersion::V1)
}

/// Parses a delivery into the canonical event model.
pub fn normalize(raw_body: &[u8], headers: &HeaderMap) -> Result<CanonicalEvent, ParseError> {
    let version = select_version(headers).map_err(|kind| ParseError::new(kind, raw_body))?;
    let delivery_id = header_value(headers, DELIVERY_HEADER).map(String::from);

    let parsed = match version {
        SchemaVersion::V1 => legacy::parse(raw_body),
        SchemaVersion::V2 => v2::parse(raw_body, headers),
    };

    let mut event = parsed.map_err(|kind| ParseError::new(kind, raw_body))?;
    event.delivery_id = delivery_id;
    Ok(event)
}

/// Accepts ids delivered either as JSON strings or numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum LooseId {
    Number(u64),
    Text(String),
}

impl LooseId {
    pub(crate) fn into_string(self) -> String {
        match self {
            LooseId::Number(n) => n.to_string(),
            LooseId::Text(s) => s,
        }
    }
}
