//! HTTP handlers
//!
//! The webhook endpoint plus a small read-only status surface.

pub mod builds;
pub mod webhook;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::any::Any;
use tracing::error;

pub use builds::{get_build, root, status};
pub use webhook::handle_webhook;

/// Answers a panicking handler with a generic 500; the process keeps serving.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    error!("Unexpected failure while handling request: {}", detail);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
}
