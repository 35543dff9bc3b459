//! JSON response schema for the HTTP surface (spec.md §6).
//!
//! Every response is a single flat object with a `status` field and,
//! depending on status, an optional `message`. There is no schema
//! versioning envelope here — unlike the CLI surface this supervisor
//! replaces, callers only ever see one endpoint and one shape.

use serde::Serialize;

/// The five outcomes a request to `/` can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Accepted: a new run was started.
    Ok,
    /// A run is already in flight; this request was rejected.
    Busy,
    /// Malformed request (e.g. missing `file` field).
    BadRequest,
    /// Unknown route or method.
    NotFound,
    /// Unexpected internal failure.
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Ok => "ok",
            RequestStatus::Busy => "busy",
            RequestStatus::BadRequest => "bad_request",
            RequestStatus::NotFound => "not_found",
            RequestStatus::Error => "error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            RequestStatus::Ok => 200,
            RequestStatus::Busy | RequestStatus::BadRequest | RequestStatus::Error => 500,
            RequestStatus::NotFound => 404,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    #[serde(skip)]
    pub request_status: RequestStatus,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiResponse {
    pub fn new(status: RequestStatus) -> Self {
        ApiResponse {
            request_status: status,
            status: status.as_str(),
            message: None,
        }
    }

    pub fn with_message(status: RequestStatus, message: impl Into<String>) -> Self {
        ApiResponse {
            request_status: status,
            status: status.as_str(),
            message: Some(message.into()),
        }
    }
}
