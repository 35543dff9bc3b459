//! Axum wiring: one route, matching every method, on `/` (spec.md §6).
//!
//! Non-POST requests are reported as `not_found` rather than axum's
//! default method-not-allowed, to match the literal contract every other
//! caller of this supervisor depends on.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use tracing::warn;

use crate::gate::{self, RequestGate};
use crate::notifier::Notifier;
use crate::runner::Runner;
use crate::schema::ApiResponse;
use crate::schema::RequestStatus;

#[derive(Clone)]
pub struct AppState {
    pub runner: Runner,
    pub gate: Arc<RequestGate>,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/", any(handle)).with_state(state)
}

async fn handle(State(state): State<AppState>, request: Request<Body>) -> Response {
    if request.method() != Method::POST {
        return respond(ApiResponse::new(RequestStatus::NotFound));
    }

    let gate = Arc::clone(&state.gate);
    let lock = match tokio::task::spawn_blocking(move || gate.acquire()).await {
        Ok(Ok(lock)) => lock,
        Ok(Err(e)) => {
            warn!(error = %e, "failed to acquire request gate");
            return respond(ApiResponse::with_message(RequestStatus::Error, format!("{e:#}")));
        }
        Err(e) => {
            warn!(error = %e, "request gate task panicked");
            return respond(ApiResponse::new(RequestStatus::Error));
        }
    };

    let response = match Multipart::from_request(request, &state).await {
        Ok(multipart) => process_upload(multipart, &state.runner).await,
        Err(e) => ApiResponse::with_message(RequestStatus::BadRequest, e.to_string()),
    };

    // Held across the whole admission decision; released here on every
    // path, including the early bad_request return above.
    drop(lock);
    respond(response)
}

async fn process_upload(mut multipart: Multipart, runner: &Runner) -> ApiResponse {
    let mut archive_bytes: Option<Vec<u8>> = None;
    let mut notify_url: Option<String> = None;
    let mut notify_token = String::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return ApiResponse::with_message(RequestStatus::BadRequest, e.to_string()),
        };

        match field.name() {
            Some("file") => match field.bytes().await {
                Ok(bytes) => archive_bytes = Some(bytes.to_vec()),
                Err(e) => return ApiResponse::with_message(RequestStatus::BadRequest, e.to_string()),
            },
            Some("notify") => notify_url = field.text().await.ok().filter(|s| !s.is_empty()),
            Some("token") => notify_token = field.text().await.unwrap_or_default(),
            _ => {}
        }
    }

    let notifier = notify_url.map(|url| Notifier::new(url, notify_token));
    gate::admit(runner, archive_bytes, notifier)
}

fn respond(api: ApiResponse) -> Response {
    let status_code =
        StatusCode::from_u16(api.request_status.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status_code, Json(api)).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json; charset=utf-8"));
    response
}
