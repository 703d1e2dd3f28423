use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::to_bytes,
    extract::{ConnectInfo, Path, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ratelimit::{Category, service::AdmissionService};

const MAX_BODY_BYTES: usize = 4 * 1024;

#[derive(Clone)]
pub struct AppState {
    service: Arc<AdmissionService>,
}

#[derive(Debug, Default, Deserialize)]
struct CheckRequest {
    identifier: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

pub fn routes(service: Arc<AdmissionService>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/v1/admission/{category}", post(check))
        .with_state(AppState { service })
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "backend": state.service.backend_kind(),
    }))
}

async fn check(
    State(state): State<AppState>,
    Path(category): Path<String>,
    request: Request,
) -> Response {
    let request_id = request_id(request.headers());

    let category = match category.parse::<Category>() {
        Ok(category) => category,
        Err(message) => {
            let body = ErrorBody {
                error: "unknown_category",
                message,
            };
            return with_request_id(
                (StatusCode::NOT_FOUND, Json(body)).into_response(),
                &request_id,
            );
        }
    };

    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let body = match to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => {
            let body = ErrorBody {
                error: "payload_too_large",
                message: "Request body exceeds configured limit".to_string(),
            };
            return with_request_id(
                (StatusCode::PAYLOAD_TOO_LARGE, Json(body)).into_response(),
                &request_id,
            );
        }
    };

    let payload = if body.is_empty() {
        CheckRequest::default()
    } else {
        match serde_json::from_slice::<CheckRequest>(&body) {
            Ok(payload) => payload,
            Err(err) => {
                let body = ErrorBody {
                    error: "validation_error",
                    message: err.to_string(),
                };
                return with_request_id(
                    (StatusCode::BAD_REQUEST, Json(body)).into_response(),
                    &request_id,
                );
            }
        }
    };

    let identifier = payload
        .identifier
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or(client_ip)
        .unwrap_or_else(|| "anonymous".to_string());

    tracing::debug!(
        request_id = %request_id,
        %category,
        identifier = %identifier,
        "admission check"
    );

    let response = match state.service.check(&identifier, category).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(rejection) => rejection.into_response(),
    };
    with_request_id(response, &request_id)
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-request-id"), value);
    }
    response
}
