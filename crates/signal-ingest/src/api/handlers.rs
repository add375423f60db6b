//! Request handlers.

use super::error::ApiError;
use super::AppState;
use crate::store::NewUpload;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{info, warn};

/// Body of `POST /api/signal`.
#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    pub data: String,
}

/// Body of `GET /api/health`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub app: String,
    pub db: String,
}

/// Body of a successful `POST /api/signal_file`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub upload_id: i64,
    pub rows: u64,
    pub saved_path: String,
}

/// Submitting client: first `X-Forwarded-For` entry, else the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match (forwarded, peer) {
        (Some(ip), _) => ip.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    }
}

pub async fn post_signal(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<SignalRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = payload.map_err(|e| {
        warn!("invalid signal JSON: {}", e.body_text());
        ApiError::bad_request("invalid_json", "Invalid JSON")
    })?;

    let ip = client_ip(&headers, connect.map(|c| c.0));
    state.store.insert_signal(&request.data, &ip).await?;
    Ok(StatusCode::CREATED)
}

pub async fn get_signal(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    match state.store.latest_signal().await? {
        Some(signal) => Ok(Json(signal)),
        None => Err(ApiError::not_found("No signal found")),
    }
}

pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthStatus {
                app: "ok".into(),
                db: "ok".into(),
            }),
        ),
        Err(e) => {
            warn!("health check: database unreachable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthStatus {
                    app: "ok".into(),
                    db: "unreachable".into(),
                }),
            )
        }
    }
}

pub async fn post_signal_file(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let source_addr = client_ip(&headers, connect.map(|c| c.0));

    let (filename, bytes) = loop {
        let field = multipart.next_field().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::new(e.status(), "payload_too_large", e.body_text())
            } else {
                ApiError::bad_request("invalid_upload", "Invalid file upload")
            }
        })?;
        let Some(field) = field else {
            return Err(ApiError::bad_request(
                "invalid_upload",
                "Missing multipart field \"file\"",
            ));
        };
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|e| {
            ApiError::new(e.status(), "invalid_upload", e.body_text())
        })?;
        break (filename, bytes);
    };

    // Reject before anything reaches the archive
    state.ingestor.limits().check_size(bytes.len())?;

    let saved = state.archive.save_today(&filename, &bytes).await?;
    let saved_path = saved.display().to_string();
    info!(
        "upload {:?} from {} archived at {}",
        filename, source_addr, saved_path
    );

    let upload = NewUpload {
        filename,
        path: Some(saved_path.clone()),
        source_addr,
    };
    let receipt = state.ingestor.ingest(&upload, &bytes).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            upload_id: receipt.upload_id,
            rows: receipt.rows,
            saved_path,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let peer: SocketAddr = "[::1]:5000".parse().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "::1");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" "));
        let peer: SocketAddr = "192.0.2.1:80".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(peer)), "192.0.2.1");
    }
}
