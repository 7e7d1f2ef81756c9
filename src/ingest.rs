//! Beacon and upload handlers: client fingerprints, activity snapshots,
//! camera frames, and screen recordings.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Multipart, State};
use axum::http::{header, HeaderMap};
use axum::{Extension, Json};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::AppError;
use crate::model::{
    self, ClientSummary, ImageUpload, MediaKind, SessionId, StatusResponse, UNKNOWN,
};
use crate::state::AppState;
use crate::track;

/// Handles `POST /tracking-data`: wraps the reported fingerprint in a
/// server-side envelope, writes it under the visitor's IP bucket, and appends
/// a row to the combined index.
pub async fn tracking_data(
    State(state): State<AppState>,
    session: Option<Extension<SessionId>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<StatusResponse>, AppError> {
    let net = track::resolve_client_net(&headers, connect.map(|ConnectInfo(addr)| addr));
    let session_id = session_id_or_unknown(session);
    let user_agent = track::header_str(&headers, header::USER_AGENT.as_str())
        .unwrap_or(UNKNOWN)
        .to_string();

    let now = model::now_iso();
    let stamp = model::filename_stamp(&now);
    let sanitized_ip = model::sanitize_ip(&net.ip_address);

    let server_data = serde_json::json!({
        "ipAddress": net.ip_address,
        "userAgent": state.agents.classify(&user_agent),
        "sessionId": session_id,
        "headers": track::header_map(&headers),
        "serverTimestamp": now,
    });
    let merged = merge_server_data(payload, server_data);

    let data_file = state
        .store
        .record_client_data(&sanitized_ip, &stamp, &merged)
        .await?;
    state
        .store
        .append_client_summary(&ClientSummary {
            timestamp: now,
            ip_address: net.ip_address.clone(),
            session_id,
            user_agent,
            data_file,
        })
        .await?;

    state.metrics.tracking_beacons.inc();
    tracing::debug!(ip = %net.ip_address, "stored tracking beacon");
    Ok(Json(StatusResponse::success()))
}

/// Handles `POST /activity-update`: one interaction snapshot per call,
/// written under the visitor's IP bucket.
pub async fn activity_update(
    State(state): State<AppState>,
    session: Option<Extension<SessionId>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<StatusResponse>, AppError> {
    let net = track::resolve_client_net(&headers, connect.map(|ConnectInfo(addr)| addr));
    let session_id = session_id_or_unknown(session);

    let now = model::now_iso();
    let stamp = model::filename_stamp(&now);
    let sanitized_ip = model::sanitize_ip(&net.ip_address);

    let server_data = serde_json::json!({
        "ipAddress": net.ip_address,
        "sessionId": session_id,
        "serverTimestamp": now,
    });
    let merged = merge_server_data(payload, server_data);

    state
        .store
        .record_activity(&sanitized_ip, &stamp, &merged)
        .await?;

    state.metrics.activity_beacons.inc();
    tracing::debug!(ip = %net.ip_address, "stored activity snapshot");
    Ok(Json(StatusResponse::success()))
}

/// Handles `POST /user-image`: a base64 JPEG frame, stored under the
/// dated media tree and indexed.
pub async fn user_image(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(upload): Json<ImageUpload>,
) -> Result<Json<StatusResponse>, AppError> {
    let net = track::resolve_client_net(&headers, connect.map(|ConnectInfo(addr)| addr));
    let bytes = decode_data_url(&upload.image)?;

    // Trust the client's capture time only when it matches the filename
    // scheme exactly; anything else gets the server clock.
    let stamp = upload
        .timestamp
        .as_deref()
        .map(model::filename_stamp)
        .filter(|candidate| model::is_filename_stamp(candidate))
        .unwrap_or_else(|| model::filename_stamp(&model::now_iso()));

    let entry = state
        .store
        .store_media(&net.ip_address, MediaKind::Image, "jpg", &stamp, &bytes)
        .await?;

    state.metrics.record_media_stored(MediaKind::Image);
    tracing::debug!(ip = %net.ip_address, file = %entry.file_name, "stored image capture");
    Ok(Json(StatusResponse::success()))
}

/// Handles `POST /user-video`: multipart upload whose `video` field holds
/// the recording. Container is taken from the part's content type.
pub async fn user_video(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<StatusResponse>, AppError> {
    let net = track::resolve_client_net(&headers, connect.map(|ConnectInfo(addr)| addr));

    let mut video: Option<(Vec<u8>, &'static str)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("unreadable multipart body: {err}")))?
    {
        if field.name() != Some("video") {
            continue;
        }
        let extension = match field.content_type() {
            Some("video/mp4") => "mp4",
            _ => "webm",
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("unreadable video field: {err}")))?;
        video = Some((bytes.to_vec(), extension));
        break;
    }
    let Some((bytes, extension)) = video else {
        return Err(AppError::bad_request("No video file received"));
    };

    let stamp = model::filename_stamp(&model::now_iso());
    let entry = state
        .store
        .store_media(&net.ip_address, MediaKind::Video, extension, &stamp, &bytes)
        .await?;

    state.metrics.record_media_stored(MediaKind::Video);
    tracing::debug!(ip = %net.ip_address, file = %entry.file_name, "stored video capture");
    Ok(Json(StatusResponse::success()))
}

fn session_id_or_unknown(session: Option<Extension<SessionId>>) -> String {
    session
        .map(|Extension(SessionId(id))| id)
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Folds the server-side envelope into the client payload. Non-object bodies
/// are kept intact under a `payload` key.
fn merge_server_data(
    payload: serde_json::Value,
    server_data: serde_json::Value,
) -> serde_json::Value {
    let mut map = match payload {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("payload".to_string(), other);
            map
        }
    };
    map.insert("serverData".to_string(), server_data);
    serde_json::Value::Object(map)
}

/// Strips an optional `data:*;base64,` prefix and decodes the remainder.
fn decode_data_url(data: &str) -> Result<Vec<u8>, AppError> {
    let encoded = match data.split_once("base64,") {
        Some((_, rest)) => rest,
        None => data,
    };
    BASE64
        .decode(encoded.trim())
        .map_err(|_| AppError::bad_request("image payload is not valid base64"))
}
