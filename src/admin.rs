//! Dashboard handlers behind the admin gate, plus the login flow.
//!
//! Every view is recomputed from disk on each request; see the aggregate
//! module for the fold semantics.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{AppendHeaders, Html, IntoResponse, Redirect, Response};
use axum::{Form, Json};
use tokio::fs;

use crate::aggregate::{
    self, ActivityOverview, DeviceOverview, MediaGallery, VisitorSummary,
};
use crate::auth::LOGIN_PATH;
use crate::error::AppError;
use crate::model::{LoginForm, LoginQuery, MediaKind};
use crate::state::AppState;

pub const DASHBOARD_PATH: &str = "/adminofthisapp";

/// `GET /adminofthisapp`: every visitor profile, keyed by sanitized IP.
pub async fn dashboard(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, VisitorSummary>>, AppError> {
    Ok(Json(aggregate::build_visitor_summaries(&state.store).await))
}

/// `GET /adminofthisapp/user/:ip` and `GET /adminofthisapp/api/user/:ip`:
/// one visitor profile.
pub async fn user_detail(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Json<VisitorSummary>, AppError> {
    let profile = single_user(&state, &ip).await?;
    Ok(Json(profile))
}

/// `GET /adminofthisapp/user/:ip/download`: the profile as a JSON
/// attachment.
pub async fn user_download(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let profile = single_user(&state, &ip).await?;
    let body = serde_json::to_string_pretty(&profile)?;
    let headers = [
        (header::CONTENT_TYPE, "application/json".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"user-{ip}-data.json\""),
        ),
    ];
    Ok((headers, body))
}

async fn single_user(state: &AppState, sanitized_ip: &str) -> Result<VisitorSummary, AppError> {
    let mut users = aggregate::build_visitor_summaries(&state.store).await;
    users
        .remove(sanitized_ip)
        .ok_or_else(|| AppError::not_found("User not found"))
}

/// `GET /adminofthisapp/activity`: sitewide interaction totals and
/// histograms.
pub async fn activity(State(state): State<AppState>) -> Result<Json<ActivityOverview>, AppError> {
    Ok(Json(aggregate::activity_overview(&state.store).await))
}

/// `GET /adminofthisapp/media`: the media gallery.
pub async fn media(State(state): State<AppState>) -> Result<Json<MediaGallery>, AppError> {
    Ok(Json(aggregate::media_gallery(&state.store).await))
}

/// `GET /adminofthisapp/devices`: browser, OS, and screen histograms.
pub async fn devices(State(state): State<AppState>) -> Result<Json<DeviceOverview>, AppError> {
    Ok(Json(aggregate::device_overview(&state.store).await))
}

/// `GET /adminofthisapp/media/view/:dateFolder/:ip/:type/:filename`: raw
/// stored media bytes.
pub async fn media_view(
    State(state): State<AppState>,
    Path((date_folder, ip, kind, file_name)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let kind = MediaKind::from_param(&kind)
        .ok_or_else(|| AppError::bad_request("unknown media type"))?;
    let path = state.store.media_path(&date_folder, &ip, kind, &file_name)?;

    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::not_found("Media not found"));
        }
        Err(err) => return Err(err.into()),
    };

    let headers = [(header::CONTENT_TYPE, content_type_for(&file_name))];
    Ok((headers, bytes))
}

fn content_type_for(file_name: &str) -> &'static str {
    match file_name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

/// `GET /adminofthisapp/login`: minimal credential form.
pub async fn login_form(Query(query): Query<LoginQuery>) -> Html<String> {
    let hint = if query.error.is_some() {
        "<p class=\"error\">Invalid credentials</p>"
    } else {
        ""
    };
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Admin Login</title></head>\n<body>\n\
         <h1>Admin Login</h1>\n{hint}\n\
         <form method=\"post\" action=\"{LOGIN_PATH}\">\n\
         <label>Username <input name=\"username\" autocomplete=\"username\"></label>\n\
         <label>Password <input name=\"password\" type=\"password\" autocomplete=\"current-password\"></label>\n\
         <button type=\"submit\">Sign in</button>\n\
         </form>\n</body>\n</html>\n"
    ))
}

/// `POST /adminofthisapp/login`: verifies the submitted credentials, sets
/// the admin session cookie, and redirects to the dashboard. Failures
/// bounce back to the form with an error hint.
pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    if !state.auth.verify_credentials(&form.username, &form.password) {
        state.metrics.record_login(false);
        tracing::warn!(username = %form.username, "admin login rejected");
        return Redirect::to(&format!("{LOGIN_PATH}?error=1")).into_response();
    }

    match state.auth.issue_token() {
        Ok(token) => {
            state.metrics.record_login(true);
            tracing::info!(username = %form.username, "admin login accepted");
            let cookie = state.auth.session_cookie(&token);
            (
                AppendHeaders([(header::SET_COOKIE, cookie)]),
                Redirect::to(DASHBOARD_PATH),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}
