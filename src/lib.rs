//! Visitor-telemetry server: beacon ingestion, file-backed storage, and an
//! authenticated dashboard over the aggregated records.

pub mod admin;
pub mod agent;
pub mod aggregate;
pub mod auth;
pub mod config;
pub mod error;
pub mod geo;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod pages;
pub mod state;
pub mod store;
pub mod track;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

pub use crate::config::AppConfig;
pub use crate::error::AppError;
pub use crate::state::AppState;

/// Base64 image beacons stay small; 10 MB leaves generous headroom.
const IMAGE_BODY_LIMIT: usize = 10 * 1024 * 1024;
/// Video uploads are capped at 100 MB.
const VIDEO_BODY_LIMIT: usize = 100 * 1024 * 1024;

/// Assembles the full application router.
///
/// Public routes run behind the session and visit-logging middleware; the
/// dashboard routes additionally sit behind the admin gate. `/healthz` and
/// `/metrics` bypass visit logging so probes never pollute the records.
pub fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/adminofthisapp", get(admin::dashboard))
        .route("/adminofthisapp/user/:ip", get(admin::user_detail))
        .route("/adminofthisapp/user/:ip/download", get(admin::user_download))
        .route("/adminofthisapp/api/user/:ip", get(admin::user_detail))
        .route("/adminofthisapp/activity", get(admin::activity))
        .route("/adminofthisapp/media", get(admin::media))
        .route("/adminofthisapp/devices", get(admin::devices))
        .route(
            "/adminofthisapp/media/view/:date_folder/:ip/:media_type/:file_name",
            get(admin::media_view),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    let tracked = Router::new()
        .route("/", get(pages::home))
        .route("/about", get(pages::about))
        .route("/tracking-data", post(ingest::tracking_data))
        .route("/activity-update", post(ingest::activity_update))
        .route(
            "/user-image",
            post(ingest::user_image).layer(DefaultBodyLimit::max(IMAGE_BODY_LIMIT)),
        )
        .route(
            "/user-video",
            post(ingest::user_video).layer(DefaultBodyLimit::max(VIDEO_BODY_LIMIT)),
        )
        .route(
            auth::LOGIN_PATH,
            get(admin::login_form).post(admin::login),
        )
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track::record_visit,
        ))
        .layer(middleware::from_fn(track::ensure_session));

    Router::new()
        .merge(tracked)
        .route("/healthz", get(pages::health))
        .route("/metrics", get(pages::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
