//! Public pages and operational endpoints.

use axum::extract::State;
use axum::response::Html;
use axum::Json;

use crate::error::AppError;
use crate::state::AppState;

/// `GET /`: static landing page.
pub async fn home() -> Html<&'static str> {
    Html(
        "<!DOCTYPE html>\n<html>\n<head><title>Welcome</title></head>\n<body>\n\
         <h1>Welcome</h1>\n<p>Thanks for stopping by.</p>\n\
         <p><a href=\"/about\">About this site</a></p>\n\
         </body>\n</html>\n",
    )
}

/// `GET /about`: static page.
pub async fn about() -> Html<&'static str> {
    Html(
        "<!DOCTYPE html>\n<html>\n<head><title>About</title></head>\n<body>\n\
         <h1>About</h1>\n<p>A small demo site.</p>\n\
         <p><a href=\"/\">Back home</a></p>\n\
         </body>\n</html>\n",
    )
}

/// Health check endpoint
pub async fn health() -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "footfall",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// Metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state.metrics.export()
}
