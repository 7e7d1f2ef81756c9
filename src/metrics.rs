//! Prometheus counters for beacon ingestion, visit logging, and the
//! geolocation pipeline, exposed at `GET /metrics`.

use std::sync::Arc;

use prometheus::{IntCounter, Opts, Registry};

use crate::error::AppError;
use crate::model::MediaKind;

#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,

    // Visit-logging middleware
    pub visits_logged: IntCounter,
    pub visit_log_failures: IntCounter,

    // Beacon ingestion
    pub tracking_beacons: IntCounter,
    pub activity_beacons: IntCounter,
    pub images_stored: IntCounter,
    pub videos_stored: IntCounter,

    // Geolocation pipeline
    pub geo_lookups: IntCounter,
    pub geo_fallbacks: IntCounter,

    // Admin sessions
    pub admin_logins: IntCounter,
    pub admin_login_failures: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, AppError> {
        let registry = Registry::new();

        let visits_logged = register_counter(
            &registry,
            "footfall_visits_logged_total",
            "Requests captured by the visit-logging middleware",
        )?;
        let visit_log_failures = register_counter(
            &registry,
            "footfall_visit_log_failures_total",
            "Visit records that could not be persisted",
        )?;
        let tracking_beacons = register_counter(
            &registry,
            "footfall_tracking_beacons_total",
            "Accepted tracking-data beacons",
        )?;
        let activity_beacons = register_counter(
            &registry,
            "footfall_activity_beacons_total",
            "Accepted activity-update beacons",
        )?;
        let images_stored = register_counter(
            &registry,
            "footfall_images_stored_total",
            "Image uploads written to the media tree",
        )?;
        let videos_stored = register_counter(
            &registry,
            "footfall_videos_stored_total",
            "Video uploads written to the media tree",
        )?;
        let geo_lookups = register_counter(
            &registry,
            "footfall_geo_lookups_total",
            "Remote geolocation lookups attempted",
        )?;
        let geo_fallbacks = register_counter(
            &registry,
            "footfall_geo_fallbacks_total",
            "Lookups resolved by the local fallback instead of the remote service",
        )?;
        let admin_logins = register_counter(
            &registry,
            "footfall_admin_logins_total",
            "Successful dashboard logins",
        )?;
        let admin_login_failures = register_counter(
            &registry,
            "footfall_admin_login_failures_total",
            "Rejected dashboard login attempts",
        )?;

        Ok(Self {
            registry: Arc::new(registry),
            visits_logged,
            visit_log_failures,
            tracking_beacons,
            activity_beacons,
            images_stored,
            videos_stored,
            geo_lookups,
            geo_fallbacks,
            admin_logins,
            admin_login_failures,
        })
    }

    pub fn record_visit_logged(&self) {
        self.visits_logged.inc();
    }

    pub fn record_visit_failure(&self) {
        self.visit_log_failures.inc();
    }

    pub fn record_media_stored(&self, kind: MediaKind) {
        match kind {
            MediaKind::Image => self.images_stored.inc(),
            MediaKind::Video => self.videos_stored.inc(),
        }
    }

    pub fn record_login(&self, accepted: bool) {
        if accepted {
            self.admin_logins.inc();
        } else {
            self.admin_login_failures.inc();
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn export(&self) -> Result<String, AppError> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics output was not utf-8: {e}")))
    }
}

fn register_counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, AppError> {
    let counter = IntCounter::with_opts(Opts::new(name, help))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to create metric {name}: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to register metric {name}: {e}")))?;
    Ok(counter)
}
