//! Shared application state handed to every handler.

use crate::agent::AgentParser;
use crate::auth::AdminAuth;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::geo::GeoLocator;
use crate::metrics::Metrics;
use crate::store::TelemetryStore;

#[derive(Clone)]
pub struct AppState {
    pub store: TelemetryStore,
    pub geo: GeoLocator,
    pub agents: AgentParser,
    pub auth: AdminAuth,
    pub metrics: Metrics,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let metrics = Metrics::new()?;
        Ok(Self {
            store: TelemetryStore::new(config.logs_dir.clone(), config.media_dir.clone()),
            geo: GeoLocator::from_config(&config.geo, metrics.clone())?,
            agents: AgentParser::new(),
            auth: AdminAuth::new(&config.admin),
            metrics,
        })
    }
}
