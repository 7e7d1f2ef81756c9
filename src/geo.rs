//! IP geolocation with layered fallback.
//!
//! Lookups try the remote service first (ipapi.co-compatible, with a
//! client-side timeout), then a local CIDR table loaded at startup, then
//! "Unknown" defaults. Failures never surface to the request that triggered
//! the lookup.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use ipnet::IpNet;
use reqwest::Client;
use serde::Deserialize;

use crate::config::GeoConfig;
use crate::error::AppError;
use crate::metrics::Metrics;
use crate::model::{GeoLocation, UNKNOWN};

/// Remote lookup seam.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteGeo: Send + Sync {
    async fn fetch(&self, ip: IpAddr) -> Result<GeoLocation, AppError>;
}

/// Client for an ipapi.co-compatible endpoint: `GET {base}/{ip}/json/`.
#[derive(Clone)]
pub struct IpapiClient {
    base_url: String,
    client: Client,
}

impl IpapiClient {
    pub fn try_new(base_url: String, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow!("failed to build geolocation client: {e}")))?;

        Ok(Self { base_url, client })
    }
}

/// Wire shape of the remote response. The service reports failures in-band
/// with `error: true` and a reason.
#[derive(Debug, Deserialize)]
struct RemotePayload {
    #[serde(default)]
    country_name: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    asn: Option<String>,
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    error: bool,
    #[serde(default)]
    reason: Option<String>,
}

impl RemotePayload {
    fn into_location(self) -> GeoLocation {
        let org = self.org.unwrap_or_else(|| UNKNOWN.to_string());
        GeoLocation {
            country: self.country_name.unwrap_or_else(|| UNKNOWN.to_string()),
            country_code: self.country_code.unwrap_or_else(|| UNKNOWN.to_string()),
            region: self.region.unwrap_or_else(|| UNKNOWN.to_string()),
            city: self.city.unwrap_or_else(|| UNKNOWN.to_string()),
            latitude: self.latitude,
            longitude: self.longitude,
            timezone: self.timezone.unwrap_or_else(|| UNKNOWN.to_string()),
            asn: self.asn.unwrap_or_else(|| UNKNOWN.to_string()),
            isp: org.clone(),
            org,
        }
    }
}

#[async_trait]
impl RemoteGeo for IpapiClient {
    async fn fetch(&self, ip: IpAddr) -> Result<GeoLocation, AppError> {
        let url = format!("{}/{}/json/", self.base_url.trim_end_matches('/'), ip);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow!("geolocation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Internal(anyhow!(
                "geolocation service returned status {status}"
            )));
        }

        let payload = response
            .json::<RemotePayload>()
            .await
            .map_err(|e| AppError::Internal(anyhow!("failed to parse geolocation response: {e}")))?;

        if payload.error {
            return Err(AppError::Internal(anyhow!(
                "geolocation refused: {}",
                payload.reason.unwrap_or_else(|| "no reason given".to_string())
            )));
        }

        Ok(payload.into_location())
    }
}

/// One row of the local fallback table.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalGeoEntry {
    pub network: IpNet,
    #[serde(flatten)]
    pub location: GeoLocation,
}

/// CIDR-keyed fallback table; first matching network wins.
#[derive(Clone, Default)]
pub struct LocalGeoStore {
    entries: Arc<Vec<LocalGeoEntry>>,
}

impl LocalGeoStore {
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read local geo database {}", path.display()))?;
        let entries: Vec<LocalGeoEntry> = serde_json::from_slice(&raw)
            .with_context(|| format!("invalid local geo database {}", path.display()))?;
        tracing::info!(count = entries.len(), path = %path.display(), "loaded local geo database");
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: Vec<LocalGeoEntry>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn lookup(&self, ip: IpAddr) -> Option<GeoLocation> {
        self.entries
            .iter()
            .find(|entry| entry.network.contains(&ip))
            .map(|entry| entry.location.clone())
    }
}

/// Resolver handed to the logging middleware. Cheap to clone.
#[derive(Clone)]
pub struct GeoLocator {
    remote: Option<Arc<dyn RemoteGeo>>,
    local: LocalGeoStore,
    metrics: Metrics,
}

impl GeoLocator {
    pub fn from_config(config: &GeoConfig, metrics: Metrics) -> Result<Self, AppError> {
        let remote = match &config.base_url {
            Some(url) => {
                let client = IpapiClient::try_new(url.clone(), config.timeout)?;
                Some(Arc::new(client) as Arc<dyn RemoteGeo>)
            }
            None => None,
        };
        let local = LocalGeoStore::load(config.local_db.as_deref())?;
        Ok(Self {
            remote,
            local,
            metrics,
        })
    }

    pub fn with_parts(
        remote: Option<Arc<dyn RemoteGeo>>,
        local: LocalGeoStore,
        metrics: Metrics,
    ) -> Self {
        Self {
            remote,
            local,
            metrics,
        }
    }

    /// Resolves a textual IP. Never fails; unparseable input and remote
    /// errors degrade through the local table to "Unknown" defaults.
    pub async fn locate(&self, ip_text: &str) -> GeoLocation {
        let Ok(ip) = ip_text.parse::<IpAddr>() else {
            self.metrics.geo_fallbacks.inc();
            return GeoLocation::default();
        };

        if let Some(remote) = &self.remote {
            self.metrics.geo_lookups.inc();
            match remote.fetch(ip).await {
                Ok(location) => return location,
                Err(err) => {
                    tracing::debug!(%ip, error = %err, "remote geolocation failed, using local fallback");
                }
            }
        }

        self.metrics.geo_fallbacks.inc();
        self.local.lookup(ip).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oslo_entry() -> LocalGeoEntry {
        LocalGeoEntry {
            network: "10.0.0.0/8".parse().unwrap(),
            location: GeoLocation {
                country: "Norway".to_string(),
                city: "Oslo".to_string(),
                ..GeoLocation::default()
            },
        }
    }

    #[tokio::test]
    async fn remote_result_wins_when_available() {
        let mut remote = MockRemoteGeo::new();
        remote.expect_fetch().returning(|_| {
            Ok(GeoLocation {
                country: "Iceland".to_string(),
                ..GeoLocation::default()
            })
        });

        let locator = GeoLocator::with_parts(
            Some(Arc::new(remote)),
            LocalGeoStore::from_entries(vec![oslo_entry()]),
            Metrics::new().unwrap(),
        );

        let location = locator.locate("10.1.2.3").await;
        assert_eq!(location.country, "Iceland");
    }

    #[tokio::test]
    async fn remote_failure_falls_back_to_local_table() {
        let mut remote = MockRemoteGeo::new();
        remote
            .expect_fetch()
            .returning(|_| Err(AppError::Internal(anyhow!("service down"))));

        let metrics = Metrics::new().unwrap();
        let locator = GeoLocator::with_parts(
            Some(Arc::new(remote)),
            LocalGeoStore::from_entries(vec![oslo_entry()]),
            metrics.clone(),
        );

        let location = locator.locate("10.1.2.3").await;
        assert_eq!(location.city, "Oslo");
        assert_eq!(metrics.geo_fallbacks.get(), 1);
    }

    #[tokio::test]
    async fn unmatched_ip_degrades_to_unknown() {
        let locator = GeoLocator::with_parts(
            None,
            LocalGeoStore::from_entries(vec![oslo_entry()]),
            Metrics::new().unwrap(),
        );

        let location = locator.locate("192.168.7.7").await;
        assert_eq!(location.country, UNKNOWN);
        assert_eq!(location.latitude, None);
    }

    #[tokio::test]
    async fn unparseable_ip_degrades_to_unknown() {
        let locator =
            GeoLocator::with_parts(None, LocalGeoStore::default(), Metrics::new().unwrap());
        let location = locator.locate(UNKNOWN).await;
        assert_eq!(location.country, UNKNOWN);
    }

    #[test]
    fn remote_payload_maps_org_to_isp() {
        let payload: RemotePayload = serde_json::from_str(
            r#"{"country_name":"Norway","country_code":"NO","org":"AS2119 Telenor"}"#,
        )
        .unwrap();
        let location = payload.into_location();
        assert_eq!(location.country, "Norway");
        assert_eq!(location.org, "AS2119 Telenor");
        assert_eq!(location.isp, "AS2119 Telenor");
        assert_eq!(location.region, UNKNOWN);
    }
}
