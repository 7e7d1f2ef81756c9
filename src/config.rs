use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_GEO_URL: &str = "https://ipapi.co";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub logs_dir: PathBuf,
    pub media_dir: PathBuf,
    pub log_json: bool,
    pub geo: GeoConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Base URL of the remote lookup service; `None` disables remote lookups
    /// and every request resolves through the local fallback.
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub local_db: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
    pub token_secret: String,
    pub session_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let listen_addr: SocketAddr = env::var("FOOTFALL_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse()
            .context("invalid FOOTFALL_ADDR")?;

        let logs_dir = PathBuf::from(env::var("FOOTFALL_LOGS_DIR").unwrap_or_else(|_| "logs".to_string()));
        let media_dir =
            PathBuf::from(env::var("FOOTFALL_MEDIA_DIR").unwrap_or_else(|_| "media".to_string()));

        let log_json = env::var("FOOTFALL_LOG_JSON")
            .map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let geo_base_url = match env::var("FOOTFALL_GEO_URL") {
            Ok(raw) if raw.trim().is_empty() => None,
            Ok(raw) => Some(raw),
            Err(_) => Some(DEFAULT_GEO_URL.to_string()),
        };

        let geo = GeoConfig {
            base_url: geo_base_url,
            timeout: parse_duration("FOOTFALL_GEO_TIMEOUT_SECONDS", 5)?,
            local_db: env::var("FOOTFALL_GEO_LOCAL_DB").ok().map(PathBuf::from),
        };

        // No baked-in fallback: the dashboard stays locked unless credentials
        // are configured.
        let admin = AdminConfig {
            username: env::var("FOOTFALL_ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string()),
            password: env::var("FOOTFALL_ADMIN_PASSWORD")
                .context("FOOTFALL_ADMIN_PASSWORD must be set")?,
            token_secret: env::var("FOOTFALL_ADMIN_TOKEN_SECRET")
                .unwrap_or_else(|_| random_secret()),
            session_ttl: parse_duration("FOOTFALL_ADMIN_SESSION_SECONDS", 43_200)?,
        };

        Ok(Self {
            listen_addr,
            logs_dir,
            media_dir,
            log_json,
            geo,
            admin,
        })
    }
}

/// Fresh signing secret for deployments that do not pin one. Admin sessions
/// then expire on restart.
fn random_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

fn parse_duration(env_key: &str, default_secs: u64) -> Result<Duration> {
    let raw = env::var(env_key).unwrap_or_else(|_| default_secs.to_string());
    let secs: u64 = raw
        .parse()
        .with_context(|| format!("{env_key} must be an integer number of seconds"))?;

    Ok(Duration::from_secs(secs))
}
