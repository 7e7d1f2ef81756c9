//! Record and wire types for visitor telemetry.
//!
//! Field names follow the persisted JSON layout (camelCase), so files written
//! by earlier deployments keep parsing.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder for any detail the request did not carry.
pub const UNKNOWN: &str = "Unknown";

fn unknown() -> String {
    UNKNOWN.to_string()
}

/// Body returned by every beacon endpoint on success.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn success() -> Self {
        Self { status: "success" }
    }
}

/// Session identifier carried in the visitor cookie, threaded through
/// request extensions by the session middleware.
#[derive(Debug, Clone)]
pub struct SessionId(pub String);

/// Resolved geolocation for an IP, best effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoLocation {
    #[serde(default = "unknown")]
    pub country: String,
    #[serde(default = "unknown")]
    pub country_code: String,
    #[serde(default = "unknown")]
    pub region: String,
    #[serde(default = "unknown")]
    pub city: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default = "unknown")]
    pub timezone: String,
    #[serde(default = "unknown")]
    pub asn: String,
    #[serde(default = "unknown")]
    pub org: String,
    #[serde(default = "unknown")]
    pub isp: String,
}

impl Default for GeoLocation {
    fn default() -> Self {
        Self {
            country: unknown(),
            country_code: unknown(),
            region: unknown(),
            city: unknown(),
            latitude: None,
            longitude: None,
            timezone: unknown(),
            asn: unknown(),
            org: unknown(),
            isp: unknown(),
        }
    }
}

/// Browser/OS classification parsed from the user-agent string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserInfo {
    pub browser: String,
    pub version: String,
    pub os: String,
    pub platform: String,
    pub is_mobile: bool,
    pub is_tablet: bool,
    pub is_desktop: bool,
    pub is_bot: bool,
    pub user_agent_raw: String,
}

impl Default for BrowserInfo {
    fn default() -> Self {
        Self {
            browser: unknown(),
            version: unknown(),
            os: unknown(),
            platform: unknown(),
            is_mobile: false,
            is_tablet: false,
            is_desktop: false,
            is_bot: false,
            user_agent_raw: String::new(),
        }
    }
}

/// Coarse device classification derived from [`BrowserInfo`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    #[serde(rename = "type")]
    pub device_type: String,
    pub model: String,
    pub manufacturer: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            device_type: unknown(),
            model: unknown(),
            manufacturer: unknown(),
        }
    }
}

/// Request-line metadata captured by the visit-logging middleware.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestInfo {
    pub url: String,
    pub method: String,
    pub host: String,
    pub referrer: String,
    pub accept_language: String,
    pub content_type: String,
    pub cookies: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
}

/// Observed addressing for a request, proxy headers included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInfo {
    pub ip_address: String,
    pub forwarded_ip: String,
    pub x_real_ip: String,
    pub remote_addr: String,
    pub proxy_ips: Vec<String>,
}

impl Default for NetworkInfo {
    fn default() -> Self {
        Self {
            ip_address: unknown(),
            forwarded_ip: "None".to_string(),
            x_real_ip: "None".to_string(),
            remote_addr: unknown(),
            proxy_ips: Vec::new(),
        }
    }
}

/// One enriched snapshot per request seen by the logging middleware.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisitRecord {
    pub timestamp: String,
    pub session_id: String,
    pub request_info: RequestInfo,
    pub network_info: NetworkInfo,
    pub location: GeoLocation,
    pub device_info: DeviceInfo,
    pub browser_info: BrowserInfo,
    pub headers: BTreeMap<String, String>,
}

/// Row appended to the shared client-data index for each tracking beacon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSummary {
    pub timestamp: String,
    pub ip_address: String,
    pub session_id: String,
    pub user_agent: String,
    pub data_file: String,
}

impl Default for ClientSummary {
    fn default() -> Self {
        Self {
            timestamp: String::new(),
            ip_address: unknown(),
            session_id: unknown(),
            user_agent: unknown(),
            data_file: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    /// Directory segment under the per-visitor media tree.
    pub fn dir_name(&self) -> &'static str {
        match self {
            MediaKind::Image => "images",
            MediaKind::Video => "videos",
        }
    }

    /// Parses the singular form used in media-view URLs.
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// One row in the shared media index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaIndexEntry {
    pub ip_address: String,
    pub sanitized_ip: String,
    pub media_type: MediaKind,
    pub file_name: String,
    pub date_folder: String,
    pub capture_time: String,
}

/// Body of a `/user-image` beacon.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageUpload {
    pub image: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub error: Option<String>,
}

/// Lenient read model for a stored activity file. Only the counters the
/// dashboard sums are typed; everything else stays in the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoredActivity {
    pub timestamp: String,
    pub activity: ActivitySnapshot,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActivitySnapshot {
    pub mouse: MouseCounters,
    pub keyboard: KeyboardCounters,
    pub scroll: ScrollCounters,
    #[serde(rename = "timeOnPage")]
    pub time_on_page: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct MouseCounters {
    pub moves: u64,
    pub clicks: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct KeyboardCounters {
    pub keystrokes: u64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ScrollCounters {
    pub count: u64,
}

/// Lenient read model for a stored client-data file; used to recover the
/// reported screen resolution for the device overview.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoredClientData {
    #[serde(rename = "screenInfo")]
    pub screen_info: Option<ScreenInfo>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
}

impl ScreenInfo {
    /// Histogram label, e.g. `1920x1080`.
    pub fn label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Current time as an RFC 3339 UTC millisecond string, the timestamp format
/// used in every record and filename.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_iso(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value).ok()
}

/// Date bucket for the media tree, local time.
pub fn today_bucket() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Makes an ISO timestamp filename-safe: `:` and `.` become `-`.
pub fn filename_stamp(iso: &str) -> String {
    iso.replace([':', '.'], "-")
}

/// Filesystem-safe form of an IP address: `.` and `:` become `-`.
pub fn sanitize_ip(ip: &str) -> String {
    ip.replace(['.', ':'], "-")
}

/// Best-effort inverse of [`sanitize_ip`]; only exact for IPv4.
pub fn desanitize_ip(sanitized: &str) -> String {
    sanitized.replace('-', ".")
}

/// Splits a per-visitor file stem into its sanitized-IP prefix and the
/// trailing filename-safe timestamp.
pub fn split_visit_stem(stem: &str) -> Option<(&str, &str)> {
    const STAMP_LEN: usize = 24;
    if !stem.is_ascii() || stem.len() <= STAMP_LEN + 1 {
        return None;
    }
    let (head, stamp) = stem.split_at(stem.len() - STAMP_LEN);
    if !is_filename_stamp(stamp) {
        return None;
    }
    let ip = head.strip_suffix('-')?;
    if ip.is_empty() {
        return None;
    }
    Some((ip, stamp))
}

/// True when `value` looks like the output of [`filename_stamp`] applied to
/// a millisecond RFC 3339 timestamp, e.g. `2025-08-25T12-34-56-789Z`.
pub fn is_filename_stamp(value: &str) -> bool {
    const TEMPLATE: &[u8] = b"0000-00-00T00-00-00-000Z";
    value.len() == TEMPLATE.len()
        && value
            .bytes()
            .zip(TEMPLATE.iter())
            .all(|(byte, slot)| match slot {
                b'0' => byte.is_ascii_digit(),
                _ => byte == *slot,
            })
}
