//! Session and visit-logging middleware.
//!
//! `ensure_session` gives every visitor a cookie-persisted session id.
//! `record_visit` snapshots each request into a per-visitor file plus the
//! shared visit log before the handler runs; persistence failures are logged
//! and never fail the request.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, Extensions, HeaderMap, HeaderValue, Method, Uri};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use uuid::Uuid;

use crate::agent;
use crate::model::{self, NetworkInfo, RequestInfo, SessionId, VisitRecord, UNKNOWN};
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "session_id";
const SESSION_MAX_AGE_SECS: u64 = 365 * 24 * 60 * 60;

/// Reads the session cookie, minting a fresh id (and Set-Cookie) when absent.
/// The id rides request extensions as [`SessionId`].
pub async fn ensure_session(mut req: Request, next: Next) -> Response {
    let jar = CookieJar::from_headers(req.headers());
    match jar.get(SESSION_COOKIE) {
        Some(cookie) => {
            req.extensions_mut()
                .insert(SessionId(cookie.value().to_string()));
            next.run(req).await
        }
        None => {
            let id = Uuid::new_v4().to_string();
            req.extensions_mut().insert(SessionId(id.clone()));
            let mut response = next.run(req).await;
            let value = format!(
                "{SESSION_COOKIE}={id}; Max-Age={SESSION_MAX_AGE_SECS}; Path=/; HttpOnly; SameSite=Lax"
            );
            if let Ok(header_value) = HeaderValue::from_str(&value) {
                response
                    .headers_mut()
                    .append(header::SET_COOKIE, header_value);
            }
            response
        }
    }
}

/// Addressing details resolved from proxy headers and the socket.
#[derive(Debug, Clone)]
pub struct ClientNet {
    pub ip_address: String,
    pub forwarded_ip: Option<String>,
    pub x_real_ip: Option<String>,
    pub remote_addr: Option<String>,
    pub proxy_chain: Vec<String>,
}

impl ClientNet {
    pub fn to_network_info(&self) -> NetworkInfo {
        NetworkInfo {
            ip_address: self.ip_address.clone(),
            forwarded_ip: self
                .forwarded_ip
                .clone()
                .unwrap_or_else(|| "None".to_string()),
            x_real_ip: self.x_real_ip.clone().unwrap_or_else(|| "None".to_string()),
            remote_addr: self
                .remote_addr
                .clone()
                .unwrap_or_else(|| UNKNOWN.to_string()),
            proxy_ips: self.proxy_chain.clone(),
        }
    }
}

/// Client IP precedence: first `x-forwarded-for` entry, then `x-real-ip`,
/// then the socket peer, then "Unknown".
pub fn resolve_client_net(headers: &HeaderMap, remote: Option<SocketAddr>) -> ClientNet {
    let proxy_chain: Vec<String> = header_str(headers, "x-forwarded-for")
        .map(|raw| {
            raw.split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let forwarded_ip = proxy_chain.first().cloned();
    let x_real_ip = header_str(headers, "x-real-ip").map(str::to_string);
    let remote_addr = remote.map(|addr| addr.ip().to_string());

    let ip_address = forwarded_ip
        .clone()
        .or_else(|| x_real_ip.clone())
        .or_else(|| remote_addr.clone())
        .unwrap_or_else(|| UNKNOWN.to_string());

    ClientNet {
        ip_address,
        forwarded_ip,
        x_real_ip,
        remote_addr,
        proxy_chain,
    }
}

/// Snapshots the request into a [`VisitRecord`] and persists it, then hands
/// the request on.
pub async fn record_visit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let record = build_record(
        &state,
        req.headers(),
        req.extensions(),
        req.uri(),
        req.method(),
    )
    .await;
    let sanitized_ip = model::sanitize_ip(&record.network_info.ip_address);

    match state.store.record_visit(&sanitized_ip, &record).await {
        Ok(_) => state.metrics.record_visit_logged(),
        Err(err) => {
            state.metrics.record_visit_failure();
            tracing::warn!(ip = %record.network_info.ip_address, error = %err, "failed to persist visit record");
        }
    }

    next.run(req).await
}

/// Borrows only the `Sync` pieces of the request so the returned future stays
/// `Send` (a whole `&Request` would capture the `!Sync` body across the await).
async fn build_record(
    state: &AppState,
    headers: &HeaderMap,
    extensions: &Extensions,
    uri: &Uri,
    method: &Method,
) -> VisitRecord {
    let session_id = extensions
        .get::<SessionId>()
        .map(|s| s.0.clone())
        .unwrap_or_else(|| UNKNOWN.to_string());
    let remote = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let net = resolve_client_net(headers, remote);
    let location = state.geo.locate(&net.ip_address).await;

    let user_agent = header_str(headers, "user-agent").unwrap_or_default();
    let browser_info = state.agents.classify(user_agent);
    let device_info = agent::device_info(&browser_info);

    let jar = CookieJar::from_headers(headers);
    let cookies: BTreeMap<String, String> = jar
        .iter()
        .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
        .collect();

    let request_info = RequestInfo {
        url: uri.to_string(),
        method: method.to_string(),
        host: header_str(headers, "host")
            .unwrap_or(UNKNOWN)
            .to_string(),
        referrer: header_str(headers, "referer")
            .unwrap_or("Direct")
            .to_string(),
        accept_language: header_str(headers, "accept-language")
            .unwrap_or(UNKNOWN)
            .to_string(),
        content_type: header_str(headers, "content-type")
            .unwrap_or(UNKNOWN)
            .to_string(),
        cookies,
        query: parse_query(uri.query().unwrap_or_default()),
    };

    VisitRecord {
        timestamp: model::now_iso(),
        session_id,
        request_info,
        network_info: net.to_network_info(),
        location,
        device_info,
        browser_info,
        headers: header_map(headers),
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub(crate) fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn parse_query(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
