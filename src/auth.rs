//! Admin authentication: configured credentials, signed session tokens, and
//! the gate middleware in front of the dashboard.
//!
//! Credentials come from configuration and compare as SHA-256 digests. A
//! successful login mints an HS256 token carried in an httpOnly cookie; the
//! gate redirects anything without a valid token to the login form.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AdminConfig;
use crate::error::AppError;
use crate::state::AppState;

pub const ADMIN_COOKIE: &str = "admin_token";
pub const LOGIN_PATH: &str = "/adminofthisapp/login";

/// Claims carried by an admin session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // admin username
    pub exp: usize,  // expiration time
    pub iat: usize,  // issued at
}

#[derive(Clone)]
pub struct AdminAuth {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    username: String,
    password_digest: [u8; 32],
    secret: String,
    session_ttl: Duration,
}

impl AdminAuth {
    pub fn new(config: &AdminConfig) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                username: config.username.clone(),
                password_digest: digest(&config.password),
                secret: config.token_secret.clone(),
                session_ttl: config.session_ttl,
            }),
        }
    }

    /// Both sides compare as digests, so the comparison shape does not depend
    /// on what the caller submitted.
    pub fn verify_credentials(&self, username: &str, password: &str) -> bool {
        let name_ok = digest(username) == digest(&self.inner.username);
        let pass_ok = digest(password) == self.inner.password_digest;
        name_ok && pass_ok
    }

    pub fn issue_token(&self) -> Result<String, AppError> {
        let iat = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: self.inner.username.clone(),
            iat,
            exp: iat + self.inner.session_ttl.as_secs() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.inner.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to sign admin token: {e}")))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.inner.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| AppError::unauthorized(format!("invalid admin token: {e}")))?;

        Ok(token_data.claims)
    }

    /// Set-Cookie value for a freshly issued token, scoped to the dashboard.
    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{ADMIN_COOKIE}={token}; Max-Age={}; Path=/adminofthisapp; HttpOnly; SameSite=Lax",
            self.inner.session_ttl.as_secs()
        )
    }
}

fn digest(input: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.finalize().into()
}

/// Gate for dashboard routes: valid token passes through, everything else is
/// redirected to the login form.
pub async fn require_admin(
    State(state): State<AppState>,
    jar: CookieJar,
    req: Request,
    next: Next,
) -> Response {
    let authorized = jar
        .get(ADMIN_COOKIE)
        .map(|cookie| state.auth.verify_token(cookie.value()).is_ok())
        .unwrap_or(false);

    if authorized {
        next.run(req).await
    } else {
        Redirect::to(LOGIN_PATH).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_auth(secret: &str) -> AdminAuth {
        AdminAuth::new(&AdminConfig {
            username: "warden".to_string(),
            password: "hunter2".to_string(),
            token_secret: secret.to_string(),
            session_ttl: Duration::from_secs(3600),
        })
    }

    #[test]
    fn credentials_verify_only_on_exact_match() {
        let auth = test_auth("secret-a");
        assert!(auth.verify_credentials("warden", "hunter2"));
        assert!(!auth.verify_credentials("warden", "hunter3"));
        assert!(!auth.verify_credentials("intruder", "hunter2"));
        assert!(!auth.verify_credentials("", ""));
    }

    #[test]
    fn token_round_trips() {
        let auth = test_auth("secret-a");
        let token = auth.issue_token().unwrap();
        let claims = auth.verify_token(&token).unwrap();
        assert_eq!(claims.sub, "warden");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = test_auth("secret-a").issue_token().unwrap();
        assert!(test_auth("secret-b").verify_token(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = test_auth("secret-a");
        let stale = Claims {
            sub: "warden".to_string(),
            iat: 1_000_000,
            exp: 1_000_060, // far in the past, beyond any validation leeway
        };
        let token = encode(
            &Header::default(),
            &stale,
            &EncodingKey::from_secret(b"secret-a"),
        )
        .unwrap();
        assert!(auth.verify_token(&token).is_err());
    }

    #[test]
    fn session_cookie_is_scoped_and_http_only() {
        let auth = test_auth("secret-a");
        let cookie = auth.session_cookie("tok");
        assert!(cookie.starts_with("admin_token=tok;"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cookie.contains("Path=/adminofthisapp"));
        assert!(cookie.contains("HttpOnly"));
    }
}
