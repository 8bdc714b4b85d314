use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{ApiError, ApiErrorResponse};
use crate::state::AppState;

/// Caller identity established from a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub identity: String,
    pub display_name: Option<String>,
    pub contact_address: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer credential")]
    MissingCredential,
    #[error("Invalid or expired token: {0}")]
    InvalidToken(String),
    #[error("Identity verification is not configured")]
    NotConfigured,
    #[error("Signing keys unavailable: {0}")]
    KeysUnavailable(String),
}

#[async_trait::async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError>;
}

/// Stand-in used when no identity provider is configured. Rejects every
/// credential as a configuration error.
pub struct UnconfiguredVerifier;

#[async_trait::async_trait]
impl IdentityVerifier for UnconfiguredVerifier {
    async fn verify(&self, _token: &str) -> Result<VerifiedIdentity, AuthError> {
        Err(AuthError::NotConfigured)
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

const REFRESH_WINDOW: Duration = Duration::from_secs(60);

/// Verifies JWTs against a provider's published JWKS. Keys are cached and
/// refetched when a token names an unknown `kid`, no more often than the
/// configured number of times per minute.
pub struct JwksVerifier {
    http: reqwest::Client,
    jwks_uri: Option<String>,
    issuer: String,
    audience: String,
    algorithms: Vec<Algorithm>,
    keys: RwLock<JwkSet>,
    refreshes: Mutex<VecDeque<Instant>>,
    max_refreshes_per_minute: u32,
}

impl JwksVerifier {
    pub fn new(jwks_uri: String, issuer: String, audience: String, max_refreshes_per_minute: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            jwks_uri: Some(jwks_uri),
            issuer,
            audience,
            algorithms: vec![Algorithm::RS256],
            keys: RwLock::new(JwkSet { keys: Vec::new() }),
            refreshes: Mutex::new(VecDeque::new()),
            max_refreshes_per_minute,
        }
    }

    /// Verifier over a fixed key set that never refetches.
    pub fn with_keys(keys: JwkSet, issuer: String, audience: String, algorithms: Vec<Algorithm>) -> Self {
        Self {
            http: reqwest::Client::new(),
            jwks_uri: None,
            issuer,
            audience,
            algorithms,
            keys: RwLock::new(keys),
            refreshes: Mutex::new(VecDeque::new()),
            max_refreshes_per_minute: 0,
        }
    }

    fn refresh_allowed(&self) -> bool {
        let Ok(mut recent) = self.refreshes.lock() else {
            return false;
        };
        let now = Instant::now();
        while recent
            .front()
            .is_some_and(|t| now.duration_since(*t) >= REFRESH_WINDOW)
        {
            recent.pop_front();
        }
        if recent.len() >= self.max_refreshes_per_minute as usize {
            return false;
        }
        recent.push_back(now);
        true
    }

    async fn refresh_keys(&self) -> Result<(), AuthError> {
        let Some(uri) = &self.jwks_uri else {
            return Ok(());
        };
        if !self.refresh_allowed() {
            tracing::debug!("JWKS refresh rate limited");
            return Ok(());
        }
        tracing::info!("Fetching signing keys from {}", uri);
        let set: JwkSet = self
            .http
            .get(uri)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;
        *self.keys.write().await = set;
        Ok(())
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(jwk) = self.keys.read().await.find(kid) {
            return DecodingKey::from_jwk(jwk).map_err(|e| AuthError::InvalidToken(e.to_string()));
        }
        self.refresh_keys().await?;
        let keys = self.keys.read().await;
        let jwk = keys
            .find(kid)
            .ok_or_else(|| AuthError::InvalidToken(format!("unknown signing key {kid}")))?;
        DecodingKey::from_jwk(jwk).map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

#[async_trait::async_trait]
impl IdentityVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        if !self.algorithms.contains(&header.alg) {
            return Err(AuthError::InvalidToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("token has no kid".to_string()))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        Ok(VerifiedIdentity {
            identity: data.claims.sub,
            display_name: data.claims.name,
            contact_address: data.claims.email,
        })
    }
}

pub fn extract_bearer_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiErrorResponse> {
    let token = extract_bearer_from_headers(req.headers())
        .ok_or_else(|| ApiErrorResponse::from(ApiError::auth(&AuthError::MissingCredential)))?;

    let identity = state.verifier.verify(&token).await.map_err(|e| {
        tracing::warn!("Rejected credential: {}", e);
        ApiErrorResponse::from(ApiError::auth(&e))
    })?;

    tracing::debug!(identity = %identity.identity, "Authenticated request");
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use jsonwebtoken::{encode, get_current_timestamp, EncodingKey, Header};
    use serde::Serialize;

    const SECRET: &[u8] = b"abcdefghijklmnopqrstuvwx";
    const ISSUER: &str = "https://tenant.auth0.com/";
    const AUDIENCE: &str = "https://api.finsight";

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        email: Option<&'a str>,
        aud: &'a str,
        iss: &'a str,
        exp: u64,
    }

    fn key_set() -> JwkSet {
        serde_json::from_value(serde_json::json!({
            "keys": [{
                "kty": "oct",
                "kid": "k1",
                "alg": "HS256",
                "k": "YWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4"
            }]
        }))
        .unwrap()
    }

    fn verifier() -> JwksVerifier {
        JwksVerifier::with_keys(
            key_set(),
            ISSUER.to_string(),
            AUDIENCE.to_string(),
            vec![Algorithm::HS256],
        )
    }

    fn token(kid: &str, aud: &str, exp: u64) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(kid.to_string());
        let claims = TestClaims {
            sub: "auth0|user-1",
            email: Some("user@example.com"),
            aud,
            iss: ISSUER,
            exp,
        };
        encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    #[tokio::test]
    async fn accepts_valid_token() {
        let identity = verifier()
            .verify(&token("k1", AUDIENCE, get_current_timestamp() + 600))
            .await
            .unwrap();
        assert_eq!(identity.identity, "auth0|user-1");
        assert_eq!(identity.contact_address.as_deref(), Some("user@example.com"));
        assert!(identity.display_name.is_none());
    }

    #[tokio::test]
    async fn rejects_wrong_audience() {
        let err = verifier()
            .verify(&token("k1", "https://other", get_current_timestamp() + 600))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let err = verifier()
            .verify(&token("k1", AUDIENCE, get_current_timestamp() - 3600))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn rejects_unknown_key_id() {
        let err = verifier()
            .verify(&token("k2", AUDIENCE, get_current_timestamp() + 600))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(msg) if msg.contains("k2")));
    }

    #[tokio::test]
    async fn rejects_disallowed_algorithm() {
        let strict = JwksVerifier::with_keys(
            key_set(),
            ISSUER.to_string(),
            AUDIENCE.to_string(),
            vec![Algorithm::RS256],
        );
        let err = strict
            .verify(&token("k1", AUDIENCE, get_current_timestamp() + 600))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn rejects_garbage() {
        let err = verifier().verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn unconfigured_verifier_rejects() {
        let err = UnconfiguredVerifier.verify("anything").await.unwrap_err();
        assert!(matches!(err, AuthError::NotConfigured));
    }

    #[test]
    fn refresh_is_rate_limited() {
        let v = JwksVerifier::new(
            "https://tenant.auth0.com/.well-known/jwks.json".to_string(),
            ISSUER.to_string(),
            AUDIENCE.to_string(),
            2,
        );
        assert!(v.refresh_allowed());
        assert!(v.refresh_allowed());
        assert!(!v.refresh_allowed());
    }

    #[test]
    fn extract_bearer_from_headers_valid() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer my-token".parse().unwrap());
        assert_eq!(
            extract_bearer_from_headers(&headers),
            Some("my-token".to_string())
        );
    }

    #[test]
    fn extract_bearer_from_headers_missing_or_malformed() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_from_headers(&headers), None);
        headers.insert("authorization", "Basic abc123".parse().unwrap());
        assert_eq!(extract_bearer_from_headers(&headers), None);
        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert_eq!(extract_bearer_from_headers(&headers), None);
    }
}
