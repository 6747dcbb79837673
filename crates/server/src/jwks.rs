//! Cached JSON Web Key Set for verifying RS256-signed tokens.
//!
//! Both the provider's ID tokens and the identity backend's bearer tokens are
//! signed with rotating keys published as a JWKS document. Keys are cached for
//! a fixed interval; an unknown `kid` forces a refresh in case of rotation, at
//! most once per [`MIN_REFRESH_INTERVAL`].

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
/// Lower bound between fetches forced by an unknown `kid`.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("failed to fetch {uri}: {reason}")]
    Fetch { uri: String, reason: String },
    #[error("no signing key matches kid {0:?}")]
    KeyNotFound(String),
    #[error("unusable signing key: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kid: Option<String>,
    pub kty: String,
    pub n: Option<String>,
    pub e: Option<String>,
}

impl Jwks {
    pub fn find_key(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }
}

impl Jwk {
    pub fn to_decoding_key(&self) -> Result<DecodingKey, JwksError> {
        if self.kty != "RSA" {
            return Err(JwksError::InvalidKey(format!(
                "unsupported key type {}",
                self.kty
            )));
        }
        let n = self
            .n
            .as_deref()
            .ok_or_else(|| JwksError::InvalidKey("missing 'n' component".to_string()))?;
        let e = self
            .e
            .as_deref()
            .ok_or_else(|| JwksError::InvalidKey("missing 'e' component".to_string()))?;
        DecodingKey::from_rsa_components(n, e).map_err(|e| JwksError::InvalidKey(e.to_string()))
    }
}

pub struct JwksCache {
    uri: String,
    http: reqwest::Client,
    ttl: Duration,
    cached: RwLock<Option<(Jwks, Instant)>>,
}

impl JwksCache {
    pub fn new(uri: impl Into<String>, http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            uri: uri.into(),
            http,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Decoding key for `kid`. An unknown `kid` refreshes the key set, unless
    /// it was fetched less than [`MIN_REFRESH_INTERVAL`] ago.
    pub async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, JwksError> {
        let jwks = self.fresh_within(self.ttl).await?;
        if let Some(key) = jwks.find_key(kid) {
            return key.to_decoding_key();
        }

        tracing::debug!(kid, uri = %self.uri, "unknown kid, refreshing key set");
        let jwks = self.fresh_within(MIN_REFRESH_INTERVAL).await?;
        jwks.find_key(kid)
            .ok_or_else(|| JwksError::KeyNotFound(kid.to_string()))?
            .to_decoding_key()
    }

    /// Cached key set if it was fetched less than `max_age` ago, otherwise a
    /// freshly fetched one. Callers queue on the write lock, so concurrent
    /// misses share a single fetch.
    async fn fresh_within(&self, max_age: Duration) -> Result<Jwks, JwksError> {
        {
            let guard = self.cached.read().await;
            if let Some((jwks, fetched_at)) = guard.as_ref()
                && fetched_at.elapsed() < max_age
            {
                return Ok(jwks.clone());
            }
        }

        let mut guard = self.cached.write().await;
        if let Some((jwks, fetched_at)) = guard.as_ref()
            && fetched_at.elapsed() < max_age
        {
            return Ok(jwks.clone());
        }
        let jwks = self.fetch().await?;
        *guard = Some((jwks.clone(), Instant::now()));
        Ok(jwks)
    }

    async fn fetch(&self) -> Result<Jwks, JwksError> {
        let fetch_error = |reason: String| JwksError::Fetch {
            uri: self.uri.clone(),
            reason,
        };
        let response = self
            .http
            .get(&self.uri)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP {}", response.status())));
        }
        let jwks = response
            .json::<Jwks>()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        tracing::debug!(uri = %self.uri, keys = jwks.keys.len(), "refreshed signing keys");
        Ok(jwks)
    }
}
