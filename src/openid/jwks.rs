// src/openid/jwks.rs

use crate::error::OpenIdError;
use crate::expiry::{parse_cache_control, Expiring, PerEntryTtl};
use crate::model::{JsonWebKey, JsonWebKeySet};
use jsonwebtoken::DecodingKey;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

/// A client for fetching and caching the JSON Web Keys (JWKs) an OpenID provider signs
/// ID tokens with.
#[derive(Clone)]
pub struct JwksClient {
    // The client is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    jwks_uri: Url,
    default_cache_ttl: Duration,
    // Cache stores `kid` -> `DecodingKey`.
    key_cache: Cache<String, Expiring<Arc<DecodingKey>>>,
}

impl JwksClient {
    pub fn new(jwks_uri: Url, default_cache_ttl: Duration) -> Self {
        Self::with_http_client(reqwest::Client::new(), jwks_uri, default_cache_ttl)
    }

    pub fn with_http_client(http_client: reqwest::Client, jwks_uri: Url, default_cache_ttl: Duration) -> Self {
        let key_cache = Cache::builder()
            .max_capacity(100) // Max 100 keys, should be more than enough.
            .expire_after(PerEntryTtl)
            .build();
        Self {
            inner: Arc::new(Inner {
                http_client,
                jwks_uri,
                default_cache_ttl,
                key_cache,
            }),
        }
    }

    pub fn jwks_uri(&self) -> &Url {
        &self.inner.jwks_uri
    }

    /// Retrieves a decoding key for the given Key ID (`kid`).
    ///
    /// It first checks the in-memory cache. On a miss it fetches the entire JWKS from the
    /// provider, populates the cache, and then returns the key.
    #[instrument(skip(self), err)]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<DecodingKey>, OpenIdError> {
        if let Some(entry) = self.inner.key_cache.get(kid).await {
            debug!("JWK cache hit for kid: {}", kid);
            return Ok(entry.value);
        }

        debug!("JWK cache miss for kid: {}. Fetching from provider.", kid);
        self.fetch_and_cache_keys().await?;

        // Try getting from the cache again after fetching.
        self.inner
            .key_cache
            .get(kid)
            .await
            .map(|entry| entry.value)
            .ok_or_else(|| OpenIdError::KeyNotFound(kid.to_string()))
    }

    /// Fetches the JWKS from the provider and populates the cache.
    /// Returns the cache TTL for the fetched keys.
    #[instrument(skip(self), err)]
    async fn fetch_and_cache_keys(&self) -> Result<Duration, OpenIdError> {
        let response = self
            .inner
            .http_client
            .get(self.inner.jwks_uri.clone())
            .send()
            .await?
            .error_for_status()?;

        let cache_ttl = parse_cache_control(response.headers()).unwrap_or(self.inner.default_cache_ttl);

        let jwks: JsonWebKeySet = response.json().await?;

        debug!("Successfully fetched {} keys. Caching with TTL: {:?}", jwks.keys.len(), cache_ttl);

        for jwk in jwks.keys {
            let Some(kid) = jwk.kid.clone() else {
                debug!("Skipping JWK without a 'kid'.");
                continue;
            };
            match decoding_key(&jwk) {
                Ok(key) => {
                    self.inner
                        .key_cache
                        .insert(kid, Expiring::new(Arc::new(key), cache_ttl))
                        .await;
                }
                Err(e) => warn!("Ignoring unusable JWK {}: {}", kid, e),
            }
        }

        Ok(cache_ttl)
    }
}

/// Builds a verification key from an RSA or EC P-256 JWK.
fn decoding_key(jwk: &JsonWebKey) -> Result<DecodingKey, OpenIdError> {
    match jwk.kty.as_str() {
        "RSA" => {
            // Ensure n and e are present for RSA keys
            let n = jwk.n.as_deref().ok_or_else(|| OpenIdError::InvalidKeyFormat("RSA key missing 'n' component".to_string()))?;
            let e = jwk.e.as_deref().ok_or_else(|| OpenIdError::InvalidKeyFormat("RSA key missing 'e' component".to_string()))?;
            Ok(DecodingKey::from_rsa_components(n, e)?)
        }
        "EC" => {
            if jwk.crv.as_deref() != Some("P-256") {
                return Err(OpenIdError::InvalidKeyFormat(format!("Unsupported EC curve: {:?}", jwk.crv)));
            }
            let x = jwk.x.as_deref().ok_or_else(|| OpenIdError::InvalidKeyFormat("EC key missing 'x' component".to_string()))?;
            let y = jwk.y.as_deref().ok_or_else(|| OpenIdError::InvalidKeyFormat("EC key missing 'y' component".to_string()))?;
            Ok(DecodingKey::from_ec_components(x, y)?)
        }
        other => Err(OpenIdError::InvalidKeyFormat(format!("Unsupported key type: {}", other))),
    }
}
