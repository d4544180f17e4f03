// src/config.rs

use crate::error::OpenIdError;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Settings for the UMA negotiation client.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UmaConfig {
    /// The maximum number of token requests in a single negotiation, counting the
    /// initial ticket exchange. Zero forbids negotiation altogether.
    pub max_depth: u32,
    /// How long a discovery document is cached if no `Cache-Control` header is present.
    pub metadata_cache_ttl_seconds: u64,
}

impl Default for UmaConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            metadata_cache_ttl_seconds: 60 * 60,
        }
    }
}

impl UmaConfig {
    pub fn metadata_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.metadata_cache_ttl_seconds)
    }
}

/// Controls how an ID token is checked when a session is built from it.
///
/// Signature verification only happens when a JWKS location is configured, and the
/// audience is only checked when an expected audience is set.
#[derive(Clone, Debug)]
pub struct OpenIdVerificationConfig {
    /// Tolerance applied to `exp` (and `nbf`). Defaults to 60 seconds.
    pub exp_grace_period: Duration,
    /// The audience the token must have been issued for.
    pub expected_audience: Option<String>,
    /// Where to fetch the provider's signing keys from.
    pub jwks_uri: Option<Url>,
    /// How long fetched keys are cached if no `Cache-Control` header is present.
    pub jwks_cache_ttl: Duration,
}

impl Default for OpenIdVerificationConfig {
    fn default() -> Self {
        Self {
            exp_grace_period: Duration::from_secs(60),
            expected_audience: None,
            jwks_uri: None,
            jwks_cache_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl OpenIdVerificationConfig {
    pub fn builder() -> OpenIdVerificationConfigBuilder {
        OpenIdVerificationConfigBuilder::default()
    }
}

/// A builder for creating an `OpenIdVerificationConfig` instance.
#[derive(Default)]
pub struct OpenIdVerificationConfigBuilder {
    exp_grace_period: Option<Duration>,
    expected_audience: Option<String>,
    jwks_uri: Option<String>,
    jwks_cache_ttl: Option<Duration>,
}

impl OpenIdVerificationConfigBuilder {
    /// Sets the grace period applied to the `exp` claim.
    pub fn exp_grace_period(mut self, grace: Duration) -> Self {
        self.exp_grace_period = Some(grace);
        self
    }

    /// Requires the token's `aud` claim to contain this value.
    pub fn expected_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    /// Enables signature verification against the given JWKS endpoint.
    pub fn jwks_uri(mut self, url: &str) -> Self {
        self.jwks_uri = Some(url.to_string());
        self
    }

    /// Sets the fallback cache TTL for the JWKS.
    pub fn jwks_cache_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_cache_ttl = Some(ttl);
        self
    }

    /// Consumes the builder and returns an `OpenIdVerificationConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if the JWKS location is not a valid URL.
    pub fn build(self) -> Result<OpenIdVerificationConfig, OpenIdError> {
        let defaults = OpenIdVerificationConfig::default();
        let jwks_uri = self
            .jwks_uri
            .map(|u| Url::parse(&u).map_err(|e| OpenIdError::InvalidUrl(e.to_string())))
            .transpose()?;

        Ok(OpenIdVerificationConfig {
            exp_grace_period: self.exp_grace_period.unwrap_or(defaults.exp_grace_period),
            expected_audience: self.expected_audience,
            jwks_uri,
            jwks_cache_ttl: self.jwks_cache_ttl.unwrap_or(defaults.jwks_cache_ttl),
        })
    }
}

/// Priorities and exclusions for the authenticator registry.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub uma_priority: i32,
    pub bearer_priority: i32,
    /// Schemes that are never registered, compared case-insensitively.
    pub prohibited_schemes: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            uma_priority: 100,
            bearer_priority: 50,
            prohibited_schemes: vec!["Basic".to_string(), "Digest".to_string()],
        }
    }
}

impl RegistryConfig {
    pub fn is_prohibited(&self, scheme: &str) -> bool {
        self.prohibited_schemes
            .iter()
            .any(|p| p.eq_ignore_ascii_case(scheme))
    }
}
