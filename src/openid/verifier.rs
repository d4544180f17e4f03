// src/openid/verifier.rs

use super::jwks::JwksClient;
use crate::config::OpenIdVerificationConfig;
use crate::error::OpenIdError;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};
use url::Url;

/// The claims of an ID token that a session is built from.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct IdTokenClaims {
    pub iss: Option<String>,
    pub sub: Option<String>,
    pub exp: Option<u64>,
    #[serde(default)]
    pub iat: Option<u64>,
    /// The Solid WebID of the subject, if the provider includes it.
    #[serde(default)]
    pub webid: Option<String>,
}

/// A verified ID token.
#[derive(Clone, Debug)]
pub struct IdToken {
    raw: String,
    // The `iss` claim exactly as issued; `issuer` may be normalized by URL parsing.
    issuer_claim: String,
    issuer: Url,
    subject: String,
    webid: Option<String>,
    expiration: SystemTime,
}

impl IdToken {
    /// The compact JWT, as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn issuer(&self) -> &Url {
        &self.issuer
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn webid(&self) -> Option<&str> {
        self.webid.as_deref()
    }

    pub fn expiration(&self) -> SystemTime {
        self.expiration
    }

    /// The WebID, or failing that the subject, when it is a URI.
    pub fn principal(&self) -> Option<Url> {
        self.webid
            .as_deref()
            .and_then(|w| Url::parse(w).ok())
            .or_else(|| Url::parse(&self.subject).ok())
    }

    /// The SHA-256 hex digest of the WebID, or of `iss|sub` without one.
    pub fn session_id(&self) -> String {
        let material = match &self.webid {
            Some(webid) => webid.clone(),
            None => format!("{}|{}", self.issuer_claim, self.subject),
        };
        format!("{:x}", Sha256::digest(material.as_bytes()))
    }
}

/// Verifies ID tokens according to an [`OpenIdVerificationConfig`].
///
/// Create it once and reuse it: it owns the JWKS client and its key cache.
#[derive(Clone)]
pub struct IdTokenVerifier {
    config: OpenIdVerificationConfig,
    // Only present if a JWKS location is configured.
    jwks_client: Option<JwksClient>,
}

impl IdTokenVerifier {
    pub fn new(config: OpenIdVerificationConfig) -> Self {
        let jwks_client = config
            .jwks_uri
            .clone()
            .map(|uri| JwksClient::new(uri, config.jwks_cache_ttl));
        Self { config, jwks_client }
    }

    pub fn config(&self) -> &OpenIdVerificationConfig {
        &self.config
    }

    /// Parses and validates an ID token.
    ///
    /// `iss`, `sub` and `exp` are required. `exp` is checked with the configured grace
    /// period. The signature is only checked when a JWKS location is configured, and the
    /// audience only when an expected audience is set.
    #[instrument(skip(self, token), err)]
    pub async fn verify(&self, token: &str) -> Result<IdToken, OpenIdError> {
        let header = decode_header(token)?;

        let (decoding_key, mut validation) = match &self.jwks_client {
            Some(jwks_client) => {
                let kid = header.kid.ok_or(OpenIdError::MissingKeyId)?;
                let key = (*jwks_client.get_key(&kid).await?).clone();
                (key, Validation::new(header.alg))
            }
            None => {
                debug!("No JWKS location configured; skipping ID token signature verification.");
                let mut validation = Validation::new(header.alg);
                validation.insecure_disable_signature_validation();
                (DecodingKey::from_secret(&[]), validation)
            }
        };

        validation.leeway = self.config.exp_grace_period.as_secs();
        validation.set_required_spec_claims(&["iss", "sub", "exp"]);
        match &self.config.expected_audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let claims = decode::<IdTokenClaims>(token, &decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::MissingRequiredClaim(claim) => OpenIdError::MissingClaim(claim.clone()),
                _ => OpenIdError::InvalidToken(e),
            })?
            .claims;

        let iss = claims.iss.ok_or_else(|| OpenIdError::MissingClaim("iss".to_string()))?;
        let subject = claims.sub.ok_or_else(|| OpenIdError::MissingClaim("sub".to_string()))?;
        let exp = claims.exp.ok_or_else(|| OpenIdError::MissingClaim("exp".to_string()))?;
        let issuer = Url::parse(&iss).map_err(|e| OpenIdError::InvalidUrl(format!("{}: {}", iss, e)))?;
        let expiration = UNIX_EPOCH
            .checked_add(Duration::from_secs(exp))
            .ok_or_else(|| OpenIdError::ClaimOutOfRange("exp".to_string()))?;

        Ok(IdToken {
            raw: token.to_string(),
            issuer_claim: iss,
            issuer,
            subject,
            webid: claims.webid,
            expiration,
        })
    }
}
