// src/session/openid.rs

use super::{select_thumbprint, CredentialCache, Session};
use crate::authenticator::Authenticator;
use crate::config::OpenIdVerificationConfig;
use crate::credential::{Credential, Request, ID_TOKEN};
use crate::dpop::DpopManager;
use crate::error::{Error, OpenIdError, Result};
use crate::openid::{IdToken, IdTokenVerifier, OpenIdProvider, TokenRequest};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use url::Url;

/// A session backed by an OpenID Connect ID token.
///
/// The token is either supplied up front, or fetched lazily from a provider with the
/// client-credentials grant and fetched again once it has expired beyond the grace period.
pub struct OpenIdSession {
    id: String,
    schemes: Vec<String>,
    source: Source,
    grace_period: Duration,
    dpop: Option<Arc<DpopManager>>,
    cache: CredentialCache,
}

enum Source {
    IdToken(IdToken),
    ClientCredentials {
        provider: OpenIdProvider,
        request: TokenRequest,
        verifier: IdTokenVerifier,
        // Held across the fetch so concurrent first uses share one token request.
        token: Mutex<Option<IdToken>>,
    },
}

impl OpenIdSession {
    /// Builds a session from a raw ID token, verifying it with a fresh verifier.
    pub async fn of_id_token(token: &str, config: OpenIdVerificationConfig) -> Result<Self> {
        Self::of_id_token_with(token, &IdTokenVerifier::new(config)).await
    }

    /// Builds a session from a raw ID token with a shared verifier and its key cache.
    pub async fn of_id_token_with(token: &str, verifier: &IdTokenVerifier) -> Result<Self> {
        let id_token = verifier.verify(token).await?;
        debug!(issuer = %id_token.issuer(), "Created OpenID session from an ID token.");
        Ok(Self {
            id: id_token.session_id(),
            schemes: bearer(),
            source: Source::IdToken(id_token),
            grace_period: verifier.config().exp_grace_period,
            dpop: None,
            cache: CredentialCache::default(),
        })
    }

    /// Builds a session that authenticates with the client-credentials grant on first use.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `request` is not a client-credentials request.
    pub fn of_client_credentials(
        provider: OpenIdProvider,
        request: TokenRequest,
        config: OpenIdVerificationConfig,
    ) -> Result<Self> {
        if !matches!(request, TokenRequest::ClientCredentials { .. }) {
            return Err(Error::InvalidArgument(format!(
                "Expected a client_credentials request, got {}",
                request.grant_type()
            )));
        }
        let material = format!("{}|{}", provider.issuer(), request.client_id());
        Ok(Self {
            id: format!("{:x}", Sha256::digest(material.as_bytes())),
            schemes: bearer(),
            grace_period: config.exp_grace_period,
            source: Source::ClientCredentials {
                provider,
                request,
                verifier: IdTokenVerifier::new(config),
                token: Mutex::new(None),
            },
            dpop: None,
            cache: CredentialCache::default(),
        })
    }

    pub fn with_dpop(mut self, dpop: Arc<DpopManager>) -> Self {
        self.dpop = Some(dpop);
        self
    }

    fn is_usable(&self, id_token: &IdToken) -> bool {
        // A deadline past the clock's range never arrives.
        id_token
            .expiration()
            .checked_add(self.grace_period)
            .map_or(true, |deadline| SystemTime::now() < deadline)
    }

    async fn id_token(&self) -> Result<Option<IdToken>> {
        match &self.source {
            Source::IdToken(id_token) => Ok(Some(id_token.clone()).filter(|t| self.is_usable(t))),
            Source::ClientCredentials { provider, request, verifier, token } => {
                let mut current = token.lock().await;
                if let Some(id_token) = current.as_ref().filter(|t| self.is_usable(t)) {
                    return Ok(Some(id_token.clone()));
                }
                let fetched = fetch_id_token(provider, request, verifier).await?;
                *current = Some(fetched.clone());
                Ok(Some(fetched))
            }
        }
    }
}

#[instrument(skip_all, fields(issuer = %provider.issuer()), err)]
async fn fetch_id_token(
    provider: &OpenIdProvider,
    request: &TokenRequest,
    verifier: &IdTokenVerifier,
) -> Result<IdToken> {
    let response = provider.token(request).await?;
    let raw = response.id_token.ok_or(OpenIdError::MissingIdToken)?;
    let id_token = verifier.verify(&raw).await?;
    info!("Fetched an ID token with the client credentials grant.");
    Ok(id_token)
}

fn bearer() -> Vec<String> {
    vec!["Bearer".to_string()]
}

#[async_trait]
impl Session for OpenIdSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn supported_schemes(&self) -> &[String] {
        &self.schemes
    }

    async fn principal(&self) -> Result<Option<Url>> {
        Ok(self.id_token().await?.and_then(|t| t.principal()))
    }

    async fn credential(&self, name: &str) -> Result<Option<Credential>> {
        if name != ID_TOKEN {
            return Ok(None);
        }
        Ok(self.id_token().await?.map(|t| {
            Credential::new("Bearer", t.issuer().clone(), t.raw(), t.expiration(), t.principal(), None)
        }))
    }

    fn from_cache(&self, request: &Request) -> Option<Credential> {
        self.cache.get(request.uri())
    }

    async fn authenticate(
        &self,
        authenticator: &dyn Authenticator,
        request: &Request,
        algorithms: &BTreeSet<String>,
    ) -> Result<Option<Credential>> {
        let credential = authenticator.authenticate(self, request, algorithms).await?;
        debug!(authenticator = authenticator.name(), uri = %request.uri(), "Caching negotiated credential.");
        self.cache.insert(request.uri(), credential.clone());
        Ok(Some(credential))
    }

    fn select_thumbprint(&self, algorithms: &[String]) -> Option<String> {
        select_thumbprint(self.dpop.as_deref(), algorithms)
    }

    fn dpop(&self) -> Option<&DpopManager> {
        self.dpop.as_deref()
    }

    fn reset(&self) {
        self.cache.clear();
    }
}
