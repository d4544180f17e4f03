// src/openid/provider.rs

use super::request::{AuthorizationRequest, ClientAuthMethod, TokenRequest};
use crate::dpop::DpopManager;
use crate::error::OpenIdError;
use crate::model::{ErrorResponse, OpenIdMetadata, TokenResponse};
use base64::engine::{general_purpose::STANDARD, Engine};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use url::form_urlencoded::byte_serialize;
use url::Url;

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

/// A client for an OpenID provider: discovery, authorization URLs and the token endpoint.
#[derive(Clone)]
pub struct OpenIdProvider {
    inner: Arc<Inner>,
}

struct Inner {
    issuer: Url,
    http_client: reqwest::Client,
    dpop: Option<Arc<DpopManager>>,
    // Fetched once on first use.
    metadata: OnceCell<OpenIdMetadata>,
}

impl OpenIdProvider {
    pub fn new(issuer: Url) -> Self {
        Self::with_http_client(issuer, reqwest::Client::new())
    }

    pub fn with_http_client(issuer: Url, http_client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                issuer,
                http_client,
                dpop: None,
                metadata: OnceCell::new(),
            }),
        }
    }

    /// Sends a DPoP proof with token requests when the provider supports one of the
    /// manager's algorithms.
    pub fn with_dpop(self, dpop: Arc<DpopManager>) -> Self {
        let inner = Inner {
            issuer: self.inner.issuer.clone(),
            http_client: self.inner.http_client.clone(),
            dpop: Some(dpop),
            metadata: OnceCell::new(),
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn issuer(&self) -> &Url {
        &self.inner.issuer
    }

    /// Fetches the provider's discovery document, once.
    #[instrument(skip(self), fields(issuer = %self.inner.issuer), err)]
    pub async fn metadata(&self) -> Result<&OpenIdMetadata, OpenIdError> {
        self.inner
            .metadata
            .get_or_try_init(|| async {
                let url = discovery_url(&self.inner.issuer)?;
                debug!("Performing OIDC discovery at: {}", url);
                let response = self.inner.http_client.get(url).header(ACCEPT, "application/json").send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(OpenIdError::Discovery(format!(
                        "Unexpected response code during OpenID discovery: {}",
                        status.as_u16()
                    )));
                }
                let body = response.bytes().await?;
                serde_json::from_slice::<OpenIdMetadata>(&body)
                    .map_err(|e| OpenIdError::Discovery(format!("Error while processing OpenID metadata: {}", e)))
            })
            .await
    }

    /// The authorization endpoint URL a user agent should be sent to for `request`.
    pub async fn authorize_url(&self, request: &AuthorizationRequest) -> Result<Url, OpenIdError> {
        let metadata = self.metadata().await?;
        let mut url = metadata
            .authorization_endpoint
            .clone()
            .ok_or_else(|| OpenIdError::Discovery("The provider has no authorization endpoint".to_string()))?;
        url.query_pairs_mut().extend_pairs(request.query_parameters());
        Ok(url)
    }

    /// Posts `request` to the token endpoint.
    ///
    /// # Errors
    ///
    /// `TokenEndpoint` for an error response, `Discovery` if the document cannot be read.
    #[instrument(skip(self, request), fields(grant_type = request.grant_type()), err)]
    pub async fn token(&self, request: &TokenRequest) -> Result<TokenResponse, OpenIdError> {
        let metadata = self.metadata().await?;
        let token_endpoint = metadata.token_endpoint.clone();

        let mut form = request.grant_parameters();
        let mut builder = self.inner.http_client.post(token_endpoint.clone()).header(ACCEPT, "application/json");

        match request.client_authentication() {
            Some((secret, ClientAuthMethod::ClientSecretBasic)) => {
                builder = builder.header(AUTHORIZATION, basic_authorization(request.client_id(), secret));
            }
            Some((secret, ClientAuthMethod::ClientSecretPost)) => {
                form.push(("client_id", request.client_id().to_string()));
                form.push(("client_secret", secret.to_string()));
            }
            None => form.push(("client_id", request.client_id().to_string())),
        }

        if let Some(dpop) = &self.inner.dpop {
            let algorithms = dpop.algorithms();
            match metadata
                .dpop_signing_alg_values_supported
                .iter()
                .find(|alg| algorithms.contains(*alg))
            {
                Some(alg) => {
                    let proof = dpop.generate_proof(alg, &token_endpoint, "POST")?;
                    builder = builder.header("DPoP", proof);
                }
                None => warn!("The provider supports none of the configured DPoP algorithms."),
            }
        }

        let response = builder.form(&form).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if status.is_success() {
            return serde_json::from_slice::<TokenResponse>(&body).map_err(|e| OpenIdError::TokenEndpoint {
                status: status.as_u16(),
                error: "Unexpected".to_string(),
                error_description: Some(e.to_string()),
            });
        }

        let err = ErrorResponse::parse(&body).unwrap_or_default();
        Err(OpenIdError::TokenEndpoint {
            status: status.as_u16(),
            error: err.error.unwrap_or_else(|| "Unexpected".to_string()),
            error_description: err.error_description,
        })
    }
}

fn discovery_url(issuer: &Url) -> Result<Url, OpenIdError> {
    let mut base = issuer.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(DISCOVERY_PATH).map_err(|e| OpenIdError::InvalidUrl(e.to_string()))
}

// RFC 6749 §2.3.1: both parts are form-encoded before being joined.
fn basic_authorization(client_id: &str, secret: &str) -> String {
    let id: String = byte_serialize(client_id.as_bytes()).collect();
    let secret: String = byte_serialize(secret.as_bytes()).collect();
    format!("Basic {}", STANDARD.encode(format!("{}:{}", id, secret)))
}
