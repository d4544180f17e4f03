// src/uma/client.rs

use super::claims::{NeedInfoHandler, NeedInfoTicket};
use super::TokenRequest;
use crate::config::UmaConfig;
use crate::dpop::DpopManager;
use crate::error::{Result, UmaError};
use crate::expiry::{parse_cache_control, Expiring, PerEntryTtl};
use crate::model::{ErrorResponse, TokenResponse, UmaMetadata};
use moka::future::Cache;
use once_cell::sync::OnceCell;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, info, instrument};
use url::Url;

const DISCOVERY_PATH: &str = ".well-known/uma2-configuration";
const JSON: &str = "application/json";
const DPOP: &str = "DPoP";

/// A client for an UMA authorization server.
///
/// Every operation exists in an `async` form and a blocking form running the same code.
/// The blocking form drives its own single-threaded runtime, created on first use, and must
/// not be called from within an async context.
#[derive(Clone)]
pub struct UmaClient {
    // The client is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    config: UmaConfig,
    // Cache stores authorization server URI -> discovery document.
    metadata_cache: Cache<Url, Expiring<Arc<UmaMetadata>>>,
    runtime: OnceCell<Runtime>,
}

impl Default for UmaClient {
    fn default() -> Self {
        Self::new(UmaConfig::default())
    }
}

impl UmaClient {
    pub fn new(config: UmaConfig) -> Self {
        Self::with_http_client(reqwest::Client::new(), config)
    }

    /// Creates a client using an externally configured HTTP client.
    pub fn with_http_client(http_client: reqwest::Client, config: UmaConfig) -> Self {
        let metadata_cache = Cache::builder()
            .max_capacity(100)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            inner: Arc::new(Inner {
                http_client,
                config,
                metadata_cache,
                runtime: OnceCell::new(),
            }),
        }
    }

    pub fn config(&self) -> &UmaConfig {
        &self.inner.config
    }

    /// Fetches (or returns the cached) discovery document of an authorization server.
    ///
    /// # Errors
    ///
    /// `Discovery` on a non-2xx response or a body that is not a discovery document,
    /// `Transport` if the server cannot be reached.
    #[instrument(skip(self, as_uri), fields(as_uri = %as_uri), err)]
    pub async fn metadata_async(&self, as_uri: &Url) -> Result<UmaMetadata, UmaError> {
        if let Some(entry) = self.inner.metadata_cache.get(as_uri).await {
            debug!("UMA metadata cache hit.");
            return Ok(entry.value.as_ref().clone());
        }

        let url = metadata_url(as_uri)?;
        debug!("Performing UMA discovery at: {}", url);
        let response = self
            .inner
            .http_client
            .get(url)
            .header(ACCEPT, JSON)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UmaError::Discovery {
                message: format!("Unexpected response code during UMA discovery: {}", status.as_u16()),
                status: Some(status.as_u16()),
            });
        }

        let ttl = parse_cache_control(response.headers())
            .unwrap_or_else(|| self.inner.config.metadata_cache_ttl());
        let body = response.bytes().await?;
        let metadata: UmaMetadata = serde_json::from_slice(&body).map_err(|e| UmaError::Discovery {
            message: format!("Error while processing UMA metadata response: {}", e),
            status: Some(status.as_u16()),
        })?;

        debug!("Caching UMA metadata with TTL: {:?}", ttl);
        self.inner
            .metadata_cache
            .insert(as_uri.clone(), Expiring::new(Arc::new(metadata.clone()), ttl))
            .await;
        Ok(metadata)
    }

    /// Blocking form of [`UmaClient::metadata_async`].
    pub fn metadata(&self, as_uri: &Url) -> Result<UmaMetadata, UmaError> {
        self.block_on(self.metadata_async(as_uri))?
    }

    /// Exchanges a permission ticket for an access token at `token_endpoint`.
    ///
    /// Each `need_info` answer carrying a fresh ticket is passed to `handler`; the claim
    /// token it returns is pushed with the new ticket in the next request. At most
    /// `max_depth` requests are sent in total.
    ///
    /// # Errors
    ///
    /// * `InvalidGrant`, `RequestDenied`, `InvalidScope` for the matching `error` code,
    ///   whatever the status.
    /// * `RequestDenied` for a `need_info` without a ticket, or when the handler gives up.
    /// * `DepthExceeded` once the request budget is spent.
    /// * `Unexpected` for any other error body, including one that is not JSON.
    /// * Errors raised by `handler`, unchanged.
    pub async fn token_async(
        &self,
        token_endpoint: &Url,
        request: TokenRequest,
        handler: &dyn NeedInfoHandler,
    ) -> Result<TokenResponse> {
        self.negotiate(token_endpoint, request, handler, None).await
    }

    /// Like [`UmaClient::token_async`], with every token request carrying a fresh `DPoP`
    /// proof signed with the `algorithm` key of `dpop`.
    pub async fn dpop_token_async(
        &self,
        token_endpoint: &Url,
        request: TokenRequest,
        handler: &dyn NeedInfoHandler,
        dpop: &DpopManager,
        algorithm: &str,
    ) -> Result<TokenResponse> {
        self.negotiate(token_endpoint, request, handler, Some((dpop, algorithm))).await
    }

    #[instrument(skip(self, token_endpoint, request, handler, proof), fields(token_endpoint = %token_endpoint), err)]
    async fn negotiate(
        &self,
        token_endpoint: &Url,
        request: TokenRequest,
        handler: &dyn NeedInfoHandler,
        proof: Option<(&DpopManager, &str)>,
    ) -> Result<TokenResponse> {
        let max_depth = self.inner.config.max_depth;
        let mut request = request;
        let mut count: u32 = 1;

        loop {
            if count > max_depth {
                return Err(UmaError::DepthExceeded { max_depth }.into());
            }

            debug!(round = count, "Sending UMA token request.");
            let mut builder = self
                .inner
                .http_client
                .post(token_endpoint.clone())
                .header(ACCEPT, JSON);
            if let Some((dpop, algorithm)) = proof {
                builder = builder.header(DPOP, dpop.generate_proof(algorithm, token_endpoint, "POST")?);
            }
            let response = builder
                .form(&request.form_parameters())
                .send()
                .await
                .map_err(UmaError::from)?;
            let status = response.status();
            let body = response.bytes().await.map_err(UmaError::from)?;

            // Successful terminal state
            if status.is_success() {
                let token = serde_json::from_slice::<TokenResponse>(&body).map_err(|e| UmaError::Unexpected {
                    status: status.as_u16(),
                    error: "Unexpected".to_string(),
                    error_description: Some(e.to_string()),
                })?;
                info!(rounds = count, token_type = %token.token_type, "UMA negotiation succeeded.");
                return Ok(token);
            }

            let need_info = need_info_or_error(status, &body)?;
            debug!(
                round = count,
                required_claims = need_info.required_claims.len(),
                "Authorization server requested more claims."
            );

            let claim_token = handler.handle(&need_info).await?.ok_or_else(|| UmaError::RequestDenied {
                status: Some(status.as_u16()),
                reason: "No claims were gathered for the need_info response".to_string(),
            })?;

            request = request.next_round(need_info.ticket, claim_token);
            count += 1;
        }
    }

    /// Blocking form of [`UmaClient::token_async`].
    pub fn token(
        &self,
        token_endpoint: &Url,
        request: TokenRequest,
        handler: &dyn NeedInfoHandler,
    ) -> Result<TokenResponse> {
        self.block_on(self.token_async(token_endpoint, request, handler))?
    }

    fn block_on<F: Future>(&self, future: F) -> Result<F::Output, UmaError> {
        let runtime = self
            .inner
            .runtime
            .get_or_try_init(|| {
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
            })
            .map_err(UmaError::Runtime)?;
        Ok(runtime.block_on(future))
    }
}

fn metadata_url(as_uri: &Url) -> Result<Url, UmaError> {
    let mut base = as_uri.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(DISCOVERY_PATH)
        .map_err(|e| UmaError::Discovery { message: e.to_string(), status: None })
}

/// Maps a non-2xx token response to the next `need_info` round, or to its terminal error.
fn need_info_or_error(status: StatusCode, body: &[u8]) -> Result<NeedInfoTicket, UmaError> {
    let code = status.as_u16();
    // Attempt to read the error response as JSON
    let Some(err) = ErrorResponse::parse(body) else {
        return Err(UmaError::Unexpected {
            status: code,
            error: "Unexpected".to_string(),
            error_description: None,
        });
    };

    match err.error.as_deref() {
        Some("need_info") => NeedInfoTicket::from_error_response(&err).ok_or_else(|| UmaError::RequestDenied {
            status: Some(code),
            reason: "Missing ticket in need_info response".to_string(),
        }),
        Some("request_denied") => Err(UmaError::RequestDenied {
            status: Some(code),
            reason: "The client is not authorized for the requested permissions".to_string(),
        }),
        Some("invalid_grant") => Err(UmaError::InvalidGrant { status: code }),
        Some("invalid_scope") => Err(UmaError::InvalidScope { status: code }),
        other => Err(UmaError::Unexpected {
            status: code,
            error: other.unwrap_or("Unexpected").to_string(),
            error_description: err.error_description,
        }),
    }
}
