// src/authenticator/uma.rs

use super::{AuthenticationMechanism, Authenticator};
use crate::challenge::Challenge;
use crate::config::RegistryConfig;
use crate::credential::{expiration_from, Credential, Request, ID_TOKEN};
use crate::error::{Result, UmaError};
use crate::session::Session;
use crate::uma::{ClaimToken, NeedInfoHandlers, TokenRequest, UmaClient};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

const AS_URI: &str = "as_uri";
const TICKET: &str = "ticket";
const DPOP: &str = "DPoP";

/// Answers `UMA` challenges by exchanging the challenge ticket at the authorization server.
#[derive(Clone)]
pub struct UmaMechanism {
    client: UmaClient,
    handlers: Arc<NeedInfoHandlers>,
    priority: i32,
}

impl UmaMechanism {
    pub fn new(client: UmaClient, handlers: Arc<NeedInfoHandlers>) -> Self {
        Self::from_config(client, handlers, &RegistryConfig::default())
    }

    /// Uses the UMA priority of `config`.
    pub fn from_config(client: UmaClient, handlers: Arc<NeedInfoHandlers>, config: &RegistryConfig) -> Self {
        Self::with_priority(client, handlers, config.uma_priority)
    }

    pub fn with_priority(client: UmaClient, handlers: Arc<NeedInfoHandlers>, priority: i32) -> Self {
        Self { client, handlers, priority }
    }
}

impl AuthenticationMechanism for UmaMechanism {
    fn scheme(&self) -> &str {
        "UMA"
    }

    fn authenticator(&self, challenge: &Challenge) -> Result<Box<dyn Authenticator>> {
        let invalid = || UmaError::InvalidChallenge(challenge.to_string());
        if !challenge.scheme().eq_ignore_ascii_case("UMA") {
            return Err(invalid().into());
        }
        let as_uri = challenge
            .parameter(AS_URI)
            .and_then(|uri| Url::parse(uri).ok())
            .ok_or_else(invalid)?;
        let ticket = challenge.parameter(TICKET).ok_or_else(invalid)?;

        Ok(Box::new(UmaAuthenticator {
            client: self.client.clone(),
            handlers: Arc::clone(&self.handlers),
            as_uri,
            ticket: ticket.to_string(),
            priority: self.priority,
        }))
    }
}

/// Negotiates one UMA ticket.
pub struct UmaAuthenticator {
    client: UmaClient,
    handlers: Arc<NeedInfoHandlers>,
    as_uri: Url,
    ticket: String,
    priority: i32,
}

impl UmaAuthenticator {
    pub fn as_uri(&self) -> &Url {
        &self.as_uri
    }

    pub fn ticket(&self) -> &str {
        &self.ticket
    }
}

#[async_trait]
impl Authenticator for UmaAuthenticator {
    fn name(&self) -> &str {
        "UMA"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    #[instrument(skip_all, fields(as_uri = %self.as_uri), err)]
    async fn authenticate(
        &self,
        session: &dyn Session,
        _request: &Request,
        algorithms: &BTreeSet<String>,
    ) -> Result<Credential> {
        // The session's ID token is the initial claim token, if it has one.
        let id_token = session.credential(ID_TOKEN).await?;
        let principal = id_token.as_ref().and_then(|c| c.principal().cloned());

        let mut request = TokenRequest::new(self.ticket.clone());
        if let Some(credential) = &id_token {
            request = request.with_claim_token(ClaimToken::of(credential.token(), ID_TOKEN));
        }

        let metadata = self.client.metadata_async(&self.as_uri).await?;

        // First algorithm the authorization server supports that the resource server
        // also advertised and the session holds a key for.
        let candidates: Vec<String> = metadata
            .dpop_signing_alg_values_supported
            .iter()
            .filter(|alg| algorithms.contains(*alg))
            .cloned()
            .collect();
        let binding = session.select_thumbprint(&candidates).and_then(|jkt| {
            let dpop = session.dpop()?;
            let algorithm = dpop.lookup_algorithm(&jkt)?.to_string();
            Some((dpop, algorithm, jkt))
        });

        let token = match &binding {
            Some((dpop, algorithm, _)) => {
                debug!(algorithm = %algorithm, "Proving possession at the UMA token endpoint.");
                self.client
                    .dpop_token_async(&metadata.token_endpoint, request, self.handlers.as_ref(), dpop, algorithm)
                    .await?
            }
            None => {
                self.client
                    .token_async(&metadata.token_endpoint, request, self.handlers.as_ref())
                    .await?
            }
        };
        debug!(token_type = %token.token_type, "Obtained UMA access token.");

        // Only a DPoP token is bound to the key that signed the token request.
        let proof_thumbprint = if token.token_type.eq_ignore_ascii_case(DPOP) {
            let jkt = binding
                .map(|(_, _, jkt)| jkt)
                .or_else(|| id_token.as_ref().and_then(|c| c.proof_thumbprint().map(str::to_string)));
            if jkt.is_none() {
                warn!("Received a DPoP token without a key to prove possession with.");
            }
            jkt
        } else {
            None
        };

        Ok(Credential::new(
            token.token_type,
            self.as_uri.clone(),
            token.access_token,
            expiration_from(token.expires_in),
            principal,
            proof_thumbprint,
        ))
    }
}
