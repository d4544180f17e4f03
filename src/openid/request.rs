// src/openid/request.rs

use crate::error::{Error, Result};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use p256::elliptic_curve::rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// How a confidential client authenticates to the token endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// HTTP Basic with the form-encoded client id and secret.
    #[default]
    ClientSecretBasic,
    /// `client_id` and `client_secret` in the request body.
    ClientSecretPost,
}

impl ClientAuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientAuthMethod::ClientSecretBasic => "client_secret_basic",
            ClientAuthMethod::ClientSecretPost => "client_secret_post",
        }
    }
}

impl FromStr for ClientAuthMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "client_secret_basic" => Ok(ClientAuthMethod::ClientSecretBasic),
            "client_secret_post" => Ok(ClientAuthMethod::ClientSecretPost),
            other => Err(Error::InvalidArgument(format!("Unsupported client authentication method: {}", other))),
        }
    }
}

impl fmt::Display for ClientAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to an OpenID provider's token endpoint, one variant per grant type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenRequest {
    AuthorizationCode {
        client_id: String,
        code: String,
        code_verifier: String,
        redirect_uri: Url,
        /// Absent for public clients.
        client_secret: Option<String>,
        auth_method: ClientAuthMethod,
    },
    ClientCredentials {
        client_id: String,
        client_secret: String,
        auth_method: ClientAuthMethod,
        scopes: Vec<String>,
    },
}

impl TokenRequest {
    pub fn builder() -> TokenRequestBuilder {
        TokenRequestBuilder::default()
    }

    pub fn grant_type(&self) -> &'static str {
        match self {
            TokenRequest::AuthorizationCode { .. } => "authorization_code",
            TokenRequest::ClientCredentials { .. } => "client_credentials",
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            TokenRequest::AuthorizationCode { client_id, .. } | TokenRequest::ClientCredentials { client_id, .. } => {
                client_id
            }
        }
    }

    /// The client secret and how to present it, if the client is confidential.
    pub(crate) fn client_authentication(&self) -> Option<(&str, ClientAuthMethod)> {
        match self {
            TokenRequest::AuthorizationCode { client_secret, auth_method, .. } => {
                client_secret.as_deref().map(|s| (s, *auth_method))
            }
            TokenRequest::ClientCredentials { client_secret, auth_method, .. } => Some((client_secret, *auth_method)),
        }
    }

    /// The grant parameters of the form body, without client authentication.
    pub(crate) fn grant_parameters(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![("grant_type", self.grant_type().to_string())];
        match self {
            TokenRequest::AuthorizationCode { code, code_verifier, redirect_uri, .. } => {
                form.push(("code", code.clone()));
                form.push(("code_verifier", code_verifier.clone()));
                form.push(("redirect_uri", redirect_uri.to_string()));
            }
            TokenRequest::ClientCredentials { scopes, .. } => {
                if !scopes.is_empty() {
                    form.push(("scope", scopes.join(" ")));
                }
            }
        }
        form
    }
}

/// A builder for creating a `TokenRequest`. Required fields are checked by `build`.
#[derive(Default)]
pub struct TokenRequestBuilder {
    code: Option<String>,
    code_verifier: Option<String>,
    redirect_uri: Option<Url>,
    client_secret: Option<String>,
    auth_method: Option<String>,
    scopes: Vec<String>,
}

impl TokenRequestBuilder {
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }

    pub fn redirect_uri(mut self, uri: Url) -> Self {
        self.redirect_uri = Some(uri);
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// `client_secret_basic` (the default) or `client_secret_post`.
    pub fn auth_method(mut self, method: impl Into<String>) -> Self {
        self.auth_method = Some(method.into());
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Consumes the builder and returns a `TokenRequest` for `grant_type`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown grant type or authentication method, or when a
    /// field the grant requires is missing.
    pub fn build(self, grant_type: &str, client_id: impl Into<String>) -> Result<TokenRequest> {
        let auth_method = self
            .auth_method
            .as_deref()
            .map(ClientAuthMethod::from_str)
            .transpose()?
            .unwrap_or_default();

        match grant_type {
            "authorization_code" => Ok(TokenRequest::AuthorizationCode {
                client_id: client_id.into(),
                code: required(self.code, "code", grant_type)?,
                code_verifier: required(self.code_verifier, "code_verifier", grant_type)?,
                redirect_uri: required(self.redirect_uri, "redirect_uri", grant_type)?,
                client_secret: self.client_secret,
                auth_method,
            }),
            "client_credentials" => Ok(TokenRequest::ClientCredentials {
                client_id: client_id.into(),
                client_secret: required(self.client_secret, "client_secret", grant_type)?,
                auth_method,
                scopes: self.scopes,
            }),
            other => Err(Error::InvalidArgument(format!("Unsupported grant type: {}", other))),
        }
    }
}

fn required<T>(value: Option<T>, name: &str, grant_type: &str) -> Result<T> {
    value.ok_or_else(|| Error::InvalidArgument(format!("Missing {} parameter for {} grant type", name, grant_type)))
}

/// An authorization-code request, rendered as query parameters of the authorization
/// endpoint by [`OpenIdProvider::authorize_url`](super::OpenIdProvider::authorize_url).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub client_id: String,
    pub redirect_uri: Url,
    pub response_type: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

impl AuthorizationRequest {
    /// A `code` request with no scopes, state or PKCE challenge.
    pub fn new(client_id: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri,
            response_type: "code".to_string(),
            scopes: Vec::new(),
            state: None,
            nonce: None,
            code_challenge: None,
            code_challenge_method: None,
        }
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Attaches the S256 challenge of `pkce`.
    pub fn pkce(mut self, pkce: &Pkce) -> Self {
        self.code_challenge = Some(pkce.challenge().to_string());
        self.code_challenge_method = Some(Pkce::METHOD.to_string());
        self
    }

    pub(crate) fn query_parameters(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("client_id", self.client_id.clone()),
            ("redirect_uri", self.redirect_uri.to_string()),
            ("response_type", self.response_type.clone()),
        ];
        if !self.scopes.is_empty() {
            query.push(("scope", self.scopes.join(" ")));
        }
        if let Some(state) = &self.state {
            query.push(("state", state.clone()));
        }
        if let Some(nonce) = &self.nonce {
            query.push(("nonce", nonce.clone()));
        }
        if let (Some(challenge), Some(method)) = (&self.code_challenge, &self.code_challenge_method) {
            query.push(("code_challenge", challenge.clone()));
            query.push(("code_challenge_method", method.clone()));
        }
        query
    }
}

/// A PKCE verifier and its S256 challenge (RFC 7636).
#[derive(Clone, Debug)]
pub struct Pkce {
    verifier: String,
    challenge: String,
}

impl Pkce {
    pub const METHOD: &'static str = "S256";

    /// Generates a verifier from 32 random bytes.
    pub fn new() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self { verifier, challenge }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

impl Default for Pkce {
    fn default() -> Self {
        Self::new()
    }
}
