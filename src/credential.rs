// src/credential.rs

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::time::{Duration, SystemTime};
use url::Url;

/// The OpenID ID token credential name, also used as the UMA claim token format.
pub const ID_TOKEN: &str = "http://openid.net/specs/openid-connect-core-1_0.html#IDToken";

/// A bound access credential produced by a successful negotiation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    scheme: String,
    issuer: Url,
    token: String,
    expiration: SystemTime,
    principal: Option<Url>,
    proof_thumbprint: Option<String>,
}

impl Credential {
    pub fn new(
        scheme: impl Into<String>,
        issuer: Url,
        token: impl Into<String>,
        expiration: SystemTime,
        principal: Option<Url>,
        proof_thumbprint: Option<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            issuer,
            token: token.into(),
            expiration,
            principal,
            proof_thumbprint,
        }
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn issuer(&self) -> &Url {
        &self.issuer
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expiration(&self) -> SystemTime {
        self.expiration
    }

    pub fn principal(&self) -> Option<&Url> {
        self.principal.as_ref()
    }

    /// The JWK thumbprint of the DPoP key this credential is bound to.
    pub fn proof_thumbprint(&self) -> Option<&str> {
        self.proof_thumbprint.as_deref()
    }

    /// A credential is usable strictly before its expiration instant.
    pub fn is_valid_at(&self, now: SystemTime) -> bool {
        now < self.expiration
    }

    /// The `Authorization` header value, e.g. `Bearer <token>` or `DPoP <token>`.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.scheme, self.token)
    }
}

const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Converts an `expires_in` lifetime into an absolute instant. An absent or zero lifetime
/// means the server gave no expiry; such credentials are kept for a very long time, as are
/// credentials whose lifetime does not fit the clock.
pub fn expiration_from(expires_in: Option<u64>) -> SystemTime {
    let now = SystemTime::now();
    expires_in
        .filter(|secs| *secs > 0)
        .and_then(|secs| now.checked_add(Duration::from_secs(secs)))
        .unwrap_or(now + FAR_FUTURE)
}

/// The part of an outgoing HTTP request that negotiation looks at.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    uri: Url,
    headers: HeaderMap,
}

impl Request {
    pub fn new(method: Method, uri: Url) -> Self {
        Self { method, uri, headers: HeaderMap::new() }
    }

    pub fn get(uri: Url) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}
