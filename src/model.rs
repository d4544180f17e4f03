// src/model.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// The subset of an UMA authorization server's discovery document that negotiation uses.
/// Found at the `.well-known/uma2-configuration` endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UmaMetadata {
    pub issuer: Url,
    pub token_endpoint: Url,
    #[serde(default)]
    pub jwks_uri: Option<Url>,
    #[serde(default)]
    pub dpop_signing_alg_values_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub uma_profiles_supported: Vec<Url>,
}

/// Represents the data structure of an OpenID provider's discovery document.
/// Found at the `.well-known/openid-configuration` endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OpenIdMetadata {
    pub issuer: Url,
    pub token_endpoint: Url,
    #[serde(default)]
    pub authorization_endpoint: Option<Url>,
    #[serde(default)]
    pub jwks_uri: Option<Url>,
    #[serde(default)]
    pub end_session_endpoint: Option<Url>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,
    #[serde(default)]
    pub dpop_signing_alg_values_supported: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

/// Raw token material returned by a token endpoint, before it is turned into a
/// [`Credential`](crate::credential::Credential).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// The granted scopes, split from the space-delimited `scope` member.
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

/// An OAuth 2.0 error response body. UMA adds `ticket`, `required_claims` and
/// `redirect_user` for `need_info` responses.
///
/// Read with [`ErrorResponse::parse`], member by member: a member of the wrong type reads
/// as absent instead of hiding the `error` code.
#[derive(Clone, Debug, Default)]
pub struct ErrorResponse {
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub ticket: Option<String>,
    pub redirect_user: Option<String>,
    pub required_claims: Vec<Value>,
}

impl ErrorResponse {
    /// Returns `None` unless `body` is a JSON object.
    pub fn parse(body: &[u8]) -> Option<Self> {
        let Value::Object(members) = serde_json::from_slice::<Value>(body).ok()? else {
            return None;
        };
        let string = |name: &str| members.get(name).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            error: string("error"),
            error_description: string("error_description"),
            ticket: string("ticket"),
            redirect_user: string("redirect_user"),
            required_claims: match members.get("required_claims") {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            },
        })
    }
}

/// Represents a single JSON Web Key (JWK) as defined in RFC 7517.
#[derive(Debug, Deserialize)]
pub struct JsonWebKey {
    #[serde(default)]
    pub kid: Option<String>,
    pub kty: String,
    #[serde(rename = "use")]
    pub use_purpose: Option<String>,
    pub alg: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

/// Represents a JSON Web Key Set (JWKS), which is a collection of JWKs.
#[derive(Debug, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}
