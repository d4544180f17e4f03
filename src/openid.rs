// src/openid.rs

//! OpenID Connect: the provider client, ID token verification and the session built on it.

pub mod jwks;
pub mod provider;
pub mod request;
pub mod verifier;

pub use jwks::JwksClient;
pub use provider::OpenIdProvider;
pub use request::{AuthorizationRequest, ClientAuthMethod, Pkce, TokenRequest, TokenRequestBuilder};
pub use verifier::{IdToken, IdTokenClaims, IdTokenVerifier};
