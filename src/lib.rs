// src/lib.rs

pub mod authenticator;
pub mod challenge;
pub mod config;
pub mod credential;
pub mod dpop;
pub mod error;
mod expiry;
pub mod model;
pub mod openid;
pub mod session;
pub mod uma;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

/// The public prelude for the `solid-client-auth` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::authenticator::{
        AuthenticationMechanism, Authenticator, AuthenticatorRegistry, BearerMechanism, UmaMechanism,
    };
    pub use crate::challenge::{parse_www_authenticate, Challenge};
    pub use crate::config::{OpenIdVerificationConfig, RegistryConfig, UmaConfig};
    pub use crate::credential::{Credential, Request, ID_TOKEN};
    pub use crate::dpop::{DpopKey, DpopManager};
    pub use crate::error::{AuthenticationError, Error, OpenIdError, UmaError};
    pub use crate::openid::{IdTokenVerifier, OpenIdProvider};
    pub use crate::session::{AnonymousSession, OpenIdSession, Session};
    pub use crate::uma::{ClaimGatheringHandler, ClaimToken, NeedInfoHandler, NeedInfoHandlers, UmaClient};
}
