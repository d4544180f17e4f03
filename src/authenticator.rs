// src/authenticator.rs

//! Maps `WWW-Authenticate` challenges to the mechanism that can answer them.

pub mod bearer;
pub mod uma;

pub use bearer::{BearerAuthenticator, BearerMechanism};
pub use uma::{UmaAuthenticator, UmaMechanism};

use crate::challenge::{parse_www_authenticate, Challenge};
use crate::config::RegistryConfig;
use crate::credential::{Credential, Request};
use crate::error::{Error, Result};
use crate::session::Session;
use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

const UMA: &str = "uma";
const BEARER: &str = "bearer";

/// Obtains a credential for one challenge.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &str;

    /// Higher values are tried first.
    fn priority(&self) -> i32;

    /// Negotiates a credential for `request` on behalf of `session`. `algorithms` are the
    /// DPoP algorithms the resource server advertised.
    async fn authenticate(
        &self,
        session: &dyn Session,
        request: &Request,
        algorithms: &BTreeSet<String>,
    ) -> Result<Credential>;
}

/// A factory of [`Authenticator`]s for one authentication scheme.
pub trait AuthenticationMechanism: Send + Sync {
    fn scheme(&self) -> &str;

    /// Creates an authenticator for `challenge`, failing if it lacks what the scheme needs.
    fn authenticator(&self, challenge: &Challenge) -> Result<Box<dyn Authenticator>>;
}

/// The set of registered mechanisms, keyed by lower-cased scheme.
pub struct AuthenticatorRegistry {
    config: RegistryConfig,
    mechanisms: HashMap<String, Box<dyn AuthenticationMechanism>>,
}

impl Default for AuthenticatorRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl AuthenticatorRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self { config, mechanisms: HashMap::new() }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Registers a mechanism, replacing any previous one for the same scheme.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a prohibited scheme such as `Basic` or `Digest`.
    pub fn register(&mut self, mechanism: impl AuthenticationMechanism + 'static) -> Result<()> {
        let scheme = mechanism.scheme().to_ascii_lowercase();
        if self.config.is_prohibited(&scheme) {
            return Err(Error::InvalidArgument(format!(
                "The {} authentication scheme is not permitted",
                mechanism.scheme()
            )));
        }
        debug!(scheme = %scheme, "Registering authentication mechanism.");
        self.mechanisms.insert(scheme, Box::new(mechanism));
        Ok(())
    }

    pub fn with_mechanism(mut self, mechanism: impl AuthenticationMechanism + 'static) -> Result<Self> {
        self.register(mechanism)?;
        Ok(self)
    }

    pub fn is_registered(&self, scheme: &str) -> bool {
        self.mechanisms.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Authenticators for every registered scheme in a `WWW-Authenticate` value, highest
    /// priority first. Ties keep header order.
    pub fn challenge(&self, header: &str) -> Vec<Box<dyn Authenticator>> {
        let mut authenticators: Vec<_> = parse_www_authenticate(header)
            .iter()
            .filter_map(|c| self.authenticator_for(c))
            .collect();
        authenticators.sort_by_key(|a| Reverse(a.priority()));
        authenticators
    }

    /// Picks the best authenticator for `challenges` and lets `session` run it.
    ///
    /// Challenges are considered when their scheme is registered and the session supports
    /// it; UMA is always considered since anonymous sessions can use it. With nothing to
    /// choose from, a registered Bearer mechanism is used as a fallback. Returns `None` if
    /// there is no authenticator at all.
    pub async fn negotiate(
        &self,
        session: &dyn Session,
        request: &Request,
        challenges: &[Challenge],
    ) -> Result<Option<Credential>> {
        let algorithms: BTreeSet<String> = challenges
            .iter()
            .filter_map(|c| c.parameter("algs"))
            .flat_map(str::split_whitespace)
            .map(str::to_string)
            .collect();

        let mut authenticators: Vec<_> = challenges
            .iter()
            .filter(|c| c.scheme().eq_ignore_ascii_case(UMA) || session.supports_scheme(c.scheme()))
            .filter_map(|c| self.authenticator_for(c))
            .collect();
        authenticators.sort_by_key(|a| Reverse(a.priority()));

        let authenticator = match authenticators.into_iter().next() {
            Some(authenticator) => authenticator,
            None => match self.mechanisms.get(BEARER) {
                // Missing or poorly formed challenges
                Some(mechanism) => {
                    debug!("Using fallback Bearer authenticator");
                    mechanism.authenticator(&Challenge::of("Bearer"))?
                }
                None => return Ok(None),
            },
        };

        debug!(authenticator = authenticator.name(), session = session.id(), "Negotiating credential.");
        session.authenticate(authenticator.as_ref(), request, &algorithms).await
    }

    fn authenticator_for(&self, challenge: &Challenge) -> Option<Box<dyn Authenticator>> {
        let mechanism = self.mechanisms.get(&challenge.scheme().to_ascii_lowercase())?;
        match mechanism.authenticator(challenge) {
            Ok(authenticator) => Some(authenticator),
            Err(e) => {
                warn!(scheme = challenge.scheme(), error = %e, "Skipping unusable challenge.");
                None
            }
        }
    }
}
