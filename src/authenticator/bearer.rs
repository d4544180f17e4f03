// src/authenticator/bearer.rs

use super::{AuthenticationMechanism, Authenticator};
use crate::challenge::Challenge;
use crate::config::RegistryConfig;
use crate::credential::{Credential, Request, ID_TOKEN};
use crate::error::{AuthenticationError, Result};
use crate::session::Session;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Answers `Bearer` challenges with the session's OpenID ID token.
#[derive(Clone, Debug)]
pub struct BearerMechanism {
    priority: i32,
}

impl BearerMechanism {
    pub fn new() -> Self {
        Self::from_config(&RegistryConfig::default())
    }

    /// Uses the Bearer priority of `config`.
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::with_priority(config.bearer_priority)
    }

    pub fn with_priority(priority: i32) -> Self {
        Self { priority }
    }
}

impl Default for BearerMechanism {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthenticationMechanism for BearerMechanism {
    fn scheme(&self) -> &str {
        "Bearer"
    }

    fn authenticator(&self, _challenge: &Challenge) -> Result<Box<dyn Authenticator>> {
        Ok(Box::new(BearerAuthenticator { priority: self.priority }))
    }
}

pub struct BearerAuthenticator {
    priority: i32,
}

#[async_trait]
impl Authenticator for BearerAuthenticator {
    fn name(&self) -> &str {
        "OpenId"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn authenticate(
        &self,
        session: &dyn Session,
        _request: &Request,
        _algorithms: &BTreeSet<String>,
    ) -> Result<Credential> {
        session
            .credential(ID_TOKEN)
            .await?
            .ok_or_else(|| AuthenticationError::NoCredential("OpenId".to_string()).into())
    }
}
