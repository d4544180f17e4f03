// src/session.rs

//! Sessions own the identity used for negotiation and the credentials it produced.

pub mod openid;

pub use openid::OpenIdSession;

use crate::authenticator::Authenticator;
use crate::credential::{Credential, Request};
use crate::dpop::DpopManager;
use crate::error::Result;
use async_trait::async_trait;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// An authenticated (or anonymous) identity that negotiates and caches credentials.
///
/// Implementations are shared between concurrent requests.
#[async_trait]
pub trait Session: Send + Sync {
    /// A stable identifier of the session.
    fn id(&self) -> &str;

    /// The `WWW-Authenticate` schemes this session can answer.
    fn supported_schemes(&self) -> &[String];

    /// Whether `scheme` is supported, compared case-insensitively.
    fn supports_scheme(&self, scheme: &str) -> bool {
        self.supported_schemes().iter().any(|s| s.eq_ignore_ascii_case(scheme))
    }

    /// The agent this session acts for. May fetch a token first.
    async fn principal(&self) -> Result<Option<Url>>;

    /// A credential held by the session itself, by name, e.g. [`ID_TOKEN`](crate::credential::ID_TOKEN).
    async fn credential(&self, name: &str) -> Result<Option<Credential>>;

    /// A cached, unexpired credential for the request's authority and path.
    fn from_cache(&self, request: &Request) -> Option<Credential>;

    /// Obtains a fresh credential with `authenticator` and caches it for the request.
    async fn authenticate(
        &self,
        authenticator: &dyn Authenticator,
        request: &Request,
        algorithms: &BTreeSet<String>,
    ) -> Result<Option<Credential>>;

    /// The thumbprint of the first algorithm in `algorithms` this session holds a DPoP
    /// key for.
    fn select_thumbprint(&self, algorithms: &[String]) -> Option<String>;

    /// The DPoP keys of the session, if it proves possession.
    fn dpop(&self) -> Option<&DpopManager>;

    /// Forgets every cached credential.
    fn reset(&self);
}

/// Where a credential may be reused: the request's authority and path. Query and
/// fragment do not take part.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    authority: String,
    path: String,
}

impl CacheKey {
    pub fn of(uri: &Url) -> Self {
        Self {
            authority: uri.authority().to_string(),
            path: uri.path().to_string(),
        }
    }
}

/// A concurrent map of [`CacheKey`] to [`Credential`]. Expired entries are dropped when
/// they are looked up; there is no background sweep.
#[derive(Clone)]
pub struct CredentialCache {
    entries: Cache<CacheKey, Credential>,
}

impl CredentialCache {
    pub fn new(max_capacity: u64) -> Self {
        Self { entries: Cache::new(max_capacity) }
    }

    pub fn get(&self, uri: &Url) -> Option<Credential> {
        let key = CacheKey::of(uri);
        let now = SystemTime::now();
        let credential = self.entries.get(&key)?;
        if credential.is_valid_at(now) {
            return Some(credential);
        }
        debug!(authority = %key.authority, path = %key.path, "Purging expired credential.");
        self.purge_expired(key, now)
    }

    // Removes the entry only while it is still expired. A credential stored since the
    // stale read survives and is returned.
    fn purge_expired(&self, key: CacheKey, now: SystemTime) -> Option<Credential> {
        let result = self.entries.entry(key).and_compute_with(|current| match current {
            Some(entry) if !entry.value().is_valid_at(now) => Op::Remove,
            _ => Op::Nop,
        });
        match result {
            CompResult::Unchanged(entry) => Some(entry.into_value()),
            _ => None,
        }
    }

    pub fn insert(&self, uri: &Url, credential: Credential) {
        self.entries.insert(CacheKey::of(uri), credential);
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new(1_000)
    }
}

pub(crate) fn select_thumbprint(dpop: Option<&DpopManager>, algorithms: &[String]) -> Option<String> {
    let dpop = dpop?;
    algorithms
        .iter()
        .find_map(|alg| dpop.lookup_thumbprint(alg))
        .map(str::to_string)
}

/// A session with no identity. It can only take part in UMA negotiation and never caches.
pub struct AnonymousSession {
    id: String,
    schemes: Vec<String>,
    dpop: Option<Arc<DpopManager>>,
}

impl AnonymousSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            schemes: vec!["UMA".to_string()],
            dpop: None,
        }
    }

    pub fn with_dpop(mut self, dpop: Arc<DpopManager>) -> Self {
        self.dpop = Some(dpop);
        self
    }
}

impl Default for AnonymousSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Session for AnonymousSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn supported_schemes(&self) -> &[String] {
        &self.schemes
    }

    async fn principal(&self) -> Result<Option<Url>> {
        Ok(None)
    }

    async fn credential(&self, _name: &str) -> Result<Option<Credential>> {
        Ok(None)
    }

    fn from_cache(&self, _request: &Request) -> Option<Credential> {
        None
    }

    async fn authenticate(
        &self,
        authenticator: &dyn Authenticator,
        request: &Request,
        algorithms: &BTreeSet<String>,
    ) -> Result<Option<Credential>> {
        authenticator.authenticate(self, request, algorithms).await.map(Some)
    }

    fn select_thumbprint(&self, algorithms: &[String]) -> Option<String> {
        select_thumbprint(self.dpop.as_deref(), algorithms)
    }

    fn dpop(&self) -> Option<&DpopManager> {
        self.dpop.as_deref()
    }

    fn reset(&self) {}
}
