// src/uma/claims.rs

use crate::error::Result;
use crate::model::ErrorResponse;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use url::Url;

/// Opaque claim material pushed to the authorization server, with the URI of its format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimToken {
    value: String,
    format: String,
}

impl ClaimToken {
    pub fn of(value: impl Into<String>, format: impl Into<String>) -> Self {
        Self { value: value.into(), format: format.into() }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn format(&self) -> &str {
        &self.format
    }
}

/// One entry of a `need_info` response's `required_claims` list.
///
/// The members are read leniently: a non-string value reads as absent, and non-string
/// items of a list are skipped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClaimRequirement {
    data: Map<String, Value>,
}

impl ClaimRequirement {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    pub fn claim_type(&self) -> Option<&str> {
        self.property("claim_type")
    }

    pub fn claim_token_formats(&self) -> Vec<&str> {
        self.properties("claim_token_format")
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.property("friendly_name")
    }

    pub fn issuers(&self) -> Vec<&str> {
        self.properties("issuer")
    }

    pub fn name(&self) -> Option<&str> {
        self.property("name")
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }

    pub fn properties(&self, name: &str) -> Vec<&str> {
        match self.data.get(name) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// The recoverable half of a `need_info` response: a fresh ticket and what the server wants.
#[derive(Clone, Debug, PartialEq)]
pub struct NeedInfoTicket {
    pub ticket: String,
    pub redirect_user: Option<Url>,
    pub required_claims: Vec<ClaimRequirement>,
}

impl NeedInfoTicket {
    /// Reads a `need_info` error body. Returns `None` for any other error, and for a
    /// `need_info` without a ticket.
    pub(crate) fn from_error_response(err: &ErrorResponse) -> Option<Self> {
        if err.error.as_deref() != Some("need_info") {
            return None;
        }
        let ticket = err.ticket.clone()?;
        let required_claims = err
            .required_claims
            .iter()
            .filter_map(|item| item.as_object().cloned().map(ClaimRequirement::new))
            .collect();
        Some(Self {
            ticket,
            redirect_user: err.redirect_user.as_deref().and_then(|u| Url::parse(u).ok()),
            required_claims,
        })
    }
}

/// Supplies claims when the authorization server answers `need_info`.
///
/// Returning `Ok(None)` abandons the negotiation with `RequestDenied`. Returning an error
/// aborts it with that error.
#[async_trait]
pub trait NeedInfoHandler: Send + Sync {
    async fn handle(&self, need_info: &NeedInfoTicket) -> Result<Option<ClaimToken>>;
}

/// A [`NeedInfoHandler`] backed by a plain closure.
pub struct NeedInfoFn<F>(F);

/// Wraps a synchronous closure as a [`NeedInfoHandler`].
pub fn need_info_fn<F>(f: F) -> NeedInfoFn<F>
where
    F: Fn(&NeedInfoTicket) -> Option<ClaimToken> + Send + Sync,
{
    NeedInfoFn(f)
}

#[async_trait]
impl<F> NeedInfoHandler for NeedInfoFn<F>
where
    F: Fn(&NeedInfoTicket) -> Option<ClaimToken> + Send + Sync,
{
    async fn handle(&self, need_info: &NeedInfoTicket) -> Result<Option<ClaimToken>> {
        Ok((self.0)(need_info))
    }
}

/// A [`NeedInfoHandler`] backed by a closure returning a future.
pub struct AsyncNeedInfoFn<F>(F);

/// Wraps an asynchronous closure as a [`NeedInfoHandler`]. The closure receives its own
/// copy of the ticket so the returned future may outlive the call.
pub fn async_need_info_fn<F, Fut>(f: F) -> AsyncNeedInfoFn<F>
where
    F: Fn(NeedInfoTicket) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<ClaimToken>>> + Send,
{
    AsyncNeedInfoFn(f)
}

#[async_trait]
impl<F, Fut> NeedInfoHandler for AsyncNeedInfoFn<F>
where
    F: Fn(NeedInfoTicket) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<ClaimToken>>> + Send,
{
    async fn handle(&self, need_info: &NeedInfoTicket) -> Result<Option<ClaimToken>> {
        (self.0)(need_info.clone()).await
    }
}

/// Knows how to gather one kind of claim, e.g. an ID token from a given issuer.
#[async_trait]
pub trait ClaimGatheringHandler: Send + Sync {
    fn claim_token_format(&self) -> &str;

    fn issuer(&self) -> &str;

    fn claim_type(&self) -> &str;

    async fn gather(&self) -> Result<Option<ClaimToken>>;

    /// Empty format or issuer lists in the requirement accept anything; the claim type
    /// must always be present and equal.
    fn is_compatible_with(&self, requirement: &ClaimRequirement) -> bool {
        let formats = requirement.claim_token_formats();
        if !formats.is_empty() && !formats.contains(&self.claim_token_format()) {
            return false;
        }

        let issuers = requirement.issuers();
        if !issuers.is_empty() && !issuers.contains(&self.issuer()) {
            return false;
        }

        requirement.claim_type() == Some(self.claim_type())
    }
}

/// Answers `need_info` with the first registered handler compatible with any of the
/// required claims, trying requirements in server order.
#[derive(Default)]
pub struct NeedInfoHandlers {
    handlers: Vec<Box<dyn ClaimGatheringHandler>>,
}

impl NeedInfoHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: impl ClaimGatheringHandler + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn with_handler(mut self, handler: impl ClaimGatheringHandler + 'static) -> Self {
        self.add_handler(handler);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl NeedInfoHandler for NeedInfoHandlers {
    async fn handle(&self, need_info: &NeedInfoTicket) -> Result<Option<ClaimToken>> {
        for requirement in &need_info.required_claims {
            if let Some(handler) = self.handlers.iter().find(|h| h.is_compatible_with(requirement)) {
                return handler.gather().await;
            }
        }
        Ok(None)
    }
}
