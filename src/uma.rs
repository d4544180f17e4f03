// src/uma.rs

//! UMA 2.0 grant negotiation: discovery, the ticket exchange and interactive claim gathering.

pub mod claims;
pub mod client;

pub use claims::{
    async_need_info_fn, need_info_fn, ClaimGatheringHandler, ClaimRequirement, ClaimToken,
    NeedInfoHandler, NeedInfoHandlers, NeedInfoTicket,
};
pub use client::UmaClient;

/// The `grant_type` of every UMA token request.
pub const UMA_TICKET_GRANT: &str = "urn:ietf:params:oauth:grant-type:uma-ticket";

/// The input of one UMA ticket exchange.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenRequest {
    ticket: String,
    persisted_claim_token: Option<String>,
    requesting_party_token: Option<String>,
    claim_token: Option<ClaimToken>,
    scopes: Vec<String>,
}

impl TokenRequest {
    pub fn new(ticket: impl Into<String>) -> Self {
        Self { ticket: ticket.into(), ..Default::default() }
    }

    pub fn with_claim_token(mut self, claim_token: ClaimToken) -> Self {
        self.claim_token = Some(claim_token);
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the persisted claims token (`pct`) from an earlier negotiation.
    pub fn with_persisted_claim_token(mut self, pct: impl Into<String>) -> Self {
        self.persisted_claim_token = Some(pct.into());
        self
    }

    /// Sets the requesting party token (`rpt`) to upgrade.
    pub fn with_requesting_party_token(mut self, rpt: impl Into<String>) -> Self {
        self.requesting_party_token = Some(rpt.into());
        self
    }

    pub fn ticket(&self) -> &str {
        &self.ticket
    }

    pub fn claim_token(&self) -> Option<&ClaimToken> {
        self.claim_token.as_ref()
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn persisted_claim_token(&self) -> Option<&str> {
        self.persisted_claim_token.as_deref()
    }

    pub fn requesting_party_token(&self) -> Option<&str> {
        self.requesting_party_token.as_deref()
    }

    /// The request for the next claim-gathering round. Only the scopes carry over.
    pub(crate) fn next_round(&self, ticket: String, claim_token: ClaimToken) -> Self {
        Self {
            ticket,
            claim_token: Some(claim_token),
            scopes: self.scopes.clone(),
            ..Default::default()
        }
    }

    /// The form body posted to the token endpoint.
    pub(crate) fn form_parameters(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("grant_type", UMA_TICKET_GRANT.to_string()),
            ("ticket", self.ticket.clone()),
        ];
        if let Some(pct) = &self.persisted_claim_token {
            form.push(("pct", pct.clone()));
        }
        if let Some(rpt) = &self.requesting_party_token {
            form.push(("rpt", rpt.clone()));
        }
        if let Some(claim_token) = &self.claim_token {
            form.push(("claim_token", claim_token.value().to_string()));
            form.push(("claim_token_format", claim_token.format().to_string()));
        }
        if !self.scopes.is_empty() {
            form.push(("scope", self.scopes.join(" ")));
        }
        form
    }
}
