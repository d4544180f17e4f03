// src/error.rs

use thiserror::Error;

/// Failures raised while negotiating an UMA access token.
///
/// `InvalidGrant`, `RequestDenied` and `InvalidScope` are terminal outcomes reported by the
/// authorization server. Every other variant belongs to the generic UMA failure family
/// (malformed responses, unreachable metadata, negotiation depth exhaustion).
#[derive(Debug, Error)]
pub enum UmaError {
    /// The authorization server rejected the ticket or claim token (`error=invalid_grant`).
    #[error("Invalid grant provided (status {status})")]
    InvalidGrant { status: u16 },

    /// The client is not authorized for the requested permissions (`error=request_denied`),
    /// or a `need_info` round could not be continued.
    #[error("Request denied: {reason}")]
    RequestDenied { status: Option<u16>, reason: String },

    /// The requested scope is not valid for the ticket (`error=invalid_scope`).
    #[error("Invalid scope provided (status {status})")]
    InvalidScope { status: u16 },

    /// Any other error shape returned by the token endpoint.
    #[error("Unexpected error response while performing token negotiation: {status} ({error})")]
    Unexpected {
        status: u16,
        error: String,
        error_description: Option<String>,
    },

    /// The negotiation needed more token requests than the configured maximum.
    #[error("Claim gathering stages exceeded configured maximum of {max_depth}")]
    DepthExceeded { max_depth: u32 },

    /// The discovery document could not be fetched or parsed.
    #[error("UMA discovery failed: {message}")]
    Discovery { message: String, status: Option<u16> },

    /// The challenge did not carry the parameters required for UMA.
    #[error("Invalid challenge for UMA authentication: {0}")]
    InvalidChallenge(String),

    /// An error occurred during an HTTP request.
    #[error("HTTP request error during UMA negotiation")]
    Transport(#[from] reqwest::Error),

    /// The runtime backing the blocking API could not be started.
    #[error("Unable to start the blocking UMA runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl UmaError {
    /// Whether this is one of the terminal outcomes (`invalid_grant`, `request_denied`,
    /// `invalid_scope`). Terminal errors are never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UmaError::InvalidGrant { .. } | UmaError::RequestDenied { .. } | UmaError::InvalidScope { .. }
        )
    }

    /// The HTTP status of the response this error was derived from, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            UmaError::InvalidGrant { status }
            | UmaError::InvalidScope { status }
            | UmaError::Unexpected { status, .. } => Some(*status),
            UmaError::RequestDenied { status, .. } | UmaError::Discovery { status, .. } => *status,
            UmaError::Transport(e) => e.status().map(|s| s.as_u16()),
            UmaError::DepthExceeded { .. } | UmaError::InvalidChallenge(_) | UmaError::Runtime(_) => None,
        }
    }
}

/// Failures raised while building or using an OpenID session.
#[derive(Debug, Error)]
pub enum OpenIdError {
    /// A claim the session requires (`iss`, `sub`, `exp`) is absent.
    #[error("The ID token is missing a required claim: {0}")]
    MissingClaim(String),

    /// A claim holds a value the client cannot represent, e.g. an `exp` beyond the clock's range.
    #[error("The ID token claim {0} is out of range")]
    ClaimOutOfRange(String),

    /// Errors originating from the `jsonwebtoken` crate during token validation.
    #[error("Unable to parse ID token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// The JWT header is missing the required 'kid' (Key ID) field.
    #[error("The JWT header is missing the 'kid' (Key ID) field")]
    MissingKeyId,

    /// A key with the specified 'kid' was not found in the JSON Web Key Set.
    #[error("Key not found for kid: {0}")]
    KeyNotFound(String),

    /// A JWK fetched from the provider is malformed or of an unsupported type.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The token endpoint answered with an error response.
    #[error("Token endpoint error {status}: {error}")]
    TokenEndpoint {
        status: u16,
        error: String,
        error_description: Option<String>,
    },

    /// The token endpoint answered successfully but without an ID token.
    #[error("The token response did not contain an ID token")]
    MissingIdToken,

    /// The discovery document could not be fetched or parsed.
    #[error("OpenID discovery failed: {0}")]
    Discovery(String),

    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The DPoP proof for a token request could not be produced.
    #[error("Unable to prove possession for the token request: {0}")]
    Proof(#[from] AuthenticationError),

    /// An error occurred during an HTTP request.
    #[error("HTTP request error during OpenID exchange")]
    Transport(#[from] reqwest::Error),
}

/// Failures of an authentication mechanism itself, always fatal to the current attempt.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// No DPoP keypair is registered for the requested algorithm.
    #[error("Unsupported DPoP algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Signing the DPoP proof failed.
    #[error("DPoP proof generation failed: {0}")]
    ProofGeneration(String),

    /// A keypair could not be used for the algorithm it was registered under.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The mechanism had nothing to authenticate with.
    #[error("Unable to perform {0} authentication")]
    NoCredential(String),
}

/// The primary error type for the `solid-client-auth` library.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Uma(#[from] UmaError),

    #[error(transparent)]
    OpenId(#[from] OpenIdError),

    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    /// A value was constructed with missing or contradictory fields.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
