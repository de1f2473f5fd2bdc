use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type AcmeResult<T> = Result<T, AcmeError>;

const ACME_ERROR_URN: &str = "urn:ietf:params:acme:error:";

/// RFC 7807 problem document returned by ACME servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind_uri: Option<String>,
    pub detail: Option<String>,
    pub status: Option<u16>,
}

impl Problem {
    pub fn kind(&self) -> ProblemKind {
        let Some(uri) = &self.kind_uri else {
            return ProblemKind::Other;
        };
        match uri.strip_prefix(ACME_ERROR_URN) {
            Some("badNonce") => ProblemKind::BadNonce,
            Some("unauthorized") => ProblemKind::Unauthorized,
            Some("malformed") => ProblemKind::Malformed,
            Some("rateLimited") => ProblemKind::RateLimited,
            Some("accountDoesNotExist") => ProblemKind::AccountDoesNotExist,
            Some("alreadyRegistered") => ProblemKind::AlreadyRegistered,
            Some("externalAccountRequired") => ProblemKind::ExternalAccountRequired,
            Some("unsupportedContact") => ProblemKind::UnsupportedContact,
            Some("userActionRequired") => ProblemKind::UserActionRequired,
            Some("serverInternal") => ProblemKind::ServerInternal,
            Some("connection") => ProblemKind::Connection,
            _ => ProblemKind::Other,
        }
    }

    /// Fallback problem for responses whose body is not a problem document.
    pub(crate) fn from_status(status: u16, body: &str) -> Self {
        Self {
            kind_uri: None,
            detail: if body.is_empty() {
                None
            } else {
                Some(body.to_string())
            },
            status: Some(status),
        }
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind_uri, &self.detail) {
            (Some(uri), Some(detail)) => write!(f, "{uri}: {detail}"),
            (Some(uri), None) => write!(f, "{uri}"),
            (None, Some(detail)) => write!(f, "{detail}"),
            (None, None) => write!(f, "status {}", self.status.unwrap_or(0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    BadNonce,
    Unauthorized,
    Malformed,
    RateLimited,
    AccountDoesNotExist,
    AlreadyRegistered,
    ExternalAccountRequired,
    UnsupportedContact,
    UserActionRequired,
    ServerInternal,
    Connection,
    Other,
}

#[derive(Debug, Error)]
pub enum AcmeError {
    /// The server answered with a problem document.
    #[error("acme problem: {0}")]
    Protocol(Problem),

    /// No fulfillment handler accepted a challenge, or a handler raised.
    #[error("challenge fulfillment failed: {0}")]
    FulfillmentFailed(#[source] anyhow::Error),

    /// An authorization finalized as anything other than `valid`.
    #[error("authorization failed for {identifier}")]
    AuthorizationFailed {
        identifier: String,
        problem: Option<Problem>,
    },

    /// An order finalized as `invalid`.
    #[error("order failed")]
    OrderFailed { problem: Option<Problem> },

    /// A polling loop exceeded its time budget.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The client was used out of sequence.
    #[error("invalid client state: {0}")]
    InvalidState(&'static str),

    /// Key parsing, signature, or CSR construction failed.
    #[error("crypto: {0}")]
    Crypto(#[source] anyhow::Error),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing expected header {0}")]
    MissingHeader(&'static str),

    #[error("missing expected field {0}")]
    MissingField(&'static str),
}

impl From<openssl::error::ErrorStack> for AcmeError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        AcmeError::Crypto(err.into())
    }
}

impl AcmeError {
    pub fn problem_kind(&self) -> Option<ProblemKind> {
        match self {
            AcmeError::Protocol(problem) => Some(problem.kind()),
            _ => None,
        }
    }
}
