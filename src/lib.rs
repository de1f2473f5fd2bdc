//! Asynchronous ACME (RFC 8555) client library.
//!
//! A caller supplies a domain and a CSR; the library drives the full
//! issuance handshake (account, order, authorizations, challenges,
//! finalization) against any compliant CA and returns the signed PEM
//! chain. Challenge responses are prepared and torn down through the
//! [`fulfillment::ChallengeFulfillment`] capability set.

pub mod client;
pub mod crypto;
pub mod eab;
pub mod error;
pub mod fulfillment;
mod issue;
pub mod jws;
pub mod state;
pub mod types;

pub use client::AcmeClient;
pub use crypto::{AccountKey, Jwk};
pub use eab::EabCredentials;
pub use error::{AcmeError, AcmeResult, Problem, ProblemKind};
pub use fulfillment::{
    ChallengeFulfillment, Fulfillment, PowerDnsFulfillment, StaticDirFulfillment,
    WebDavFulfillment,
};
pub use state::ClientState;
pub use types::{
    Authorization, AuthorizationStatus, Challenge, ChallengeStatus, ChallengeType, Directory,
    DirectoryMeta, Identifier, IdentifierKind, Order, OrderStatus,
};
