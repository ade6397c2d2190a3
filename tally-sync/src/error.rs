use tally_core::ValidationError;
use thiserror::Error;

/// Failure reported by a document store adapter
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(String),
    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("not signed in to the store")]
    Unauthenticated,
    #[error("could not decode store response: {0}")]
    Decode(String),
    #[error("snapshot channel closed")]
    Closed,
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Network(e.to_string())
        }
    }
}

/// Failure reported by the identity provider
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IdentityError {
    #[error("identity provider rejected request: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("could not decode identity response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for IdentityError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            IdentityError::Decode(e.to_string())
        } else {
            IdentityError::Network(e.to_string())
        }
    }
}

/// Everything a ledger operation can surface to the presentation layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("subscription failed: {0}")]
    Channel(StoreError),
    #[error("write rejected: {0}")]
    Write(StoreError),
    #[error("no user is signed in")]
    NotSignedIn,
    #[error(transparent)]
    Identity(#[from] IdentityError),
}
