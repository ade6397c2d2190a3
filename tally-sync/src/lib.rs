//! tally-sync: remote ledger client, document stores, identity, and the
//! session that keeps the local ledger view in step with the store

pub mod client;
pub mod error;
#[cfg(test)]
mod fake_http;
pub mod identity;
pub mod session;
pub mod store;

pub use client::{LedgerClient, SubscriptionHandle};
pub use error::{IdentityError, LedgerError, StoreError};
pub use identity::{AuthUser, FirebaseAuth, IdentityProvider, LocalIdentity, TokenSource};
pub use session::{LedgerView, Session, SessionPhase};
pub use store::{DocumentStore, FirestoreConfig, FirestoreStore, MemoryStore, SnapshotFeed};
