//! Identity provider seam.
//!
//! The ledger only needs the current user id, a stream of changes to it, and
//! a way to sign out. Authentication itself belongs to the provider.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::IdentityError;

pub mod firebase;
pub mod local;

pub use firebase::{AuthUser, FirebaseAuth};
pub use local::LocalIdentity;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Id of the signed-in user, if any
    fn current_user_id(&self) -> Option<String>;

    /// Receiver that observes every sign-in, sign-out and user switch
    fn on_auth_change(&self) -> watch::Receiver<Option<String>>;

    async fn sign_out(&self) -> Result<(), IdentityError>;
}

/// Bearer credential for the document store
#[async_trait]
pub trait TokenSource: Send + Sync {
    fn id_token(&self) -> Option<String>;

    /// Obtain a new id token after the store rejected the current one
    async fn renew(&self) -> Result<String, IdentityError>;
}
