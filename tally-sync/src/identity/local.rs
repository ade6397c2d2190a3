use async_trait::async_trait;
use log::info;
use tokio::sync::watch;

use super::IdentityProvider;
use crate::error::IdentityError;

/// In-process identity: whoever calls `sign_in` is the user.
pub struct LocalIdentity {
    user: watch::Sender<Option<String>>,
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalIdentity {
    pub fn new() -> Self {
        Self {
            user: watch::Sender::new(None),
        }
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        info!("signed in as {user_id}");
        self.user.send_replace(Some(user_id));
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.user.borrow().clone()
    }

    fn on_auth_change(&self) -> watch::Receiver<Option<String>> {
        self.user.subscribe()
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        info!("signed out");
        self.user.send_replace(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_changes() {
        let id = LocalIdentity::new();
        let mut rx = id.on_auth_change();
        assert_eq!(id.current_user_id(), None);

        id.sign_in("alice");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_deref(), Some("alice"));

        id.sign_out().await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), None);
        assert_eq!(id.current_user_id(), None);
    }
}
