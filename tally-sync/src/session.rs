//! Session: binds the signed-in user to one live ledger subscription.
//!
//! States:
//! - SignedOut: no user, no subscription, empty cache.
//! - Attaching(user): cache invalidated, subscription opening or opened but
//!   no snapshot landed yet. `loading` is true.
//! - Active(user, subscription): at least one snapshot applied.
//!
//! Every transition that changes the user (attach, detach) invalidates the
//! cache first, under the same lock, so a callback of the old subscription
//! that is still in flight carries a superseded epoch and is dropped. The old
//! subscription is closed before a new one is opened, so at most one is live.
//!
//! Lock order: the session lock is never held while closing a subscription
//! (subscription callbacks take the session lock while holding their gate).

use chrono_tz::Tz;
use log::{info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tally_core::{
    ApplyOutcome, CategoryTotals, Epoch, ExpenseRecord, LedgerCache, RecordId, Snapshot,
    validate_for_creation,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::{LedgerClient, SubscriptionHandle};
use crate::error::{LedgerError, StoreError};
use crate::identity::IdentityProvider;
use crate::store::DocumentStore;

/// Observable session state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    SignedOut,
    Attaching { user_id: String },
    Active { user_id: String },
}

impl SessionPhase {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            SessionPhase::SignedOut => None,
            SessionPhase::Attaching { user_id } | SessionPhase::Active { user_id } => Some(user_id),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionPhase::SignedOut => "signed-out",
            SessionPhase::Attaching { .. } => "attaching",
            SessionPhase::Active { .. } => "active",
        }
    }
}

/// Everything the presentation layer renders, republished on every change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerView {
    pub phase: SessionPhase,
    pub records: Vec<ExpenseRecord>,
    pub totals: CategoryTotals,
    /// True from attach until the first snapshot lands
    pub loading: bool,
    pub error: Option<LedgerError>,
}

enum SessionState {
    SignedOut,
    Attaching {
        user_id: String,
        subscription: Option<SubscriptionHandle>,
    },
    Active {
        user_id: String,
        subscription: SubscriptionHandle,
    },
}

struct Inner {
    cache: LedgerCache,
    state: SessionState,
    loading: bool,
    last_error: Option<LedgerError>,
}

impl Inner {
    fn phase(&self) -> SessionPhase {
        match &self.state {
            SessionState::SignedOut => SessionPhase::SignedOut,
            SessionState::Attaching { user_id, .. } => SessionPhase::Attaching {
                user_id: user_id.clone(),
            },
            SessionState::Active { user_id, .. } => SessionPhase::Active {
                user_id: user_id.clone(),
            },
        }
    }

    fn user_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::SignedOut => None,
            SessionState::Attaching { user_id, .. } | SessionState::Active { user_id, .. } => {
                Some(user_id)
            }
        }
    }

    /// Move to SignedOut, handing back whatever subscription was open
    fn take_subscription(&mut self) -> Option<SubscriptionHandle> {
        match std::mem::replace(&mut self.state, SessionState::SignedOut) {
            SessionState::SignedOut => None,
            SessionState::Attaching { subscription, .. } => subscription,
            SessionState::Active { subscription, .. } => Some(subscription),
        }
    }

    /// Attaching with an open subscription and a loaded cache becomes Active
    fn promote(&mut self) {
        if !self.cache.is_loaded() {
            return;
        }
        let state = std::mem::replace(&mut self.state, SessionState::SignedOut);
        self.state = match state {
            SessionState::Attaching {
                user_id,
                subscription: Some(subscription),
            } => {
                info!("session active for {user_id}");
                SessionState::Active {
                    user_id,
                    subscription,
                }
            }
            other => other,
        };
    }

    fn view(&self) -> LedgerView {
        LedgerView {
            phase: self.phase(),
            records: self.cache.records().to_vec(),
            totals: self.cache.totals().clone(),
            loading: self.loading,
            error: self.last_error.clone(),
        }
    }
}

/// State shared with subscription callbacks
struct Shared {
    inner: Mutex<Inner>,
    view: watch::Sender<LedgerView>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, inner: &Inner) {
        self.view.send_replace(inner.view());
    }

    /// Subscription callback: apply a pushed snapshot tagged with `epoch`
    fn deliver(&self, epoch: Epoch, snapshot: Snapshot) -> ApplyOutcome {
        let mut inner = self.lock();
        let outcome = inner.cache.apply(snapshot, epoch);
        if outcome == ApplyOutcome::Applied {
            inner.loading = false;
            inner.promote();
            self.publish(&inner);
        }
        outcome
    }

    /// Subscription callback: the channel of `epoch` failed
    fn channel_failed(&self, epoch: Epoch, error: StoreError) {
        let mut inner = self.lock();
        if inner.cache.epoch() != epoch {
            warn!("ignoring failure of superseded channel (epoch {epoch}): {error}");
            return;
        }
        warn!("ledger channel failed: {error}");
        inner.loading = false;
        inner.last_error = Some(LedgerError::Channel(error));
        self.publish(&inner);
    }
}

pub struct Session {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn IdentityProvider>,
    timezone: Tz,
    shared: Arc<Shared>,
}

impl Session {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        let inner = Inner {
            cache: LedgerCache::new(),
            state: SessionState::SignedOut,
            loading: false,
            last_error: None,
        };
        Self {
            store,
            identity,
            timezone: Tz::UTC,
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                view: watch::Sender::new(LedgerView::default()),
            }),
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.lock().phase()
    }

    pub fn user_id(&self) -> Option<String> {
        self.shared.lock().user_id().map(str::to_string)
    }

    pub fn records(&self) -> Vec<ExpenseRecord> {
        self.shared.lock().cache.records().to_vec()
    }

    pub fn totals(&self) -> CategoryTotals {
        self.shared.lock().cache.totals().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.lock().loading
    }

    pub fn last_error(&self) -> Option<LedgerError> {
        self.shared.lock().last_error.clone()
    }

    pub fn view(&self) -> LedgerView {
        self.shared.view.borrow().clone()
    }

    /// Receiver that sees a fresh `LedgerView` after every change
    pub fn watch(&self) -> watch::Receiver<LedgerView> {
        self.shared.view.subscribe()
    }

    /// Wait until the view satisfies `predicate`, checking the current view first
    pub async fn wait_for(&self, mut predicate: impl FnMut(&LedgerView) -> bool) -> LedgerView {
        let mut rx = self.watch();
        match rx.wait_for(|v| predicate(v)).await {
            Ok(view) => view.clone(),
            // The sender lives as long as `self`, so this is unreachable while
            // we are borrowed; fall back to the current view.
            Err(_) => self.view(),
        }
    }

    fn client_for(&self, user_id: &str) -> LedgerClient {
        LedgerClient::new(Arc::clone(&self.store), user_id).with_timezone(self.timezone)
    }

    /// Switch the session to `user_id`: drop the current ledger, then open a
    /// subscription for the new one.
    pub async fn attach(&self, user_id: &str) -> Result<(), LedgerError> {
        let (epoch, previous) = {
            let mut inner = self.shared.lock();
            let previous = inner.take_subscription();
            let epoch = inner.cache.invalidate();
            inner.state = SessionState::Attaching {
                user_id: user_id.to_string(),
                subscription: None,
            };
            inner.loading = true;
            inner.last_error = None;
            self.shared.publish(&inner);
            (epoch, previous)
        };
        if let Some(old) = previous {
            old.unsubscribe();
        }
        info!("attaching ledger of {user_id} (epoch {epoch})");

        let on_snapshot = {
            let shared = Arc::clone(&self.shared);
            move |snapshot: Snapshot| {
                shared.deliver(epoch, snapshot);
            }
        };
        let on_error = {
            let shared = Arc::clone(&self.shared);
            move |error: StoreError| shared.channel_failed(epoch, error)
        };

        match self.client_for(user_id).subscribe(on_snapshot, on_error).await {
            Ok(subscription) => {
                let mut inner = self.shared.lock();
                if inner.cache.epoch() != epoch {
                    // a later attach/detach superseded this one
                    drop(inner);
                    subscription.unsubscribe();
                    return Ok(());
                }
                inner.state = SessionState::Attaching {
                    user_id: user_id.to_string(),
                    subscription: Some(subscription),
                };
                inner.promote();
                self.shared.publish(&inner);
                Ok(())
            }
            Err(e) => {
                let mut inner = self.shared.lock();
                if inner.cache.epoch() == epoch {
                    warn!("could not attach ledger of {user_id}: {e}");
                    inner.state = SessionState::SignedOut;
                    inner.loading = false;
                    inner.last_error = Some(e.clone());
                    self.shared.publish(&inner);
                }
                Err(e)
            }
        }
    }

    /// Close the subscription and forget the cached ledger. Idempotent.
    pub fn detach(&self) {
        let previous = {
            let mut inner = self.shared.lock();
            let previous = inner.take_subscription();
            inner.cache.invalidate();
            inner.loading = false;
            inner.last_error = None;
            self.shared.publish(&inner);
            previous
        };
        if let Some(old) = previous {
            old.unsubscribe();
            info!("session signed out");
        }
    }

    /// Follow the identity provider: attach on sign-in or user switch,
    /// detach on sign-out. Runs until the provider goes away.
    pub fn follow(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        let mut changes = self.identity.on_auth_change();

        tokio::spawn(async move {
            loop {
                let user = changes.borrow_and_update().clone();
                match user {
                    Some(user_id) => {
                        if session.user_id().as_deref() != Some(user_id.as_str()) {
                            if let Err(e) = session.attach(&user_id).await {
                                warn!("auto-attach for {user_id} failed: {e}");
                            }
                        }
                    }
                    None => session.detach(),
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn require_user(&self) -> Result<String, LedgerError> {
        self.user_id().ok_or(LedgerError::NotSignedIn)
    }

    /// Validate and write a new expense. Invalid input never reaches the store.
    pub async fn add_expense(
        &self,
        name: &str,
        amount: &str,
        category: Option<&str>,
    ) -> Result<RecordId, LedgerError> {
        let draft = validate_for_creation(name, amount, category)?;
        let user_id = self.require_user()?;
        self.client_for(&user_id).add(draft).await
    }

    pub async fn delete_expense(&self, id: &RecordId) -> Result<(), LedgerError> {
        let user_id = self.require_user()?;
        self.client_for(&user_id).delete_one(id).await
    }

    /// Delete every record currently shown, as one batch. Returns how many ids
    /// were submitted.
    pub async fn clear_all(&self) -> Result<usize, LedgerError> {
        let (user_id, ids) = {
            let inner = self.shared.lock();
            let user_id = inner.user_id().ok_or(LedgerError::NotSignedIn)?.to_string();
            let ids: Vec<RecordId> = inner.cache.records().iter().map(|r| r.id.clone()).collect();
            (user_id, ids)
        };
        self.client_for(&user_id).clear_all(&ids).await?;
        Ok(ids.len())
    }

    /// Sign out with the identity provider, then tear the session down
    pub async fn logout(&self) -> Result<(), LedgerError> {
        self.identity.sign_out().await?;
        self.detach();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let previous = self.shared.lock().take_subscription();
        drop(previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LocalIdentity;
    use crate::store::MemoryStore;
    use chrono::NaiveDate;
    use std::time::Duration;
    use tally_core::Category;
    use tokio::time::timeout;

    fn setup() -> (Arc<MemoryStore>, Arc<LocalIdentity>, Session) {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(LocalIdentity::new());
        let session = Session::new(store.clone(), identity.clone());
        (store, identity, session)
    }

    async fn settled(session: &Session) -> LedgerView {
        timeout(Duration::from_secs(2), session.wait_for(|v| !v.loading))
            .await
            .expect("session never settled")
    }

    fn rec(id: &str) -> ExpenseRecord {
        ExpenseRecord {
            id: RecordId::new(id),
            name: id.to_string(),
            amount: 1.0,
            category: Category::Food,
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
        }
    }

    #[tokio::test]
    async fn attach_goes_through_attaching_to_active() {
        let (_store, _identity, session) = setup();
        assert_eq!(session.phase(), SessionPhase::SignedOut);

        let mut rx = session.watch();
        session.attach("alice").await.unwrap();

        // the first published view after attach is the loading one
        rx.changed().await.unwrap();
        let first = rx.borrow_and_update().clone();
        assert!(first.loading);
        assert_eq!(first.phase, SessionPhase::Attaching { user_id: "alice".into() });

        let view = settled(&session).await;
        assert_eq!(view.phase, SessionPhase::Active { user_id: "alice".into() });
        assert!(view.records.is_empty());
    }

    #[tokio::test]
    async fn late_snapshot_from_previous_user_is_dropped() {
        let (store, _identity, session) = setup();
        store
            .create("alice", rec("a").fields())
            .await
            .unwrap();

        session.attach("alice").await.unwrap();
        settled(&session).await;
        let alice_epoch = session.shared.lock().cache.epoch();
        assert_eq!(session.records().len(), 1);

        session.detach();
        session.attach("bob").await.unwrap();
        settled(&session).await;

        // a push from alice's torn-down channel arriving after the switch
        let outcome = session
            .shared
            .deliver(alice_epoch, Snapshot::new(99, vec![rec("alice-late")]));
        assert_eq!(outcome, ApplyOutcome::StaleEpoch);
        assert!(session.records().is_empty());
        assert_eq!(session.user_id().as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn at_most_one_listener_across_switches() {
        let (store, _identity, session) = setup();
        session.attach("alice").await.unwrap();
        session.attach("bob").await.unwrap();
        session.attach("alice").await.unwrap();
        settled(&session).await;

        for _ in 0..10 {
            if store.listener_count("bob") == 0 && store.listener_count("alice") == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.listener_count("bob"), 0);
        assert_eq!(store.listener_count("alice"), 1);
    }

    #[tokio::test]
    async fn operations_need_a_user() {
        let (store, _identity, session) = setup();
        assert_eq!(
            session.add_expense("Tea", "10", None).await,
            Err(LedgerError::NotSignedIn)
        );
        assert_eq!(session.clear_all().await, Err(LedgerError::NotSignedIn));
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn channel_failure_keeps_last_good_records() {
        let (store, _identity, session) = setup();
        store.create("alice", rec("a").fields()).await.unwrap();
        session.attach("alice").await.unwrap();
        settled(&session).await;

        store.break_listeners("alice", StoreError::Network("offline".into()));
        let view = timeout(
            Duration::from_secs(2),
            session.wait_for(|v| v.error.is_some()),
        )
        .await
        .unwrap();

        assert_eq!(
            view.error,
            Some(LedgerError::Channel(StoreError::Network("offline".into())))
        );
        assert_eq!(view.records.len(), 1);
        assert!(!view.loading);
    }
}
