//! LedgerClient: typed ledger operations for one user.
//!
//! Writes go straight to the store; their effect is only observed through
//! the next pushed snapshot. Nothing here retries: every failure is returned
//! (or passed to `on_error`) and the caller decides what to do.

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tally_core::{ExpenseDraft, RecordId, Snapshot};
use tokio::task::JoinHandle;

use crate::error::{LedgerError, StoreError};
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct LedgerClient {
    store: Arc<dyn DocumentStore>,
    user_id: String,
    timezone: Tz,
}

/// Open subscription. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    closed: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stop delivery. After this returns no callback of this subscription
    /// runs again. Idempotent. Must not be called from inside one of the
    /// subscription's own callbacks.
    pub fn unsubscribe(&self) {
        let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if !*closed {
            *closed = true;
            self.task.abort();
            debug!("subscription closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl LedgerClient {
    pub fn new(store: Arc<dyn DocumentStore>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            timezone: Tz::UTC,
        }
    }

    /// Time zone whose calendar day is stamped on new records
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    /// Open the live channel.
    ///
    /// `on_snapshot` runs once right away with the current set and again on
    /// every change; snapshots are numbered from 1 in delivery order.
    /// `on_error` runs at most once, when the channel fails or the store ends
    /// it; no snapshot follows.
    pub async fn subscribe<S, E>(&self, mut on_snapshot: S, on_error: E) -> Result<SubscriptionHandle, LedgerError>
    where
        S: FnMut(Snapshot) + Send + 'static,
        E: FnOnce(StoreError) + Send + 'static,
    {
        let mut feed = self
            .store
            .listen(&self.user_id)
            .await
            .map_err(LedgerError::Channel)?;
        info!("subscribed to ledger of {}", self.user_id);

        let closed = Arc::new(Mutex::new(false));
        let gate = Arc::clone(&closed);
        let user_id = self.user_id.clone();

        let task = tokio::spawn(async move {
            let mut sequence = 0u64;
            let mut on_error = Some(on_error);

            loop {
                let item = feed.recv().await;

                // Callbacks run under the gate so `unsubscribe` cannot return
                // while one is in flight.
                let is_closed = gate.lock().unwrap_or_else(PoisonError::into_inner);
                if *is_closed {
                    break;
                }
                match item {
                    Some(Ok(records)) => {
                        sequence += 1;
                        on_snapshot(Snapshot::new(sequence, records));
                    }
                    Some(Err(e)) => {
                        warn!("ledger channel for {user_id} failed: {e}");
                        if let Some(f) = on_error.take() {
                            f(e);
                        }
                        break;
                    }
                    None => {
                        warn!("ledger channel for {user_id} ended by the store");
                        if let Some(f) = on_error.take() {
                            f(StoreError::Closed);
                        }
                        break;
                    }
                }
            }
        });

        Ok(SubscriptionHandle { closed, task })
    }

    /// Append a record stamped with today's date. Returns the store-assigned id.
    pub async fn add(&self, draft: ExpenseDraft) -> Result<RecordId, LedgerError> {
        let fields = draft.into_fields(self.today());
        let id = self
            .store
            .create(&self.user_id, fields)
            .await
            .map_err(LedgerError::Write)?;
        debug!("added {id} to ledger of {}", self.user_id);
        Ok(id)
    }

    /// Remove one record. A missing id is not an error.
    pub async fn delete_one(&self, id: &RecordId) -> Result<(), LedgerError> {
        self.store
            .delete(&self.user_id, id)
            .await
            .map_err(LedgerError::Write)?;
        debug!("deleted {id} from ledger of {}", self.user_id);
        Ok(())
    }

    /// Remove every listed record in one atomic batch
    pub async fn clear_all(&self, ids: &[RecordId]) -> Result<(), LedgerError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.store
            .delete_batch(&self.user_id, ids)
            .await
            .map_err(LedgerError::Write)?;
        info!("cleared {} records from ledger of {}", ids.len(), self.user_id);
        Ok(())
    }
}
