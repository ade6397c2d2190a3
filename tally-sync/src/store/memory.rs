//! In-process document store.
//!
//! Behaves like the remote store from a client's point of view: ids are
//! assigned on create, every mutation is pushed to all listeners of the
//! affected user, and batch deletes are all-or-nothing. Failures can be
//! injected to exercise error paths.

use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tally_core::{ExpenseFields, ExpenseRecord, RecordId};
use tokio::sync::mpsc;

use super::{DocumentStore, SnapshotFeed};
use crate::error::StoreError;

type Listener = mpsc::UnboundedSender<Result<Vec<ExpenseRecord>, StoreError>>;

#[derive(Default)]
struct Inner {
    ledgers: HashMap<String, Vec<ExpenseRecord>>,
    listeners: HashMap<String, Vec<Listener>>,
    next_id: u64,
    write_calls: usize,
    fail_next_write: Option<StoreError>,
}

impl Inner {
    fn ledger(&mut self, user_id: &str) -> &mut Vec<ExpenseRecord> {
        self.ledgers.entry(user_id.to_string()).or_default()
    }

    fn take_injected_failure(&mut self) -> Result<(), StoreError> {
        self.write_calls += 1;
        match self.fail_next_write.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn notify(&mut self, user_id: &str) {
        let snapshot = self.ledgers.get(user_id).cloned().unwrap_or_default();
        if let Some(listeners) = self.listeners.get_mut(user_id) {
            listeners.retain(|l| l.send(Ok(snapshot.clone())).is_ok());
            debug!(
                "pushed {} records to {} listener(s) of {user_id}",
                snapshot.len(),
                listeners.len()
            );
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current contents of a user's collection
    pub fn records(&self, user_id: &str) -> Vec<ExpenseRecord> {
        self.lock().ledgers.get(user_id).cloned().unwrap_or_default()
    }

    /// Number of write calls received, failed ones included
    pub fn write_calls(&self) -> usize {
        self.lock().write_calls
    }

    /// Live listeners of a user's collection
    pub fn listener_count(&self, user_id: &str) -> usize {
        let mut inner = self.lock();
        match inner.listeners.get_mut(user_id) {
            Some(listeners) => {
                listeners.retain(|l| !l.is_closed());
                listeners.len()
            }
            None => 0,
        }
    }

    /// Make the next create / delete / batch call fail with `error`
    pub fn fail_next_write(&self, error: StoreError) {
        self.lock().fail_next_write = Some(error);
    }

    /// Terminate every listener of `user_id` with `error`
    pub fn break_listeners(&self, user_id: &str, error: StoreError) {
        let mut inner = self.lock();
        if let Some(listeners) = inner.listeners.remove(user_id) {
            for l in listeners {
                let _ = l.send(Err(error.clone()));
            }
        }
    }

    /// Push the current collection again without changing it, as a store
    /// does when it re-sends an unchanged result set.
    pub fn resend(&self, user_id: &str) {
        self.lock().notify(user_id);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, user_id: &str, fields: ExpenseFields) -> Result<RecordId, StoreError> {
        let mut inner = self.lock();
        inner.take_injected_failure()?;

        inner.next_id += 1;
        let id = RecordId::new(format!("mem-{:06}", inner.next_id));
        inner
            .ledger(user_id)
            .push(ExpenseRecord::from_fields(id.clone(), fields));
        inner.notify(user_id);
        Ok(id)
    }

    async fn delete(&self, user_id: &str, id: &RecordId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.take_injected_failure()?;

        let ledger = inner.ledger(user_id);
        let before = ledger.len();
        ledger.retain(|r| &r.id != id);
        if ledger.len() != before {
            inner.notify(user_id);
        }
        Ok(())
    }

    async fn delete_batch(&self, user_id: &str, ids: &[RecordId]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.take_injected_failure()?;

        let ledger = inner.ledger(user_id);
        let before = ledger.len();
        ledger.retain(|r| !ids.contains(&r.id));
        if ledger.len() != before {
            inner.notify(user_id);
        }
        Ok(())
    }

    async fn listen(&self, user_id: &str) -> Result<SnapshotFeed, StoreError> {
        let mut inner = self.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        let current = inner.ledgers.get(user_id).cloned().unwrap_or_default();
        // Cannot fail: rx is still held here.
        let _ = tx.send(Ok(current));
        inner
            .listeners
            .entry(user_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
