//! Remote document store abstraction.
//!
//! A store holds one `expenses` sub-collection per user
//! (`users/{uid}/expenses/{id}`) and pushes the complete collection to every
//! listener whenever it changes.

use async_trait::async_trait;
use tally_core::{ExpenseFields, ExpenseRecord, RecordId};
use tokio::sync::mpsc;

use crate::error::StoreError;

pub mod firestore;
pub mod memory;

pub use firestore::{FirestoreConfig, FirestoreStore};
pub use memory::MemoryStore;

/// Pushed snapshots for one user's collection.
///
/// The first item is the collection as it stands when the listener attaches.
/// An `Err` item is terminal. Dropping the receiver detaches the listener.
pub type SnapshotFeed = mpsc::UnboundedReceiver<Result<Vec<ExpenseRecord>, StoreError>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document with a store-assigned id
    async fn create(&self, user_id: &str, fields: ExpenseFields) -> Result<RecordId, StoreError>;

    /// Delete one document. Deleting a missing id succeeds.
    async fn delete(&self, user_id: &str, id: &RecordId) -> Result<(), StoreError>;

    /// Delete every listed document in one all-or-nothing transaction
    async fn delete_batch(&self, user_id: &str, ids: &[RecordId]) -> Result<(), StoreError>;

    /// Start listening to the user's collection
    async fn listen(&self, user_id: &str) -> Result<SnapshotFeed, StoreError>;
}

/// Collection path relative to the database root
pub fn expenses_path(user_id: &str) -> String {
    format!("users/{user_id}/expenses")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expenses_path() {
        assert_eq!(expenses_path("u42"), "users/u42/expenses");
    }
}
