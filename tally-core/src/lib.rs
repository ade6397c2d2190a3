//! tally-core: expense records, the ledger cache and category aggregation

pub mod aggregate;
pub mod cache;
pub mod expense;

pub use aggregate::{CategoryTotals, aggregate};
pub use cache::{ApplyOutcome, Epoch, LedgerCache, Snapshot};
pub use expense::{
    Category, ExpenseDraft, ExpenseFields, ExpenseRecord, RecordId, ValidationError,
    validate_for_creation,
};
