//! TaskStore - generic persistent record store
//!
//! Records are JSON documents stored in SQLite, keyed by `(collection, id)`.
//! Each record publishes a set of indexed fields which back filtered listing
//! and conditional (compare-and-set) updates.
//!
//! Ids are integers allocated by the store at create time, monotonically
//! increasing per collection, so "ascending id" is also "creation order".

mod error;
mod record;
mod store;

pub use error::{StoreError, StoreResult};
pub use record::{Filter, FilterOp, IndexValue, Record, now_ms};
pub use store::{DB_FILE_NAME, Store};
