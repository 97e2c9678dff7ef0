//! Durable storage for handlemail: scheduled tasks, their run history, and
//! the sender whitelist. `SQLite` via `sqlmodel`, one writer / few readers.
//!
//! # Timestamp convention
//!
//! All timestamps are stored as `i64` microseconds since the Unix epoch,
//! matching `sqlmodel`'s convention; [`timestamps`] converts to/from
//! `chrono::NaiveDateTime` at the crate boundary.

#![forbid(unsafe_code)]

pub mod error;
pub mod pool;
pub mod queries;
pub mod schema;
pub mod timestamps;
pub mod work_queue;

pub use error::{DbError, DbResult, is_lock_error};
pub use pool::{DbPool, DbPoolConfig, auto_pool_size};
pub use queries::{TaskStore, WhitelistStore};
pub use timestamps::{micros_to_naive, naive_to_micros, now_micros};
pub use work_queue::{JobStatus, LeasedJob, WorkQueueStore};

pub use sqlmodel;
pub use sqlmodel_sqlite;

/// The connection type used by this crate's pool and queries.
pub type DbConn = sqlmodel_sqlite::SqliteConnection;
