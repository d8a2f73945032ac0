//! In-memory document state with checkout/check-in semantics and per-request
//! change diffs, plus ordered selections for paging through large filtered
//! views stored in SQLite.

pub mod cache;
pub mod changes;
pub mod config;
pub mod document;
pub mod error;
pub mod view;

pub use cache::DocumentRepository;
pub use config::Config;
pub use error::{Error, Result};
pub use rusqlite;
pub use rusqlite_migration;
pub use serde_rusqlite;
