//! SQLite backend for the Tenure subscription engine.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Writes made through a
//! [`SqliteTransaction`] are staged in memory and flushed inside one SQLite
//! transaction on commit.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{SqliteStore, SqliteTransaction};

#[cfg(test)]
mod tests;
