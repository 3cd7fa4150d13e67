//! Error type for `tenure-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tenure_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// An update or delete addressed a row that is not in its table.
  #[error("{table} row not found: {id}")]
  RowNotFound { table: &'static str, id: uuid::Uuid },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
