//! [`SqliteStore`], the SQLite implementation of [`SubscriptionStore`].

use std::path::Path;

use rusqlite::OptionalExtension as _;
use tenure_core::{
  store::{PatchLogEntry, ResourceManager, SubscriptionStore, Transaction},
  view::{Materialized, SubscriptionRecord, SubscriptionView},
};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{RawLogEntry, RawRow, RawView, Row, encode_uuid},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A subscription store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

fn select_children(
  conn: &rusqlite::Connection,
  table: &str,
  subscription_id: &str,
) -> rusqlite::Result<Vec<RawRow>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT id, record_json FROM {table} WHERE subscription_id = ?1 ORDER BY rowid"
  ))?;
  let rows = stmt
    .query_map(rusqlite::params![subscription_id], RawRow::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

impl SubscriptionStore for SqliteStore {
  type Error = Error;
  type Transaction = SqliteTransaction;

  async fn get_view(&self, subscription_id: Uuid) -> Result<Option<SubscriptionView>> {
    let id_str = encode_uuid(subscription_id);

    let raw = self
      .conn
      .call(move |conn| {
        let subscription = conn
          .query_row(
            "SELECT id, record_json FROM subscriptions WHERE id = ?1",
            rusqlite::params![id_str],
            RawRow::from_row,
          )
          .optional()?;
        let Some(subscription) = subscription else { return Ok(None) };

        Ok(Some(RawView {
          subscription,
          phases: select_children(conn, "phases", &id_str)?,
          items: select_children(conn, "items", &id_str)?,
          entitlements: select_children(conn, "entitlements", &id_str)?,
          prices: select_children(conn, "prices", &id_str)?,
        }))
      })
      .await?;

    raw.map(RawView::into_view).transpose()
  }

  async fn list_subscriptions(
    &self,
    customer_id: Option<Uuid>,
  ) -> Result<Vec<Materialized<SubscriptionRecord>>> {
    let customer = customer_id.map(encode_uuid);

    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT id, record_json FROM subscriptions
           WHERE ?1 IS NULL OR customer_id = ?1
           ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![customer], RawRow::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.into_iter().map(RawRow::into_materialized).collect()
  }

  async fn patch_log(&self, subscription_id: Uuid) -> Result<Vec<PatchLogEntry>> {
    let id_str = encode_uuid(subscription_id);

    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT subscription_id, batch_id, batch_index, op, path, value_json, applied_at
           FROM patch_log
           WHERE subscription_id = ?1
           ORDER BY entry_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], RawLogEntry::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows.into_iter().map(RawLogEntry::into_entry).collect()
  }

  async fn begin(&self) -> Result<SqliteTransaction> {
    Ok(SqliteTransaction { conn: self.conn.clone(), writes: Vec::new() })
  }
}

// ─── Transaction ─────────────────────────────────────────────────────────────

/// One staged statement.
enum Write {
  Insert {
    table:        &'static str,
    owner_column: &'static str,
    id:           String,
    owner:        String,
    record_json:  String,
  },
  Update {
    table:       &'static str,
    id:          Uuid,
    record_json: String,
  },
  Delete {
    table: &'static str,
    id:    Uuid,
  },
  Log(RawLogEntry),
}

impl Write {
  fn execute(&self, tx: &rusqlite::Transaction<'_>) -> tokio_rusqlite::Result<()> {
    match self {
      Write::Insert { table, owner_column, id, owner, record_json } => {
        tx.execute(
          &format!("INSERT INTO {table} (id, {owner_column}, record_json) VALUES (?1, ?2, ?3)"),
          rusqlite::params![id, owner, record_json],
        )?;
      }
      Write::Update { table, id, record_json } => {
        let changed = tx.execute(
          &format!("UPDATE {table} SET record_json = ?2 WHERE id = ?1"),
          rusqlite::params![encode_uuid(*id), record_json],
        )?;
        if changed == 0 {
          return Err(missing(table, *id));
        }
      }
      Write::Delete { table, id } => {
        let changed = tx.execute(
          &format!("DELETE FROM {table} WHERE id = ?1"),
          rusqlite::params![encode_uuid(*id)],
        )?;
        if changed == 0 {
          return Err(missing(table, *id));
        }
      }
      Write::Log(entry) => {
        tx.execute(
          "INSERT INTO patch_log
             (subscription_id, batch_id, batch_index, op, path, value_json, applied_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            entry.subscription_id,
            entry.batch_id,
            entry.batch_index,
            entry.op,
            entry.path,
            entry.value_json,
            entry.applied_at,
          ],
        )?;
      }
    }
    Ok(())
  }
}

fn missing(table: &'static str, id: Uuid) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(Error::RowNotFound { table, id }))
}

/// Recover errors raised by this crate inside a `call` closure.
fn unwrap_call_error(e: tokio_rusqlite::Error) -> Error {
  match e {
    tokio_rusqlite::Error::Other(inner) => match inner.downcast::<Error>() {
      Ok(inner) => *inner,
      Err(inner) => Error::Database(tokio_rusqlite::Error::Other(inner)),
    },
    e => Error::Database(e),
  }
}

/// Writes staged against a [`SqliteStore`].
///
/// Nothing reaches the database before [`Transaction::commit`]; dropping the
/// transaction discards the staged writes. Missing rows surface as
/// [`Error::RowNotFound`] from `commit`.
pub struct SqliteTransaction {
  conn:   tokio_rusqlite::Connection,
  writes: Vec<Write>,
}

impl<T> ResourceManager<T> for SqliteTransaction
where
  T: Row + Clone + Send + Sync,
{
  type Error = Error;

  async fn create(&mut self, target: &T) -> Result<Materialized<T>> {
    let id = Uuid::new_v4();
    self.writes.push(Write::Insert {
      table:        T::TABLE,
      owner_column: T::OWNER_COLUMN,
      id:           encode_uuid(id),
      owner:        encode_uuid(target.owner()),
      record_json:  serde_json::to_string(target)?,
    });
    Ok(Materialized { id, value: target.clone() })
  }

  async fn update(&mut self, current: &Materialized<T>, target: &T) -> Result<Materialized<T>> {
    self.writes.push(Write::Update {
      table:       T::TABLE,
      id:          current.id,
      record_json: serde_json::to_string(target)?,
    });
    Ok(Materialized { id: current.id, value: target.clone() })
  }

  async fn delete(&mut self, current: &Materialized<T>) -> Result<()> {
    self.writes.push(Write::Delete { table: T::TABLE, id: current.id });
    Ok(())
  }
}

impl Transaction for SqliteTransaction {
  type StoreError = Error;

  async fn append_patch_log(&mut self, entries: Vec<PatchLogEntry>) -> Result<()> {
    for entry in &entries {
      self.writes.push(Write::Log(RawLogEntry::encode(entry)?));
    }
    Ok(())
  }

  async fn commit(self) -> Result<()> {
    let writes = self.writes;
    if writes.is_empty() {
      return Ok(());
    }

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for write in &writes {
          write.execute(&tx)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await
      .map_err(unwrap_call_error)
  }
}
