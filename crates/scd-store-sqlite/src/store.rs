//! [`SqliteStore`], the SQLite implementation of [`DimensionStore`].

use std::path::Path;

use scd_core::{
  record::{CurrentVersions, DimensionRecord},
  schema::TableKind,
  store::{DimensionStore, MergeOutcome},
  version::Delta,
};
use tracing::debug;

use crate::{
  Result,
  encode::{EncodedVersion, RawVersion, encode_table, encode_version},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A dimension version store backed by a single SQLite file.
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

  /// Open an in-memory store, for tests.
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

  /// Rows of `table`, optionally restricted to current versions.
  async fn select_versions(
    &self,
    table: TableKind,
    current_only: bool,
  ) -> Result<Vec<DimensionRecord>> {
    let table_str = encode_table(table);
    let sql = format!(
      "SELECT {}
       FROM dimension_versions
       WHERE dimension = ?1 {}
       ORDER BY natural_key, valid_from",
      RawVersion::COLUMNS,
      if current_only { "AND is_current = 1" } else { "" },
    );

    let raws: Vec<RawVersion> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![table_str], RawVersion::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawVersion::into_record).collect()
  }

  /// Whether any version of `table` has ever been written.
  async fn table_exists(&self, table: TableKind) -> Result<bool> {
    let table_str = encode_table(table);
    let exists = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT 1 FROM dimension_versions WHERE dimension = ?1 LIMIT 1")?;
        Ok(stmt.exists(rusqlite::params![table_str])?)
      })
      .await?;
    Ok(exists)
  }
}

// ─── DimensionStore impl ─────────────────────────────────────────────────────

impl DimensionStore for SqliteStore {
  type Error = crate::Error;

  async fn current_versions(&self, table: TableKind) -> Result<Option<CurrentVersions>> {
    if !self.table_exists(table).await? {
      return Ok(None);
    }
    let rows = self.select_versions(table, true).await?;
    Ok(Some(CurrentVersions::from_records(table, rows)?))
  }

  async fn history(&self, table: TableKind) -> Result<Vec<DimensionRecord>> {
    self.select_versions(table, false).await
  }

  async fn apply_delta<'a>(&'a self, delta: &'a Delta) -> Result<MergeOutcome> {
    let table_str = encode_table(delta.dimension);
    // Rows are keyed by (surrogate_key, valid_from): closing a version never
    // touches an earlier version that shared its fingerprint.
    // Expired rows first: they release the current slot the new rows take.
    let rows: Vec<EncodedVersion> =
      delta.rows().map(encode_version).collect::<Result<_>>()?;

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut outcome = MergeOutcome::default();
        {
          let mut exists = tx.prepare(
            "SELECT 1 FROM dimension_versions
             WHERE dimension = ?1 AND surrogate_key = ?2 AND valid_from = ?3",
          )?;
          let mut upsert = tx.prepare(
            "INSERT INTO dimension_versions (
               dimension, surrogate_key, natural_key, attributes,
               is_current, valid_from, valid_to
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (dimension, surrogate_key, valid_from) DO UPDATE SET
               natural_key = excluded.natural_key,
               attributes  = excluded.attributes,
               is_current  = excluded.is_current,
               valid_to    = excluded.valid_to",
          )?;

          for row in &rows {
            let existed = exists.exists(rusqlite::params![
              table_str,
              row.surrogate_key,
              row.valid_from,
            ])?;
            upsert.execute(rusqlite::params![
              table_str,
              row.surrogate_key,
              row.natural_key,
              row.attributes,
              row.is_current,
              row.valid_from,
              row.valid_to,
            ])?;
            if existed {
              outcome.updated += 1;
            } else {
              outcome.inserted += 1;
            }
          }
        }
        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    debug!(
      dimension = %delta.dimension,
      updated = outcome.updated,
      inserted = outcome.inserted,
      "merged delta"
    );
    Ok(outcome)
  }
}
