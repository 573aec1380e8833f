//! Error types for `scd-core`.
//!
//! Every variant is fatal for the run that raised it. Nothing in the core
//! retries; transient I/O belongs to the store collaborator.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{record::NaturalKey, schema::TableKind};

#[derive(Debug, Error)]
pub enum Error {
  #[error("tracked attribute {attribute:?} is missing from the record")]
  MissingAttribute { attribute: String },

  #[error("natural key column {column:?} is null")]
  NullNaturalKey { column: String },

  #[error("invalid dimension configuration: {0}")]
  InvalidConfig(String),

  #[error("dimension {dimension} has more than one current version for {natural_key}")]
  DuplicateCurrentVersion {
    dimension:   TableKind,
    natural_key: NaturalKey,
  },

  #[error(
    "processing time {processed_at} of {dimension} does not advance past {natural_key}'s current version (valid from {valid_from})"
  )]
  NonMonotonicProcessingTime {
    dimension:    TableKind,
    natural_key:  NaturalKey,
    processed_at: DateTime<Utc>,
    valid_from:   DateTime<Utc>,
  },

  #[error(
    "referential integrity violated joining {dimension}: fact rows went from {before} to {after} ({})",
    row_drift(.before, .after)
  )]
  ReferentialIntegrity {
    dimension: TableKind,
    before:    usize,
    after:     usize,
  },

  #[error(
    "schema mismatch on {table}: missing columns {missing:?}, mismatched columns {mismatched:?}"
  )]
  SchemaMismatch {
    table:      TableKind,
    missing:    Vec<String>,
    mismatched: Vec<String>,
  },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wrap a [`crate::store::DimensionStore`] error.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  /// Validation failures abort a run before anything is written.
  pub fn is_validation(&self) -> bool {
    matches!(
      self,
      Self::MissingAttribute { .. }
        | Self::NullNaturalKey { .. }
        | Self::InvalidConfig(_)
        | Self::DuplicateCurrentVersion { .. }
        | Self::NonMonotonicProcessingTime { .. }
    )
  }
}

fn row_drift(before: &usize, after: &usize) -> String {
  let verb = if after < before { "lost" } else { "duplicated" };
  format!("{} {verb}", before.abs_diff(*after))
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
