//! Change detection: classify an incoming snapshot against current versions.
//!
//! A row whose fingerprint is already current is unchanged. Of the rest, a
//! row whose natural key has a current version is a change to that entity;
//! otherwise the natural key is new.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::{
  config::DimensionConfig,
  hash::HashedRow,
  record::{CurrentVersions, DimensionRecord, NaturalKey, SurrogateKey},
  schema::TableKind,
};

/// A changed entity: the version to close and the row that replaces it.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
  pub previous: DimensionRecord,
  pub incoming: HashedRow,
}

/// Disjoint classification of one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
  pub dimension:    TableKind,
  /// No version set existed before this run.
  pub initial_load: bool,
  pub new:          Vec<HashedRow>,
  pub changed:      Vec<Change>,
  pub unchanged:    Vec<NaturalKey>,
  /// Incoming rows dropped because an earlier row had the same natural key.
  pub duplicates:   usize,
}

impl ChangeSet {
  /// True when nothing needs to be written.
  pub fn is_empty(&self) -> bool {
    self.new.is_empty() && self.changed.is_empty()
  }
}

/// Keep the first row per natural key.
fn dedupe_by_natural_key(
  dimension: TableKind,
  rows: Vec<HashedRow>,
) -> (Vec<HashedRow>, usize) {
  let mut seen: BTreeSet<NaturalKey> = BTreeSet::new();
  let before = rows.len();
  let kept: Vec<HashedRow> = rows
    .into_iter()
    .filter(|row| seen.insert(row.natural_key.clone()))
    .collect();
  let dropped = before - kept.len();
  if dropped > 0 {
    warn!(%dimension, dropped, "dropped incoming rows with a repeated natural key");
  }
  (kept, dropped)
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector<'a> {
  config: &'a DimensionConfig,
}

impl<'a> ChangeDetector<'a> {
  pub fn new(config: &'a DimensionConfig) -> Self { Self { config } }

  /// Classify `incoming` against `existing`. `None` means the dimension has
  /// never been written, and every row is new.
  pub fn detect(
    &self,
    incoming: Vec<HashedRow>,
    existing: Option<&CurrentVersions>,
  ) -> ChangeSet {
    let dimension = self.config.table();
    let (incoming, duplicates) = dedupe_by_natural_key(dimension, incoming);

    let current_keys: HashSet<SurrogateKey> = existing
      .map(|cur| cur.iter().map(|r| r.surrogate_key).collect())
      .unwrap_or_default();

    let mut set = ChangeSet {
      dimension,
      initial_load: existing.is_none(),
      new: Vec::new(),
      changed: Vec::new(),
      unchanged: Vec::new(),
      duplicates,
    };

    for row in incoming {
      if current_keys.contains(&row.surrogate_key) {
        debug!(%dimension, natural_key = %row.natural_key, "unchanged");
        set.unchanged.push(row.natural_key);
        continue;
      }
      match existing.and_then(|cur| cur.get(&row.natural_key)) {
        Some(previous) => {
          debug!(
            %dimension,
            natural_key = %row.natural_key,
            from = %previous.surrogate_key,
            to = %row.surrogate_key,
            "changed"
          );
          set.changed.push(Change {
            previous: previous.clone(),
            incoming: row,
          });
        }
        None => {
          debug!(%dimension, natural_key = %row.natural_key, "new");
          set.new.push(row);
        }
      }
    }

    set
  }
}
