//! One logical pass per invocation: hash, detect, version, merge; and, for
//! facts, load histories, join, guard.
//!
//! The processing timestamp is chosen by the caller, once per run, and shared
//! by every row.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Instrument as _, info, info_span};
use uuid::Uuid;

use crate::{
  Error, Result,
  config::DimensionConfig,
  detect::ChangeDetector,
  hash::AttributeHasher,
  join::{PointInTimeJoiner, join_all},
  record::{Attributes, EnrichedFact, FactRecord},
  schema::TableKind,
  stats::OutputStats,
  store::{DimensionStore, MergeOutcome},
  version::{Delta, VersionManager},
};

/// What a refresh did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
  pub run_id:       Uuid,
  pub dimension:    TableKind,
  pub processed_at: DateTime<Utc>,
  pub initial_load: bool,
  pub new:          usize,
  pub changed:      usize,
  pub unchanged:    usize,
  pub duplicates:   usize,
  pub merge:        MergeOutcome,
  pub delta:        Delta,
}

/// Bring `config`'s dimension in line with `rows`.
///
/// Every row is hashed before the store is touched, so a validation error
/// aborts the run with nothing written. The delta is handed to the store in a
/// single [`DimensionStore::apply_delta`] call, or not at all when empty.
pub async fn refresh_dimension<S: DimensionStore>(
  store: &S,
  config: &DimensionConfig,
  rows: Vec<Attributes>,
  processed_at: DateTime<Utc>,
) -> Result<RunReport> {
  let run_id = Uuid::new_v4();
  let dimension = config.table();
  let span = info_span!("refresh", %dimension, %run_id);

  async move {
    info!(rows = rows.len(), %processed_at, "starting refresh");

    let hashed = AttributeHasher::new(config).hash_all(rows)?;
    let existing = store
      .current_versions(dimension)
      .await
      .map_err(Error::store)?;

    let changes = ChangeDetector::new(config).detect(hashed, existing.as_ref());
    let (new, changed, unchanged, duplicates, initial_load) = (
      changes.new.len(),
      changes.changed.len(),
      changes.unchanged.len(),
      changes.duplicates,
      changes.initial_load,
    );

    let delta = if changes.is_empty() {
      info!(unchanged, "no changes");
      Delta {
        dimension,
        processed_at,
        expired: Vec::new(),
        inserted: Vec::new(),
      }
    } else {
      VersionManager::new(config).plan(changes, processed_at)?
    };

    let merge = if delta.is_empty() {
      MergeOutcome::default()
    } else {
      store.apply_delta(&delta).await.map_err(Error::store)?
    };

    info!(
      new,
      changed,
      unchanged,
      updated = merge.updated,
      inserted = merge.inserted,
      "refresh complete"
    );

    Ok(RunReport {
      run_id,
      dimension,
      processed_at,
      initial_load,
      new,
      changed,
      unchanged,
      duplicates,
      merge,
      delta,
    })
  }
  .instrument(span)
  .await
}

/// Attach to each fact the surrogate key of every dimension it references,
/// as of the fact's event time.
///
/// Dimensions are joined one at a time in [`TableKind`] order, each step
/// guarded. Any fact that fails to resolve to exactly one version fails the
/// whole batch; there is no partial output.
pub async fn enrich_facts<S: DimensionStore>(
  store: &S,
  facts: Vec<FactRecord>,
) -> Result<Vec<EnrichedFact>> {
  let run_id = Uuid::new_v4();
  let span = info_span!("enrich", %run_id);

  async move {
    let dimensions: BTreeSet<TableKind> = facts
      .iter()
      .flat_map(|f| f.references.keys().copied())
      .collect();
    info!(facts = facts.len(), dimensions = dimensions.len(), "starting enrichment");

    let mut joiners = Vec::with_capacity(dimensions.len());
    for dimension in dimensions {
      let history = store.history(dimension).await.map_err(Error::store)?;
      OutputStats::for_versions(&history).log(dimension);
      joiners.push(PointInTimeJoiner::new(dimension, history));
    }

    let enriched = join_all(facts, &joiners)?;
    OutputStats::for_facts(&enriched).log(TableKind::StoreFact);
    Ok(enriched)
  }
  .instrument(span)
  .await
}
