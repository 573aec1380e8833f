//! SCD2 versioning: turn a [`ChangeSet`] into a delta of version rows.
//!
//! A changed natural key has its current version closed at the run's
//! processing time `T` and a new version opened at `T`. A natural key seen
//! for the first time opens at [`beginning_of_time`] instead: it is a new
//! entity, not a change to an existing one.
//!
//! The delta is the union of closed and opened versions, keyed by
//! [`VersionKey`], to be merged atomically by the store (update on match,
//! insert otherwise, never delete). A closed version keeps its key when it is
//! closed, and a reopened fingerprint starts a new row, so no merge ever
//! touches a version other than the one it closes.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
  Error, Result,
  config::DimensionConfig,
  detect::ChangeSet,
  hash::HashedRow,
  record::{DimensionRecord, NaturalKey, SurrogateKey, VersionKey, beginning_of_time},
  schema::TableKind,
  store::MergeOutcome,
};

// ─── Delta ───────────────────────────────────────────────────────────────────

/// Version rows to merge for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
  pub dimension:    TableKind,
  /// The single processing timestamp shared by every row of the run.
  pub processed_at: DateTime<Utc>,
  /// Previously current versions, now closed at `processed_at`.
  pub expired:      Vec<DimensionRecord>,
  /// New current versions; surrogate keys are unique.
  pub inserted:     Vec<DimensionRecord>,
}

impl Delta {
  pub fn is_empty(&self) -> bool {
    self.expired.is_empty() && self.inserted.is_empty()
  }

  /// Expired rows first, then inserted rows. Merging in this order never
  /// leaves two current versions of one natural key.
  pub fn rows(&self) -> impl Iterator<Item = &DimensionRecord> {
    self.expired.iter().chain(&self.inserted)
  }

  /// Merge into an in-memory version table, with the same semantics the
  /// store must provide.
  pub fn merge_into(
    &self,
    table: &mut BTreeMap<VersionKey, DimensionRecord>,
  ) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    for row in self.rows() {
      match table.insert(row.version_key(), row.clone()) {
        Some(_) => outcome.updated += 1,
        None => outcome.inserted += 1,
      }
    }
    outcome
  }
}

// ─── VersionManager ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct VersionManager<'a> {
  config: &'a DimensionConfig,
}

fn open_version(row: HashedRow, valid_from: DateTime<Utc>) -> DimensionRecord {
  DimensionRecord {
    natural_key: row.natural_key,
    surrogate_key: row.surrogate_key,
    attributes: row.attributes,
    is_current: true,
    valid_from,
    valid_to: None,
  }
}

impl<'a> VersionManager<'a> {
  pub fn new(config: &'a DimensionConfig) -> Self { Self { config } }

  /// Plan the delta for `changes`, stamping every transition with
  /// `processed_at`.
  ///
  /// Fails if `processed_at` is not after the `valid_from` of a version it
  /// would close, since that would produce an empty or inverted interval.
  pub fn plan(
    &self,
    changes: ChangeSet,
    processed_at: DateTime<Utc>,
  ) -> Result<Delta> {
    let dimension = self.config.table();
    let mut expired = Vec::with_capacity(changes.changed.len());
    let mut inserted =
      Vec::with_capacity(changes.new.len() + changes.changed.len());
    // A repeated surrogate key skips the whole transition, expiry included,
    // so the skipped natural key keeps its current version.
    let mut seen = HashSet::new();
    let mut dropped = 0;

    for change in changes.changed {
      if processed_at <= change.previous.valid_from {
        return Err(Error::NonMonotonicProcessingTime {
          dimension,
          natural_key: change.previous.natural_key,
          processed_at,
          valid_from: change.previous.valid_from,
        });
      }
      if !seen.insert(change.incoming.surrogate_key) {
        dropped += 1;
        continue;
      }
      expired.push(change.previous.closed_at(processed_at));
      inserted.push(open_version(change.incoming, processed_at));
    }
    for row in changes.new {
      if !seen.insert(row.surrogate_key) {
        dropped += 1;
        continue;
      }
      inserted.push(open_version(row, beginning_of_time()));
    }

    if dropped > 0 {
      warn!(
        %dimension,
        dropped,
        "dropped new versions with a repeated surrogate key"
      );
    }

    info!(
      %dimension,
      %processed_at,
      expired = expired.len(),
      inserted = inserted.len(),
      "planned version delta"
    );

    Ok(Delta { dimension, processed_at, expired, inserted })
  }
}

// ─── History checks ──────────────────────────────────────────────────────────

/// A broken invariant in a dimension's version history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryViolation {
  /// Not exactly one current version.
  CurrentCount { natural_key: NaturalKey, count: usize },
  /// A version starts before the previous one ends.
  Overlap { natural_key: NaturalKey, at: DateTime<Utc> },
  /// A version starts after the previous one ends.
  Gap { natural_key: NaturalKey, at: DateTime<Utc> },
  /// `is_current` disagrees with `valid_to`, or `valid_to <= valid_from`.
  Malformed { natural_key: NaturalKey, surrogate_key: SurrogateKey },
}

/// Check single-current, non-overlap and contiguity for every natural key.
pub fn history_violations(records: &[DimensionRecord]) -> Vec<HistoryViolation> {
  let mut by_key: BTreeMap<&NaturalKey, Vec<&DimensionRecord>> = BTreeMap::new();
  for r in records {
    by_key.entry(&r.natural_key).or_default().push(r);
  }

  let mut violations = Vec::new();
  for (key, mut versions) in by_key {
    versions.sort_by_key(|v| v.valid_from);

    let current = versions.iter().filter(|v| v.is_current).count();
    if current != 1 {
      violations.push(HistoryViolation::CurrentCount {
        natural_key: key.clone(),
        count:       current,
      });
    }

    for v in &versions {
      let well_formed = match v.valid_to {
        None => v.is_current,
        Some(to) => !v.is_current && v.valid_from < to,
      };
      if !well_formed {
        violations.push(HistoryViolation::Malformed {
          natural_key:   key.clone(),
          surrogate_key: v.surrogate_key,
        });
      }
    }

    for pair in versions.windows(2) {
      let next_from = pair[1].valid_from;
      match pair[0].valid_to {
        Some(end) if end == next_from => {}
        Some(end) if end < next_from => violations.push(HistoryViolation::Gap {
          natural_key: key.clone(),
          at:          end,
        }),
        _ => violations.push(HistoryViolation::Overlap {
          natural_key: key.clone(),
          at:          next_from,
        }),
      }
    }
  }
  violations
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use proptest::prelude::*;

  use super::*;
  use crate::{
    detect::{Change, ChangeDetector},
    hash::AttributeHasher,
    record::{AttrValue, Attributes, CurrentVersions},
  };

  fn config() -> DimensionConfig {
    DimensionConfig::new(
      TableKind::ProdDim,
      "prod_id",
      vec!["prod_id".into(), "color".into(), "size".into()],
    )
    .unwrap()
  }

  fn row(id: &str, color: &str, size: &str) -> Attributes {
    let mut r = Attributes::new();
    r.insert("prod_id".into(), id.into());
    r.insert("color".into(), color.into());
    r.insert("size".into(), size.into());
    r
  }

  fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
  }

  /// One full refresh against an in-memory version table.
  fn run(
    cfg: &DimensionConfig,
    table: &mut BTreeMap<VersionKey, DimensionRecord>,
    snapshot: Vec<Attributes>,
    processed_at: DateTime<Utc>,
  ) -> Delta {
    let existing = if table.is_empty() {
      None
    } else {
      let records = table.values().cloned();
      Some(CurrentVersions::from_records(cfg.table(), records).unwrap())
    };
    let rows = AttributeHasher::new(cfg).hash_all(snapshot).unwrap();
    let changes = ChangeDetector::new(cfg).detect(rows, existing.as_ref());
    let delta = VersionManager::new(cfg).plan(changes, processed_at).unwrap();
    delta.merge_into(table);
    delta
  }

  fn history(table: &BTreeMap<VersionKey, DimensionRecord>) -> Vec<DimensionRecord> {
    table.values().cloned().collect()
  }

  #[test]
  fn initial_load_opens_at_beginning_of_time() {
    let cfg = config();
    let mut table = BTreeMap::new();
    let delta = run(&cfg, &mut table, vec![row("A", "red", "5")], at(1));

    assert!(delta.expired.is_empty());
    assert_eq!(delta.inserted.len(), 1);
    let a = &delta.inserted[0];
    assert!(a.is_current);
    assert_eq!(a.valid_from, beginning_of_time());
    assert_eq!(a.valid_to, None);
  }

  #[test]
  fn rerun_with_identical_snapshot_is_a_no_op() {
    let cfg = config();
    let mut table = BTreeMap::new();
    run(&cfg, &mut table, vec![row("A", "red", "5")], at(1));
    let delta = run(&cfg, &mut table, vec![row("A", "red", "5")], at(2));
    assert!(delta.is_empty());
  }

  #[test]
  fn change_closes_old_version_and_opens_new_at_t() {
    let cfg = config();
    let mut table = BTreeMap::new();
    run(&cfg, &mut table, vec![row("A", "red", "5")], at(1));
    let delta = run(&cfg, &mut table, vec![row("A", "blue", "5")], at(3));

    assert_eq!(delta.expired.len(), 1);
    assert_eq!(delta.inserted.len(), 1);
    let old = &delta.expired[0];
    let new = &delta.inserted[0];
    assert!(!old.is_current);
    assert_eq!(old.valid_to, Some(at(3)));
    assert!(new.is_current);
    assert_eq!(new.valid_from, at(3));
    assert_eq!(old.natural_key, new.natural_key);
    assert_ne!(old.surrogate_key, new.surrogate_key);
    assert!(history_violations(&history(&table)).is_empty());
  }

  #[test]
  fn new_key_in_later_run_still_opens_at_beginning_of_time() {
    let cfg = config();
    let mut table = BTreeMap::new();
    run(&cfg, &mut table, vec![row("A", "red", "5")], at(1));
    let delta = run(
      &cfg,
      &mut table,
      vec![row("A", "red", "5"), row("B", "green", "1")],
      at(9),
    );
    assert_eq!(delta.inserted.len(), 1);
    assert_eq!(delta.inserted[0].natural_key.as_str(), "B");
    assert_eq!(delta.inserted[0].valid_from, beginning_of_time());
  }

  #[test]
  fn processing_time_must_advance_past_the_closed_version() {
    let cfg = config();
    let mut table = BTreeMap::new();
    run(&cfg, &mut table, vec![row("A", "red", "5")], at(1));
    run(&cfg, &mut table, vec![row("A", "blue", "5")], at(5));

    let existing =
      CurrentVersions::from_records(cfg.table(), table.values().cloned()).unwrap();
    let rows = AttributeHasher::new(&cfg)
      .hash_all(vec![row("A", "green", "5")])
      .unwrap();
    let changes = ChangeDetector::new(&cfg).detect(rows, Some(&existing));
    let err = VersionManager::new(&cfg).plan(changes, at(5)).unwrap_err();
    assert!(matches!(err, Error::NonMonotonicProcessingTime { .. }));
  }

  #[test]
  fn merge_reports_updates_and_inserts() {
    let cfg = config();
    let mut table = BTreeMap::new();
    run(&cfg, &mut table, vec![row("A", "red", "5")], at(1));

    let existing =
      CurrentVersions::from_records(cfg.table(), table.values().cloned()).unwrap();
    let rows = AttributeHasher::new(&cfg)
      .hash_all(vec![row("A", "blue", "5")])
      .unwrap();
    let changes = ChangeDetector::new(&cfg).detect(rows, Some(&existing));
    let delta = VersionManager::new(&cfg).plan(changes, at(2)).unwrap();
    let outcome = delta.merge_into(&mut table);
    assert_eq!(outcome, MergeOutcome { updated: 1, inserted: 1 });
    assert_eq!(table.len(), 2);
  }

  #[test]
  fn reverting_to_an_earlier_attribute_set_keeps_every_interval() {
    let cfg = config();
    let mut table = BTreeMap::new();
    run(&cfg, &mut table, vec![row("A", "red", "5")], at(1));
    run(&cfg, &mut table, vec![row("A", "blue", "5")], at(2));
    run(&cfg, &mut table, vec![row("A", "green", "5")], at(3));
    let delta = run(&cfg, &mut table, vec![row("A", "blue", "5")], at(4));

    assert_eq!((delta.expired.len(), delta.inserted.len()), (1, 1));
    let mut history = history(&table);
    assert_eq!(history.len(), 4);
    assert!(history_violations(&history).is_empty());

    history.sort_by_key(|v| v.valid_from);
    let colors: Vec<&AttrValue> =
      history.iter().map(|v| &v.attributes["color"]).collect();
    assert_eq!(colors, [
      &AttrValue::from("red"),
      &AttrValue::from("blue"),
      &AttrValue::from("green"),
      &AttrValue::from("blue"),
    ]);
    assert_eq!(history[1].surrogate_key, history[3].surrogate_key);
    assert_eq!(history[1].valid_to, Some(at(3)));
    assert_eq!(history[3].valid_from, at(4));
  }

  #[test]
  fn repeated_surrogate_keys_insert_once() {
    let cfg = config();
    let hasher = AttributeHasher::new(&cfg);
    let first = hasher.hash(row("A", "red", "5")).unwrap();
    let twin = HashedRow {
      natural_key: "B".into(),
      ..first.clone()
    };

    let changes = ChangeSet {
      dimension:    cfg.table(),
      initial_load: true,
      new:          vec![first.clone(), twin],
      changed:      Vec::new(),
      unchanged:    Vec::new(),
      duplicates:   0,
    };
    let delta = VersionManager::new(&cfg).plan(changes, at(1)).unwrap();
    assert_eq!(delta.inserted.len(), 1);
    assert_eq!(delta.inserted[0].natural_key.as_str(), "A");
  }

  #[test]
  fn skipped_change_keeps_its_previous_version_current() {
    let cfg = config();
    let hasher = AttributeHasher::new(&cfg);
    let previous = |id: &str| DimensionRecord {
      natural_key:   id.into(),
      surrogate_key: hasher.hash(row(id, "red", "5")).unwrap().surrogate_key,
      attributes:    row(id, "red", "5"),
      is_current:    true,
      valid_from:    beginning_of_time(),
      valid_to:      None,
    };
    let incoming = hasher.hash(row("A", "blue", "5")).unwrap();
    let changes = ChangeSet {
      dimension:    cfg.table(),
      initial_load: false,
      new:          Vec::new(),
      changed:      vec![
        Change { previous: previous("A"), incoming: incoming.clone() },
        Change {
          previous: previous("B"),
          incoming: HashedRow { natural_key: "B".into(), ..incoming },
        },
      ],
      unchanged:    Vec::new(),
      duplicates:   0,
    };

    let delta = VersionManager::new(&cfg).plan(changes, at(2)).unwrap();
    assert_eq!(delta.expired.len(), 1);
    assert_eq!(delta.inserted.len(), 1);
    assert_eq!(delta.expired[0].natural_key, delta.inserted[0].natural_key);

    let mut table: BTreeMap<VersionKey, DimensionRecord> = [previous("A"), previous("B")]
      .into_iter()
      .map(|r| (r.version_key(), r))
      .collect();
    delta.merge_into(&mut table);
    assert!(history_violations(&history(&table)).is_empty());
  }

  #[test]
  fn violations_are_detected() {
    let base = DimensionRecord {
      natural_key:   "A".into(),
      surrogate_key: SurrogateKey(1),
      attributes:    Attributes::new(),
      is_current:    false,
      valid_from:    at(1),
      valid_to:      Some(at(3)),
    };
    let overlapping = DimensionRecord {
      surrogate_key: SurrogateKey(2),
      is_current: true,
      valid_from: at(2),
      valid_to: None,
      ..base.clone()
    };
    let v = history_violations(&[base.clone(), overlapping]);
    assert!(matches!(v[..], [HistoryViolation::Overlap { .. }]));

    let gapped = DimensionRecord {
      surrogate_key: SurrogateKey(2),
      is_current: true,
      valid_from: at(4),
      valid_to: None,
      ..base.clone()
    };
    let v = history_violations(&[base.clone(), gapped]);
    assert!(matches!(v[..], [HistoryViolation::Gap { .. }]));

    let v = history_violations(&[base]);
    assert!(matches!(v[..], [HistoryViolation::CurrentCount { count: 0, .. }]));
  }

  proptest! {
    #[test]
    fn histories_stay_consistent_across_runs(
      runs in proptest::collection::vec(
        proptest::collection::vec(
          (0usize..4, prop_oneof!["red", "blue", "green"]),
          0..6,
        ),
        1..6,
      )
    ) {
      let cfg = config();
      let mut table = BTreeMap::new();
      for (i, snapshot) in runs.into_iter().enumerate() {
        let rows = snapshot
          .into_iter()
          .map(|(id, color)| row(&format!("P{id}"), &color, "5"))
          .collect::<Vec<_>>();
        run(&cfg, &mut table, rows.clone(), at(i as u32 + 1));
        prop_assert!(history_violations(&history(&table)).is_empty());

        let later = at(i as u32 + 1) + chrono::Duration::hours(1);
        let again = run(&cfg, &mut table, rows, later);
        prop_assert!(again.is_empty());
      }
    }
  }
}
