//! Point-in-time join of facts against a dimension history.
//!
//! A fact matches a version when the natural keys agree and
//! `valid_from <= event_time < valid_to` (an open `valid_to` matches
//! everything after `valid_from`). A fact dated exactly at a version's
//! `valid_to` therefore belongs to the next version.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
  Result,
  guard::IntegrityGuard,
  record::{DimensionRecord, EnrichedFact, FactRecord, NaturalKey, SurrogateKey},
  schema::TableKind,
};

/// The part of a version the join needs. Validity columns stay here and never
/// reach the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
  surrogate_key: SurrogateKey,
  valid_from:    DateTime<Utc>,
  valid_to:      Option<DateTime<Utc>>,
}

impl Span {
  fn covers(&self, at: DateTime<Utc>) -> bool {
    self.valid_from <= at && self.valid_to.is_none_or(|to| at < to)
  }
}

/// Resolves natural keys of one dimension to the version valid at a time.
#[derive(Debug, Clone)]
pub struct PointInTimeJoiner {
  dimension: TableKind,
  spans:     HashMap<NaturalKey, Vec<Span>>,
}

impl PointInTimeJoiner {
  /// Index the full history (current and closed versions) of `dimension`.
  pub fn new(
    dimension: TableKind,
    history: impl IntoIterator<Item = DimensionRecord>,
  ) -> Self {
    let mut spans: HashMap<NaturalKey, Vec<Span>> = HashMap::new();
    for r in history {
      spans.entry(r.natural_key).or_default().push(Span {
        surrogate_key: r.surrogate_key,
        valid_from:    r.valid_from,
        valid_to:      r.valid_to,
      });
    }
    for versions in spans.values_mut() {
      versions.sort_by_key(|s| s.valid_from);
    }
    Self { dimension, spans }
  }

  /// Surrogate keys of every version of `key` valid at `at`. A consistent
  /// history yields at most one.
  pub fn resolve(
    &self,
    key: &NaturalKey,
    at: DateTime<Utc>,
  ) -> impl Iterator<Item = SurrogateKey> + '_ {
    self
      .spans
      .get(key)
      .into_iter()
      .flatten()
      .filter(move |s| s.covers(at))
      .map(|s| s.surrogate_key)
  }

  /// Inner join with relational semantics: a fact without a covering version
  /// disappears, a fact with several appears once per version. Use
  /// [`Self::join_checked`] unless the raw result is what you want.
  pub fn join(&self, facts: Vec<EnrichedFact>) -> Vec<EnrichedFact> {
    let mut out = Vec::with_capacity(facts.len());
    for fact in facts {
      let Some(key) = fact.fact.references.get(&self.dimension) else {
        debug!(dimension = %self.dimension, "fact has no reference to this dimension");
        continue;
      };
      let matches: Vec<SurrogateKey> =
        self.resolve(key, fact.fact.event_time).collect();
      if matches.len() != 1 {
        debug!(
          dimension = %self.dimension,
          natural_key = %key,
          event_time = %fact.fact.event_time,
          matches = matches.len(),
          "fact does not resolve to exactly one version"
        );
      }
      for sk in matches {
        let mut enriched = fact.clone();
        enriched.surrogate_keys.insert(self.dimension, sk);
        out.push(enriched);
      }
    }
    out
  }

  /// [`Self::join`] followed by an [`IntegrityGuard`] row-count check.
  pub fn join_checked(&self, facts: Vec<EnrichedFact>) -> Result<Vec<EnrichedFact>> {
    let before = facts.len();
    let joined = self.join(facts);
    IntegrityGuard::check(self.dimension, before, joined.len())?;
    Ok(joined)
  }
}

/// Join `facts` against each dimension in turn, guarding every step.
pub fn join_all(
  facts: Vec<FactRecord>,
  joiners: &[PointInTimeJoiner],
) -> Result<Vec<EnrichedFact>> {
  let mut rows: Vec<EnrichedFact> = facts.into_iter().map(EnrichedFact::from).collect();
  for joiner in joiners {
    rows = joiner.join_checked(rows)?;
  }
  Ok(rows)
}
