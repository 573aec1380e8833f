//! Row statistics logged after each run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
  record::{DimensionRecord, EnrichedFact},
  schema::TableKind,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputStats {
  pub rows:       usize,
  /// Distinct natural keys (dimensions only).
  pub unique_ids: Option<usize>,
  /// Distinct event dates (facts only).
  pub dates:      Option<usize>,
}

impl OutputStats {
  pub fn for_versions(records: &[DimensionRecord]) -> Self {
    let ids: BTreeSet<_> = records.iter().map(|r| &r.natural_key).collect();
    Self {
      rows:       records.len(),
      unique_ids: Some(ids.len()),
      dates:      None,
    }
  }

  pub fn for_facts(facts: &[EnrichedFact]) -> Self {
    let dates: BTreeSet<_> =
      facts.iter().map(|f| f.fact.event_time.date_naive()).collect();
    Self {
      rows:       facts.len(),
      unique_ids: None,
      dates:      Some(dates.len()),
    }
  }

  pub fn log(&self, table: TableKind) {
    info!(
      %table,
      rows = self.rows,
      unique_ids = self.unique_ids,
      dates = self.dates,
      "output statistics"
    );
  }
}
