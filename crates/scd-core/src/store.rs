//! The `DimensionStore` trait: the persistence collaborator.
//!
//! The core reads current versions and full histories through this trait and
//! hands it one delta per run. Implementations must merge a delta atomically,
//! keyed on surrogate key: update rows whose key exists, insert the rest,
//! delete nothing. Retrying transient failures is the implementation's job.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
  record::{CurrentVersions, DimensionRecord},
  schema::TableKind,
  version::Delta,
};

/// Row counts of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
  pub updated:  usize,
  pub inserted: usize,
}

/// Abstraction over a dimension version store.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait DimensionStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Current version of every natural key of `table`, or `None` if the
  /// dimension has never been written.
  fn current_versions(
    &self,
    table: TableKind,
  ) -> impl Future<Output = Result<Option<CurrentVersions>, Self::Error>> + Send + '_;

  /// Every version of `table`, current and closed, ordered by natural key
  /// then `valid_from`.
  fn history(
    &self,
    table: TableKind,
  ) -> impl Future<Output = Result<Vec<DimensionRecord>, Self::Error>> + Send + '_;

  /// Merge `delta` in one transaction. Either every row lands or none does.
  fn apply_delta<'a>(
    &'a self,
    delta: &'a Delta,
  ) -> impl Future<Output = Result<MergeOutcome, Self::Error>> + Send + 'a;
}
