//! Row-count guard for join steps.

use tracing::error;

use crate::{Error, Result, schema::TableKind};

/// Asserts that a join step neither dropped nor duplicated fact rows.
#[derive(Debug, Clone, Copy)]
pub struct IntegrityGuard;

impl IntegrityGuard {
  /// Fail with [`Error::ReferentialIntegrity`] unless `before == after`.
  pub fn check(dimension: TableKind, before: usize, after: usize) -> Result<()> {
    if before == after {
      return Ok(());
    }
    error!(%dimension, before, after, "join changed fact row count");
    Err(Error::ReferentialIntegrity { dimension, before, after })
  }
}
