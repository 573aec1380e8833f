//! Immutable per-dimension configuration.
//!
//! Built once, validated on construction and passed by reference into the
//! hasher, the change detector and the version manager.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Error, Result, schema::TableKind};

/// How a dimension's versions are identified and fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionConfig {
  table:              TableKind,
  natural_key:        String,
  tracked_attributes: Vec<String>,
}

/// Unvalidated form, as read from a configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct DimensionSettings {
  pub table:              TableKind,
  pub natural_key:        String,
  pub tracked_attributes: Vec<String>,
}

impl DimensionConfig {
  /// Validate and build a configuration.
  ///
  /// The natural-key column must itself be tracked: surrogate keys are the
  /// merge key of the version table, so two entities with identical tracked
  /// attributes must still fingerprint differently.
  pub fn new(
    table: TableKind,
    natural_key: impl Into<String>,
    tracked_attributes: Vec<String>,
  ) -> Result<Self> {
    let natural_key = natural_key.into();

    if !table.is_dimension() {
      return Err(Error::InvalidConfig(format!("{table} is not a dimension table")));
    }
    if tracked_attributes.is_empty() {
      return Err(Error::InvalidConfig(format!(
        "{table} declares no tracked attributes"
      )));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = tracked_attributes.iter().find(|a| !seen.insert(a.as_str())) {
      return Err(Error::InvalidConfig(format!(
        "{table} tracks {dup:?} more than once"
      )));
    }
    if !table.in_data_model(&natural_key) {
      return Err(Error::InvalidConfig(format!(
        "{natural_key:?} is not a column of {table}"
      )));
    }
    if !tracked_attributes.contains(&natural_key) {
      return Err(Error::InvalidConfig(format!(
        "{table} must track its natural key column {natural_key:?}"
      )));
    }

    Ok(Self { table, natural_key, tracked_attributes })
  }

  pub fn table(&self) -> TableKind { self.table }

  pub fn natural_key(&self) -> &str { &self.natural_key }

  /// Declared order; this order, not the row's, drives fingerprinting.
  pub fn tracked_attributes(&self) -> &[String] { &self.tracked_attributes }
}

impl TryFrom<DimensionSettings> for DimensionConfig {
  type Error = Error;

  fn try_from(s: DimensionSettings) -> Result<Self> {
    Self::new(s.table, s.natural_key, s.tracked_attributes)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tracked(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn valid_config_builds() {
    let cfg =
      DimensionConfig::new(TableKind::ProdDim, "prod_id", tracked(&["prod_id", "color"]))
        .unwrap();
    assert_eq!(cfg.table(), TableKind::ProdDim);
    assert_eq!(cfg.tracked_attributes(), ["prod_id", "color"]);
  }

  #[test]
  fn rejects_fact_tables_and_bad_attribute_lists() {
    for (table, attrs) in [
      (TableKind::StoreFact, tracked(&["prod_id"])),
      (TableKind::ProdDim, tracked(&[])),
      (TableKind::ProdDim, tracked(&["prod_id", "color", "color"])),
      (TableKind::ProdDim, tracked(&["color"])),
    ] {
      let err = DimensionConfig::new(table, "prod_id", attrs).unwrap_err();
      assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
    }
  }

  #[test]
  fn natural_key_must_belong_to_the_table() {
    let err =
      DimensionConfig::new(TableKind::ProdDim, "site_id", tracked(&["site_id"]))
        .unwrap_err();
    assert!(err.to_string().contains("not a column of prod_dim"), "{err}");
  }

  #[test]
  fn settings_deserialize_and_validate() {
    let settings: DimensionSettings = serde_json::from_str(
      r#"{"table": "site_dim", "natural_key": "site_id",
          "tracked_attributes": ["site_id", "source_city"]}"#,
    )
    .unwrap();
    let cfg = DimensionConfig::try_from(settings).unwrap();
    assert_eq!(cfg.natural_key(), "site_id");
  }
}
