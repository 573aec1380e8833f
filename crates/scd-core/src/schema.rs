//! The table catalogue and the schema-conformance check.
//!
//! Every table this crate knows about is a [`TableKind`] variant mapped to a
//! static column list. Column membership is answered from that list, never by
//! matching table names at runtime.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
  Error, Result,
  record::{AttrValue, Attributes},
};

// ─── Column types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ColumnType {
  Text,
  Int,
  Float,
  Bool,
  Date,
  Timestamp,
}

impl ColumnType {
  /// The type of a non-null value.
  pub fn of(value: &AttrValue) -> Option<Self> {
    match value {
      AttrValue::Null => None,
      AttrValue::Bool(_) => Some(Self::Bool),
      AttrValue::Int(_) => Some(Self::Int),
      AttrValue::Float(_) => Some(Self::Float),
      AttrValue::Date(_) => Some(Self::Date),
      AttrValue::Timestamp(_) => Some(Self::Timestamp),
      AttrValue::Text(_) => Some(Self::Text),
    }
  }

  /// Whether a value of type `actual` may be stored in a column of this type.
  /// Integers widen to floats, and text columns take dates and timestamps:
  /// those only ever arrive as strings that happened to parse.
  pub fn accepts(self, actual: Self) -> bool {
    self == actual
      || matches!(
        (self, actual),
        (Self::Float, Self::Int) | (Self::Text, Self::Date | Self::Timestamp)
      )
  }
}

/// One column of a table's data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
  pub name:     &'static str,
  pub ty:       ColumnType,
  /// Required columns must be present and non-null in every row.
  pub required: bool,
}

const fn required(name: &'static str, ty: ColumnType) -> ColumnDef {
  ColumnDef { name, ty, required: true }
}

const fn nullable(name: &'static str, ty: ColumnType) -> ColumnDef {
  ColumnDef { name, ty, required: false }
}

const PROD_DIM: &[ColumnDef] = &[
  required("prod_id", ColumnType::Text),
  nullable("data_provider_code", ColumnType::Text),
  nullable("created_at_utc_datetime", ColumnType::Timestamp),
  nullable("created_at_date", ColumnType::Date),
  nullable("data_source", ColumnType::Text),
];

const SITE_DIM: &[ColumnDef] = &[
  required("site_id", ColumnType::Text),
  nullable("data_provider_code", ColumnType::Text),
  nullable("created_at_utc_datetime", ColumnType::Timestamp),
  nullable("created_at_date", ColumnType::Date),
  nullable("data_source", ColumnType::Text),
];

const STORE_FACT: &[ColumnDef] = &[
  required("time_period_end_date", ColumnType::Date),
  required("prod_id", ColumnType::Text),
  required("site_id", ColumnType::Text),
  nullable("data_provider_code", ColumnType::Text),
  nullable("created_at_utc_datetime", ColumnType::Timestamp),
  nullable("created_at_date", ColumnType::Date),
  nullable("data_source", ColumnType::Text),
];

// ─── Tables ──────────────────────────────────────────────────────────────────

/// Every table with a known data model.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  EnumIter,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TableKind {
  ProdDim,
  SiteDim,
  StoreFact,
}

impl TableKind {
  pub fn columns(self) -> &'static [ColumnDef] {
    match self {
      Self::ProdDim => PROD_DIM,
      Self::SiteDim => SITE_DIM,
      Self::StoreFact => STORE_FACT,
    }
  }

  pub fn is_dimension(self) -> bool {
    matches!(self, Self::ProdDim | Self::SiteDim)
  }

  pub fn column(self, name: &str) -> Option<&'static ColumnDef> {
    self.columns().iter().find(|c| c.name == name)
  }

  /// Whether `column` belongs to this table's data model.
  pub fn in_data_model(self, column: &str) -> bool {
    self.column(column).is_some()
  }
}

// ─── Conformance check ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMismatch {
  pub column:   String,
  pub expected: ColumnType,
  pub actual:   ColumnType,
}

/// Outcome of [`check_schema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaReport {
  pub passed:          bool,
  /// Required columns absent (or null) in at least one row, sorted.
  pub missing_columns: Vec<String>,
  /// First offending value per column, sorted by column.
  pub type_mismatches: Vec<TypeMismatch>,
}

impl SchemaReport {
  /// Turn a failed report into a blocking [`Error::SchemaMismatch`].
  pub fn into_result(self, table: TableKind) -> Result<()> {
    if self.passed {
      return Ok(());
    }
    Err(Error::SchemaMismatch {
      table,
      missing: self.missing_columns,
      mismatched: self
        .type_mismatches
        .into_iter()
        .map(|m| format!("{} (expected {}, got {})", m.column, m.expected, m.actual))
        .collect(),
    })
  }
}

/// Check rows against `table`'s data model.
///
/// Columns outside the data model are provider extras and are not checked.
pub fn check_schema<'a>(
  table: TableKind,
  rows: impl IntoIterator<Item = &'a Attributes>,
) -> SchemaReport {
  let mut missing = BTreeSet::new();
  let mut mismatches: Vec<TypeMismatch> = Vec::new();

  for row in rows {
    for col in table.columns() {
      let Some(value) = row.get(col.name) else {
        if col.required {
          missing.insert(col.name.to_owned());
        }
        continue;
      };
      let Some(actual) = ColumnType::of(value) else {
        if col.required {
          missing.insert(col.name.to_owned());
        }
        continue;
      };
      if !col.ty.accepts(actual)
        && !mismatches.iter().any(|m| m.column == col.name)
      {
        mismatches.push(TypeMismatch {
          column: col.name.to_owned(),
          expected: col.ty,
          actual,
        });
      }
    }
  }

  mismatches.sort_by(|a, b| a.column.cmp(&b.column));
  SchemaReport {
    passed:          missing.is_empty() && mismatches.is_empty(),
    missing_columns: missing.into_iter().collect(),
    type_mismatches: mismatches,
  }
}

#[cfg(test)]
mod tests {
  use std::str::FromStr;

  use chrono::NaiveDate;
  use strum::IntoEnumIterator;

  use super::*;

  fn prod_row() -> Attributes {
    let mut row = Attributes::new();
    row.insert("prod_id".into(), "1002".into());
    row.insert("data_provider_code".into(), "cds_1002".into());
    row.insert("source_brand".into(), AttrValue::Int(7));
    row
  }

  #[test]
  fn table_kind_string_forms() {
    assert_eq!(TableKind::ProdDim.to_string(), "prod_dim");
    assert_eq!(TableKind::from_str("store_fact").unwrap(), TableKind::StoreFact);
    assert!(TableKind::from_str("customer_dim").is_err());
    assert_eq!(TableKind::iter().filter(|t| t.is_dimension()).count(), 2);
  }

  #[test]
  fn data_model_membership_is_per_table() {
    assert!(TableKind::ProdDim.in_data_model("prod_id"));
    assert!(!TableKind::SiteDim.in_data_model("prod_id"));
    assert!(TableKind::StoreFact.in_data_model("site_id"));
    assert!(!TableKind::StoreFact.in_data_model("source_brand"));
  }

  #[test]
  fn conforming_rows_pass_and_extras_are_ignored() {
    let rows = vec![prod_row(), prod_row()];
    let report = check_schema(TableKind::ProdDim, &rows);
    assert!(report.passed);
    assert!(report.into_result(TableKind::ProdDim).is_ok());
  }

  #[test]
  fn missing_and_null_required_columns_are_reported() {
    let mut a = prod_row();
    a.remove("data_provider_code");
    let mut b = prod_row();
    b.insert("prod_id".into(), AttrValue::Null);

    assert!(check_schema(TableKind::ProdDim, [&a]).passed);
    let report = check_schema(TableKind::ProdDim, &[a, b]);
    assert!(!report.passed);
    assert_eq!(report.missing_columns, vec!["prod_id"]);

    let fact: Attributes = [("prod_id".to_string(), "1002".into())].into();
    let report = check_schema(TableKind::StoreFact, [&fact]);
    assert_eq!(report.missing_columns, vec!["site_id", "time_period_end_date"]);
  }

  #[test]
  fn date_like_text_passes_text_columns() {
    let mut row = prod_row();
    let parsed: AttrValue = serde_json::from_str(r#""2024-05-01""#).unwrap();
    assert!(matches!(parsed, AttrValue::Date(_)));
    row.insert("data_source".into(), parsed);
    assert!(check_schema(TableKind::ProdDim, [&row]).passed);
  }

  #[test]
  fn type_mismatch_blocks() {
    let mut row = prod_row();
    row.insert(
      "created_at_utc_datetime".into(),
      AttrValue::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
    );
    let report = check_schema(TableKind::ProdDim, [&row]);
    assert_eq!(report.type_mismatches.len(), 1);
    assert_eq!(report.type_mismatches[0].expected, ColumnType::Timestamp);
    assert_eq!(report.type_mismatches[0].actual, ColumnType::Date);

    let err = report.into_result(TableKind::ProdDim).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { table: TableKind::ProdDim, .. }));
  }

  #[test]
  fn only_ints_and_parsed_strings_widen() {
    assert!(ColumnType::Float.accepts(ColumnType::Int));
    assert!(!ColumnType::Int.accepts(ColumnType::Float));
    assert!(!ColumnType::Text.accepts(ColumnType::Int));
    assert!(ColumnType::Text.accepts(ColumnType::Timestamp));
    assert!(!ColumnType::Date.accepts(ColumnType::Text));
  }
}
