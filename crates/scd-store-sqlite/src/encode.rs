//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`),
//! so that text order is time order. Attributes are stored as compact JSON.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use scd_core::{
  record::{Attributes, DimensionRecord, NaturalKey, SurrogateKey},
  schema::TableKind,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── TableKind ───────────────────────────────────────────────────────────────

pub fn encode_table(t: TableKind) -> &'static str { t.into() }

pub fn decode_table(s: &str) -> Result<TableKind> {
  TableKind::from_str(s).map_err(|_| Error::UnknownTable(s.to_owned()))
}

// ─── Attributes ──────────────────────────────────────────────────────────────

pub fn encode_attributes(a: &Attributes) -> Result<String> {
  Ok(serde_json::to_string(a)?)
}

pub fn decode_attributes(s: &str) -> Result<Attributes> {
  Ok(serde_json::from_str(s)?)
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// A version row encoded for binding, owned so it can cross into the
/// connection thread.
pub struct EncodedVersion {
  pub surrogate_key: i64,
  pub natural_key:   String,
  pub attributes:    String,
  pub is_current:    bool,
  pub valid_from:    String,
  pub valid_to:      Option<String>,
}

pub fn encode_version(r: &DimensionRecord) -> Result<EncodedVersion> {
  Ok(EncodedVersion {
    surrogate_key: r.surrogate_key.0,
    natural_key:   r.natural_key.0.clone(),
    attributes:    encode_attributes(&r.attributes)?,
    is_current:    r.is_current,
    valid_from:    encode_dt(r.valid_from),
    valid_to:      r.valid_to.map(encode_dt),
  })
}

/// Column values exactly as read from `dimension_versions`.
pub struct RawVersion {
  pub surrogate_key: i64,
  pub natural_key:   String,
  pub attributes:    String,
  pub is_current:    bool,
  pub valid_from:    String,
  pub valid_to:      Option<String>,
}

impl RawVersion {
  pub const COLUMNS: &'static str =
    "surrogate_key, natural_key, attributes, is_current, valid_from, valid_to";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      surrogate_key: row.get(0)?,
      natural_key:   row.get(1)?,
      attributes:    row.get(2)?,
      is_current:    row.get(3)?,
      valid_from:    row.get(4)?,
      valid_to:      row.get(5)?,
    })
  }

  pub fn into_record(self) -> Result<DimensionRecord> {
    Ok(DimensionRecord {
      natural_key:   NaturalKey(self.natural_key),
      surrogate_key: SurrogateKey(self.surrogate_key),
      attributes:    decode_attributes(&self.attributes)?,
      is_current:    self.is_current,
      valid_from:    decode_dt(&self.valid_from)?,
      valid_to:      self.valid_to.as_deref().map(decode_dt).transpose()?,
    })
  }
}
