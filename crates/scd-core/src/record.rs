//! Row types: attribute values, dimension versions and fact records.
//!
//! A [`DimensionRecord`] is one version of a natural key. Versions are never
//! deleted by this crate; superseded versions are closed by setting
//! `valid_to` and clearing `is_current`.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, schema::TableKind};

// ─── Values ──────────────────────────────────────────────────────────────────

/// A single attribute value of heterogeneous type.
///
/// Deserialisation is untagged: JSON `null`, booleans, integers and floats
/// map directly; strings are tried as a calendar date, then an RFC 3339
/// timestamp, and otherwise kept as text. A date-like string therefore
/// always comes back as [`AttrValue::Date`] or [`AttrValue::Timestamp`],
/// from input and from the store alike, and text columns accept both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Date(NaiveDate),
  Timestamp(DateTime<Utc>),
  Text(String),
}

impl AttrValue {
  /// The canonical string form used for fingerprints and natural keys.
  /// `None` for [`AttrValue::Null`].
  pub fn canonical(&self) -> Option<String> {
    match self {
      Self::Null => None,
      Self::Bool(b) => Some(b.to_string()),
      Self::Int(i) => Some(i.to_string()),
      // Debug keeps the fractional part, so 1 and 1.0 stay distinct.
      Self::Float(f) => Some(format!("{f:?}")),
      Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
      Self::Timestamp(ts) => {
        Some(ts.to_rfc3339_opts(SecondsFormat::Micros, true))
      }
      Self::Text(s) => Some(s.clone()),
    }
  }
}

impl From<&str> for AttrValue {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for AttrValue {
  fn from(s: String) -> Self { Self::Text(s) }
}

impl From<i64> for AttrValue {
  fn from(i: i64) -> Self { Self::Int(i) }
}

impl From<f64> for AttrValue {
  fn from(f: f64) -> Self { Self::Float(f) }
}

impl From<bool> for AttrValue {
  fn from(b: bool) -> Self { Self::Bool(b) }
}

impl<T: Into<AttrValue>> From<Option<T>> for AttrValue {
  fn from(v: Option<T>) -> Self { v.map_or(Self::Null, Into::into) }
}

/// A row: attribute name → value. A name absent from the map is absent from
/// the row's schema, which is not the same thing as a null value.
pub type Attributes = BTreeMap<String, AttrValue>;

// ─── Keys ────────────────────────────────────────────────────────────────────

/// Stable business identifier of a dimension entity (e.g. a product code).
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NaturalKey(pub String);

impl NaturalKey {
  /// Extract the natural key from `column` of `row`.
  pub fn from_row(column: &str, row: &Attributes) -> Result<Self> {
    let value = row.get(column).ok_or_else(|| Error::MissingAttribute {
      attribute: column.to_owned(),
    })?;
    value.canonical().map(Self).ok_or_else(|| Error::NullNaturalKey {
      column: column.to_owned(),
    })
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for NaturalKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for NaturalKey {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

/// Fingerprint of a version's tracked attributes.
///
/// Stored signed so that engines without unsigned 64-bit columns can hold it;
/// the bit pattern is that of the unsigned hash.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SurrogateKey(pub i64);

impl fmt::Display for SurrogateKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

// ─── Time ────────────────────────────────────────────────────────────────────

/// Seconds from the Unix epoch back to 1900-01-01T00:00:00Z.
const BEGINNING_OF_TIME_SECS: i64 = -2_208_988_800;

/// `valid_from` for versions of natural keys seen for the first time.
pub fn beginning_of_time() -> DateTime<Utc> {
  DateTime::from_timestamp(BEGINNING_OF_TIME_SECS, 0).unwrap_or_default()
}

// ─── Dimension versions ──────────────────────────────────────────────────────

/// One version of a dimension entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionRecord {
  pub natural_key:   NaturalKey,
  pub surrogate_key: SurrogateKey,
  /// Tracked and untracked attributes as they were when the version opened.
  pub attributes:    Attributes,
  pub is_current:    bool,
  /// Inclusive.
  pub valid_from:    DateTime<Utc>,
  /// Exclusive; `None` while the version is current.
  pub valid_to:      Option<DateTime<Utc>>,
}

/// Identity of a version row. An entity that reverts to an earlier attribute
/// set reopens that set's fingerprint, so the fingerprint alone is not unique
/// across history; together with `valid_from` it is.
pub type VersionKey = (SurrogateKey, DateTime<Utc>);

impl DimensionRecord {
  pub fn version_key(&self) -> VersionKey { (self.surrogate_key, self.valid_from) }

  /// Whether `at` falls inside `[valid_from, valid_to)`.
  pub fn covers(&self, at: DateTime<Utc>) -> bool {
    self.valid_from <= at && self.valid_to.is_none_or(|to| at < to)
  }

  /// Return a closed copy of this version ending at `at`.
  pub fn closed_at(&self, at: DateTime<Utc>) -> Self {
    Self {
      is_current: false,
      valid_to: Some(at),
      ..self.clone()
    }
  }
}

/// The current version of every natural key of one dimension.
#[derive(Debug, Clone, Default)]
pub struct CurrentVersions {
  by_key: BTreeMap<NaturalKey, DimensionRecord>,
}

impl CurrentVersions {
  /// Collect current versions, ignoring closed ones.
  ///
  /// Two current versions for one natural key is a broken history and is
  /// reported rather than silently resolved.
  pub fn from_records(
    dimension: TableKind,
    records: impl IntoIterator<Item = DimensionRecord>,
  ) -> Result<Self> {
    let mut by_key = BTreeMap::new();
    for record in records.into_iter().filter(|r| r.is_current) {
      let key = record.natural_key.clone();
      if by_key.insert(key.clone(), record).is_some() {
        return Err(Error::DuplicateCurrentVersion {
          dimension,
          natural_key: key,
        });
      }
    }
    Ok(Self { by_key })
  }

  pub fn get(&self, key: &NaturalKey) -> Option<&DimensionRecord> {
    self.by_key.get(key)
  }

  pub fn len(&self) -> usize { self.by_key.len() }

  pub fn is_empty(&self) -> bool { self.by_key.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = &DimensionRecord> {
    self.by_key.values()
  }
}

// ─── Facts ───────────────────────────────────────────────────────────────────

/// A transactional row referencing one or more dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRecord {
  pub event_time: DateTime<Utc>,
  /// Dimension → natural key referenced by this fact.
  pub references: BTreeMap<TableKind, NaturalKey>,
  #[serde(default)]
  pub measures:   BTreeMap<String, f64>,
  #[serde(default)]
  pub attributes: Attributes,
}

/// A fact with the surrogate key of each joined dimension version attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedFact {
  pub fact:           FactRecord,
  pub surrogate_keys: BTreeMap<TableKind, SurrogateKey>,
}

impl From<FactRecord> for EnrichedFact {
  fn from(fact: FactRecord) -> Self {
    Self {
      fact,
      surrogate_keys: BTreeMap::new(),
    }
  }
}
