//! Attribute fingerprinting.
//!
//! Tracked attributes are canonicalised to strings in the configured order,
//! joined with a separator, and hashed with XXH3-64. The unsigned digest is
//! reinterpreted as `i64` without changing its bits.

use xxhash_rust::xxh3::xxh3_64;

use crate::{
  Error, Result,
  config::DimensionConfig,
  record::{Attributes, NaturalKey, SurrogateKey},
};

const SEPARATOR: char = '|';
const ESCAPE: char = '\\';
/// Stands in for null. A bare `\N` cannot come out of [`escape_into`], so a
/// null never collides with any text, including the empty string.
const NULL_SENTINEL: &str = "\\N";

/// Append `value` to `buf` with the escape and separator characters escaped.
fn escape_into(buf: &mut String, value: &str) {
  for ch in value.chars() {
    if ch == SEPARATOR || ch == ESCAPE {
      buf.push(ESCAPE);
    }
    buf.push(ch);
  }
}

/// The string that is hashed for `row` over `tracked`.
pub fn canonical_form(row: &Attributes, tracked: &[String]) -> Result<String> {
  let mut buf = String::new();
  for (i, name) in tracked.iter().enumerate() {
    if i > 0 {
      buf.push(SEPARATOR);
    }
    let value = row.get(name).ok_or_else(|| Error::MissingAttribute {
      attribute: name.clone(),
    })?;
    match value.canonical() {
      Some(s) => escape_into(&mut buf, &s),
      None => buf.push_str(NULL_SENTINEL),
    }
  }
  Ok(buf)
}

/// Fingerprint the `tracked` attributes of `row`.
pub fn fingerprint(row: &Attributes, tracked: &[String]) -> Result<SurrogateKey> {
  let canonical = canonical_form(row, tracked)?;
  Ok(SurrogateKey(xxh3_64(canonical.as_bytes()) as i64))
}

/// An incoming row with its natural key and fingerprint resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct HashedRow {
  pub natural_key:   NaturalKey,
  pub surrogate_key: SurrogateKey,
  pub attributes:    Attributes,
}

/// Fingerprints rows of one dimension.
#[derive(Debug, Clone, Copy)]
pub struct AttributeHasher<'a> {
  config: &'a DimensionConfig,
}

impl<'a> AttributeHasher<'a> {
  pub fn new(config: &'a DimensionConfig) -> Self { Self { config } }

  pub fn hash(&self, attributes: Attributes) -> Result<HashedRow> {
    let surrogate_key =
      fingerprint(&attributes, self.config.tracked_attributes())?;
    let natural_key =
      NaturalKey::from_row(self.config.natural_key(), &attributes)?;
    Ok(HashedRow { natural_key, surrogate_key, attributes })
  }

  /// Hash a whole snapshot. The first invalid row aborts the batch.
  pub fn hash_all(
    &self,
    rows: impl IntoIterator<Item = Attributes>,
  ) -> Result<Vec<HashedRow>> {
    rows.into_iter().map(|row| self.hash(row)).collect()
  }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;
  use crate::record::AttrValue;

  fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
  }

  fn row(pairs: &[(&str, AttrValue)]) -> Attributes {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.clone()))
      .collect()
  }

  #[test]
  fn null_differs_from_empty_string() {
    let tracked = names(&["a"]);
    let null = fingerprint(&row(&[("a", AttrValue::Null)]), &tracked).unwrap();
    let empty = fingerprint(&row(&[("a", "".into())]), &tracked).unwrap();
    let literal = fingerprint(&row(&[("a", "\\N".into())]), &tracked).unwrap();
    assert_ne!(null, empty);
    assert_ne!(null, literal);
  }

  #[test]
  fn separator_in_values_cannot_shift_boundaries() {
    let tracked = names(&["a", "b"]);
    let left = row(&[("a", "x|".into()), ("b", "y".into())]);
    let right = row(&[("a", "x".into()), ("b", "|y".into())]);
    assert_eq!(canonical_form(&left, &tracked).unwrap(), "x\\||y");
    assert_ne!(
      fingerprint(&left, &tracked).unwrap(),
      fingerprint(&right, &tracked).unwrap()
    );
  }

  #[test]
  fn declared_order_controls_the_fingerprint() {
    let r = row(&[("a", "1".into()), ("b", "2".into())]);
    assert_ne!(
      fingerprint(&r, &names(&["a", "b"])).unwrap(),
      fingerprint(&r, &names(&["b", "a"])).unwrap()
    );
  }

  #[test]
  fn missing_tracked_attribute_is_a_validation_error() {
    let err = fingerprint(&row(&[("a", "1".into())]), &names(&["a", "b"]))
      .unwrap_err();
    assert!(matches!(err, Error::MissingAttribute { ref attribute } if attribute == "b"));
    assert!(err.is_validation());
  }

  #[test]
  fn signed_value_keeps_the_unsigned_bits() {
    let tracked = names(&["a"]);
    let r = row(&[("a", "red".into())]);
    let key = fingerprint(&r, &tracked).unwrap();
    assert_eq!(key.0 as u64, xxh3_64(b"red"));
  }

  proptest! {
    #[test]
    fn untracked_attributes_never_affect_the_fingerprint(
      color in ".*",
      size in any::<i64>(),
      noise in ".*",
      other in proptest::option::of(any::<f64>()),
    ) {
      let tracked = names(&["color", "size"]);
      let a = row(&[("color", color.clone().into()), ("size", size.into())]);
      let b = row(&[
        ("color", color.into()),
        ("size", size.into()),
        ("note", noise.into()),
        ("weight", other.into()),
      ]);
      prop_assert_eq!(
        fingerprint(&a, &tracked).unwrap(),
        fingerprint(&b, &tracked).unwrap()
      );
    }

    #[test]
    fn fingerprint_is_repeatable(
      values in proptest::collection::vec(proptest::option::of(".*"), 1..6),
    ) {
      let tracked: Vec<String> = (0..values.len()).map(|i| format!("c{i}")).collect();
      let r: Attributes = tracked
        .iter()
        .cloned()
        .zip(values.into_iter().map(AttrValue::from))
        .collect();
      prop_assert_eq!(
        fingerprint(&r, &tracked).unwrap(),
        fingerprint(&r.clone(), &tracked).unwrap()
      );
    }
  }
}
