//! Opaque server-assigned identifiers.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// An identifier owned by the backend.
///
/// The client never interprets it. Backends disagree on whether ids are
/// strings or integers on the wire, so both are accepted and normalised to a
/// string; it always serialises back as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Id {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(&self.0)
  }
}

impl From<&str> for Id {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

impl From<String> for Id {
  fn from(s: String) -> Self { Self(s) }
}

impl<'de> Deserialize<'de> for Id {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
      Text(String),
      Signed(i64),
      Unsigned(u64),
    }

    Ok(match RawId::deserialize(d)? {
      RawId::Text(s) => Self(s),
      RawId::Signed(n) => Self(n.to_string()),
      RawId::Unsigned(n) => Self(n.to_string()),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_numeric_and_string_ids() {
    let ids: Vec<Id> = serde_json::from_str(r#"["a1", 42]"#).unwrap();
    assert_eq!(ids, vec![Id::from("a1"), Id::from("42")]);
    assert_eq!(serde_json::to_string(&ids[1]).unwrap(), r#""42""#);
  }
}
