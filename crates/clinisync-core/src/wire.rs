//! Tolerant decoding of list-shaped response bodies.
//!
//! Backends wrap collections inconsistently: a bare array, `{"items": [...]}`,
//! `{"timeline": [...]}` for history, `{"notifications": [...]}` for the inbox.
//! [`Listing`] accepts all of them.

use serde::{Deserialize, de::DeserializeOwned};

use crate::Result;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
  Bare(Vec<T>),
  Items { items: Vec<T> },
  Timeline { timeline: Vec<T> },
  Notifications { notifications: Vec<T> },
}

impl<T> Listing<T> {
  pub fn into_vec(self) -> Vec<T> {
    match self {
      Self::Bare(v)
      | Self::Items { items: v }
      | Self::Timeline { timeline: v }
      | Self::Notifications { notifications: v } => v,
    }
  }
}

/// Decode a response body into a `Vec<T>` regardless of its wrapper.
pub fn decode_list<T: DeserializeOwned>(body: serde_json::Value) -> Result<Vec<T>> {
  if body.is_null() {
    return Ok(Vec::new());
  }
  Ok(serde_json::from_value::<Listing<T>>(body)?.into_vec())
}

/// Decode a single object, unwrapping a `{"<field>": {...}}` envelope when
/// the body carries one.
pub fn decode_one<T: DeserializeOwned>(body: serde_json::Value, field: &str) -> Result<T> {
  match body.get(field) {
    Some(inner) if inner.is_object() => Ok(serde_json::from_value(inner.clone())?),
    _ => Ok(serde_json::from_value(body)?),
  }
}
