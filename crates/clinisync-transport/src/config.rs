//! Client configuration, deserialised from TOML / environment by the caller.

use std::{collections::BTreeMap, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::{Error, Result};

/// Runtime configuration for [`ClientTransport`](crate::ClientTransport) and
/// the engines built on it.
///
/// Only `base_url` is required.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
  /// API root; request paths are appended to it, e.g.
  /// `https://crm.example.com/api`.
  pub base_url:             String,
  /// Push endpoint. Derived from `base_url` (`http` → `ws`, path `/ws`) when
  /// absent.
  #[serde(default)]
  pub ws_url:               Option<String>,
  #[serde(default = "default_request_timeout_ms")]
  pub request_timeout_ms:   u64,
  #[serde(default = "default_poll_interval_secs")]
  pub poll_interval_secs:   u64,
  #[serde(default = "default_reconnect_initial_ms")]
  pub reconnect_initial_ms: u64,
  #[serde(default = "default_reconnect_max_ms")]
  pub reconnect_max_ms:     u64,
  /// Session/tenant context handed over by the authentication layer.
  /// Forwarded verbatim on every request and on the push handshake.
  #[serde(default)]
  pub identity_headers:     BTreeMap<String, String>,
  #[serde(default)]
  pub user_id:              Option<String>,
  #[serde(default)]
  pub tenant_id:            Option<String>,
}

fn default_request_timeout_ms() -> u64 { 15_000 }
fn default_poll_interval_secs() -> u64 { 30 }
fn default_reconnect_initial_ms() -> u64 { 500 }
fn default_reconnect_max_ms() -> u64 { 10_000 }

impl ClientConfig {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self {
      base_url:             base_url.into(),
      ws_url:               None,
      request_timeout_ms:   default_request_timeout_ms(),
      poll_interval_secs:   default_poll_interval_secs(),
      reconnect_initial_ms: default_reconnect_initial_ms(),
      reconnect_max_ms:     default_reconnect_max_ms(),
      identity_headers:     BTreeMap::new(),
      user_id:              None,
      tenant_id:            None,
    }
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_secs.max(1))
  }

  pub fn reconnect_initial(&self) -> Duration {
    Duration::from_millis(self.reconnect_initial_ms.max(1))
  }

  pub fn reconnect_max(&self) -> Duration {
    Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms))
  }

  /// The parsed API root.
  pub fn api_url(&self) -> Result<Url> { parse(&self.base_url) }

  /// The push endpoint, explicit or derived from `base_url`.
  pub fn push_url(&self) -> Result<Url> {
    if let Some(ws) = &self.ws_url {
      return parse(ws);
    }
    let mut url = self.api_url()?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url
      .set_scheme(scheme)
      .map_err(|()| Error::UnsupportedScheme(url.scheme().to_owned()))?;
    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url)
  }
}

fn parse(raw: &str) -> Result<Url> {
  Url::parse(raw).map_err(|source| Error::InvalidUrl {
    url: raw.to_owned(),
    source,
  })
}
