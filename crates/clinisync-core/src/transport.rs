//! The `Transport` trait and supporting request types.
//!
//! The trait is implemented by `clinisync-transport` (reqwest + WebSocket) and
//! by in-memory fakes in tests. Both engines depend on this abstraction, never
//! on a concrete channel, and observe connection state through the signal it
//! hands out rather than through any global.

use std::future::Future;

use serde::Serialize;
use strum::Display;
use tokio::sync::watch;

use crate::{
  Result,
  push::{Handler, Subscription},
};

// ─── Request ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

/// One request/response exchange on the HTTP channel.
///
/// `path` is relative to the configured API base, e.g. `/notifications/count`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub path:   String,
  pub query:  Vec<(String, String)>,
  pub body:   Option<serde_json::Value>,
}

impl Request {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self { Self::new(Method::Get, path) }

  pub fn post(path: impl Into<String>) -> Self { Self::new(Method::Post, path) }

  /// Append a query parameter.
  pub fn param(mut self, key: &str, value: impl ToString) -> Self {
    self.query.push((key.to_owned(), value.to_string()));
    self
  }

  /// Append a query parameter only when `value` is present.
  pub fn param_opt(self, key: &str, value: Option<impl ToString>) -> Self {
    match value {
      Some(v) => self.param(key, v),
      None => self,
    }
  }

  /// Attach a JSON body.
  pub fn json(mut self, body: &impl Serialize) -> Result<Self> {
    self.body = Some(serde_json::to_value(body)?);
    Ok(self)
  }

  /// `"GET /notifications/count"`. Used for logging and fake routing.
  pub fn route(&self) -> String { format!("{} {}", self.method, self.path) }
}

// ─── Connection state ────────────────────────────────────────────────────────

/// Lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
  Connecting,
  Connected,
  #[default]
  Disconnected,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the two delivery paths to the backend.
///
/// - `request` is a single exchange with no retry; retry policy belongs to
///   the caller.
/// - `subscribe` registers a push-event handler; dropping the returned
///   [`Subscription`] unregisters it.
/// - `emit` is fire-and-forget. While the channel is not connected it sends
///   nothing and returns [`crate::Error::ChannelUnavailable`].
pub trait Transport: Send + Sync + 'static {
  fn request(
    &self,
    request: Request,
  ) -> impl Future<Output = Result<serde_json::Value>> + Send + '_;

  fn subscribe(&self, event: &str, handler: Handler) -> Subscription;

  fn emit(&self, event: &str, payload: serde_json::Value) -> Result<()>;

  /// A receiver over the push channel's [`ConnectionState`]. Only actual
  /// transitions are published.
  fn connection_state(&self) -> watch::Receiver<ConnectionState>;

  fn is_connected(&self) -> bool {
    *self.connection_state().borrow() == ConnectionState::Connected
  }
}
