//! [`ClientTransport`]: both channels behind the core `Transport` trait.

use std::{future::Future, sync::Arc};

use clinisync_core::{
  push::{Handler, Subscription},
  transport::{ConnectionState, Request, Transport},
};
use tokio::sync::watch;

use crate::{ClientConfig, HttpChannel, PushChannel, Result};

/// The production transport: reqwest for request/response, a reconnecting
/// WebSocket for push.
///
/// Dropping it stops the push connection loop.
pub struct ClientTransport {
  http: HttpChannel,
  push: Arc<PushChannel>,
}

impl ClientTransport {
  /// Build both channels and start connecting the push channel.
  ///
  /// Must be called from within a tokio runtime.
  pub fn connect(config: &ClientConfig) -> Result<Self> {
    Ok(Self {
      http: HttpChannel::new(config)?,
      push: PushChannel::spawn(config)?,
    })
  }

  /// HTTP only. The push channel stays `Disconnected`, so engines run in
  /// polling mode.
  pub fn http_only(config: &ClientConfig) -> Result<Self> {
    Ok(Self {
      http: HttpChannel::new(config)?,
      push: PushChannel::disabled(),
    })
  }

  pub fn http(&self) -> &HttpChannel { &self.http }

  pub fn shutdown(&self) { self.push.shutdown(); }
}

impl Drop for ClientTransport {
  fn drop(&mut self) { self.push.shutdown(); }
}

impl Transport for ClientTransport {
  fn request(
    &self,
    request: Request,
  ) -> impl Future<Output = clinisync_core::Result<serde_json::Value>> + Send + '_ {
    self.http.send(request)
  }

  fn subscribe(&self, event: &str, handler: Handler) -> Subscription {
    self.push.subscribe(event, handler)
  }

  fn emit(&self, event: &str, payload: serde_json::Value) -> clinisync_core::Result<()> {
    self.push.emit(event, payload)
  }

  fn connection_state(&self) -> watch::Receiver<ConnectionState> { self.push.state() }
}
