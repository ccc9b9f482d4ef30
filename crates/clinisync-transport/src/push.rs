//! WebSocket push channel with automatic reconnection.
//!
//! The connection loop runs as one background task. It owns the socket;
//! everything else talks to it through an outbox channel that only exists
//! while connected. After every (re)connect the sticky subscription set is
//! replayed before the state flips to `Connected`, so observers never see a
//! connected channel that is missing its server-side subscriptions.

use std::{sync::Arc, time::Duration};

use clinisync_core::{
  Error as CoreError,
  push::{Handler, Handlers, PushFrame, Subscription, events},
  transport::ConnectionState,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
  connect_async,
  tungstenite::{Message, client::IntoClientRequest},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{ClientConfig, Result, http::identity_headers};

// ─── Channel ─────────────────────────────────────────────────────────────────

pub struct PushChannel {
  handlers: Handlers,
  state:    watch::Sender<ConnectionState>,
  outbox:   Mutex<Option<mpsc::UnboundedSender<String>>>,
  /// `subscribe_*` commands not yet cancelled by a matching `unsubscribe_*`.
  sticky:   Mutex<Vec<PushFrame>>,
  cancel:   CancellationToken,
}

/// Where and how to connect, resolved once from [`ClientConfig`].
struct Dial {
  url:      Url,
  identity: HeaderMap,
  initial:  Duration,
  max:      Duration,
}

impl PushChannel {
  /// A channel that never connects. Its state stays `Disconnected`, so
  /// callers fall back to HTTP.
  pub fn disabled() -> Arc<Self> { Arc::new(Self::idle()) }

  fn idle() -> Self {
    let (state, _) = watch::channel(ConnectionState::Disconnected);
    Self {
      handlers: Handlers::new(),
      state,
      outbox: Mutex::new(None),
      sticky: Mutex::new(Vec::new()),
      cancel: CancellationToken::new(),
    }
  }

  /// Start the connection loop on the current tokio runtime.
  pub fn spawn(config: &ClientConfig) -> Result<Arc<Self>> {
    let dial = Dial {
      url:      config.push_url()?,
      identity: identity_headers(config)?,
      initial:  config.reconnect_initial(),
      max:      config.reconnect_max(),
    };
    let channel = Arc::new(Self::idle());
    tokio::spawn(channel.clone().run(dial));
    Ok(channel)
  }

  pub fn subscribe(&self, event: &str, handler: Handler) -> Subscription {
    self.handlers.subscribe(event, handler)
  }

  pub fn state(&self) -> watch::Receiver<ConnectionState> { self.state.subscribe() }

  /// Queue one frame for sending.
  ///
  /// Subscription commands are remembered even when the channel is down, so
  /// they go out as soon as it comes back.
  pub fn emit(&self, event: &str, data: serde_json::Value) -> clinisync_core::Result<()> {
    let frame = PushFrame::new(event, data);
    self.track_sticky(&frame);

    let outbox = self.outbox.lock();
    let Some(tx) = outbox.as_ref() else {
      return Err(CoreError::ChannelUnavailable);
    };
    let text = serde_json::to_string(&frame)?;
    tx.send(text).map_err(|_| CoreError::ChannelUnavailable)
  }

  /// Stop the connection loop and close the socket.
  pub fn shutdown(&self) { self.cancel.cancel(); }

  fn track_sticky(&self, frame: &PushFrame) {
    let mut sticky = self.sticky.lock();
    if frame.event.starts_with(events::SUBSCRIBE_PREFIX) {
      if !sticky.contains(frame) {
        sticky.push(frame.clone());
      }
    } else if let Some(topic) = frame.event.strip_prefix(events::UNSUBSCRIBE_PREFIX) {
      let subscribe = format!("{}{topic}", events::SUBSCRIBE_PREFIX);
      sticky.retain(|f| !(f.event == subscribe && f.data == frame.data));
    }
  }

  fn set_state(&self, next: ConnectionState) {
    let changed = self.state.send_if_modified(|current| {
      if *current == next {
        false
      } else {
        *current = next;
        true
      }
    });
    if changed {
      info!(state = %next, "push channel state changed");
    }
  }

  // ── Connection loop ───────────────────────────────────────────────────────

  async fn run(self: Arc<Self>, dial: Dial) {
    let mut backoff = dial.initial;
    while !self.cancel.is_cancelled() {
      self.set_state(ConnectionState::Connecting);
      let mut request = match dial.url.as_str().into_client_request() {
        Ok(r) => r,
        Err(e) => {
          warn!(url = %dial.url, error = %e, "push url rejected; giving up");
          break;
        }
      };
      request.headers_mut().extend(dial.identity.clone());

      let connected = tokio::select! {
        _ = self.cancel.cancelled() => break,
        result = connect_async(request) => result,
      };

      match connected {
        Ok((socket, _)) => {
          backoff = dial.initial;
          self.serve(socket).await;
        }
        Err(e) => {
          warn!(url = %dial.url, error = %e, retry_in = ?backoff, "push connect failed");
        }
      }
      self.set_state(ConnectionState::Disconnected);

      tokio::select! {
        _ = self.cancel.cancelled() => break,
        _ = tokio::time::sleep(backoff) => {}
      }
      backoff = (backoff * 2).min(dial.max);
    }
    *self.outbox.lock() = None;
    self.set_state(ConnectionState::Disconnected);
  }

  /// Pump one live socket until it closes, errors, or we are cancelled.
  async fn serve<S>(&self, socket: tokio_tungstenite::WebSocketStream<S>)
  where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
  {
    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    {
      let sticky = self.sticky.lock();
      for frame in sticky.iter() {
        if let Ok(text) = serde_json::to_string(frame) {
          let _ = tx.send(text);
        }
      }
      debug!(replayed = sticky.len(), "push subscriptions queued");
    }
    *self.outbox.lock() = Some(tx);
    self.set_state(ConnectionState::Connected);

    loop {
      tokio::select! {
        _ = self.cancel.cancelled() => {
          let _ = write.send(Message::Close(None)).await;
          break;
        }
        Some(text) = rx.recv() => {
          if let Err(e) = write.send(Message::text(text)).await {
            warn!(error = %e, "push send failed");
            break;
          }
        }
        msg = read.next() => match msg {
          Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
          Some(Ok(Message::Close(_))) | None => {
            info!("push channel closed by server");
            break;
          }
          Some(Ok(_)) => {}
          Some(Err(e)) => {
            warn!(error = %e, "push read failed");
            break;
          }
        },
      }
    }
    *self.outbox.lock() = None;
  }

  fn dispatch(&self, text: &str) {
    match serde_json::from_str::<PushFrame>(text) {
      Ok(frame) => {
        let handled = self.handlers.dispatch(&frame.event, &frame.data);
        debug!(event = %frame.event, handled, "push frame");
      }
      Err(e) => warn!(error = %e, "ignoring malformed push frame"),
    }
  }
}
