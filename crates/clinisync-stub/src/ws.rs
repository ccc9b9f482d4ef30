//! `/ws` push channel.
//!
//! Frames are JSON text messages `{"event": ..., "data": ...}` in both
//! directions. Each socket gets every server broadcast plus direct replies
//! to its own commands.

use std::sync::atomic::Ordering;

use axum::{
  extract::{
    State, WebSocketUpgrade,
    ws::{Message, WebSocket},
  },
  response::Response,
};
use clinisync_core::{
  Id,
  push::{PushFrame, events},
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Outbound, StubState, notifications::mark_one};

/// `GET /ws`
pub async fn upgrade(State(state): State<StubState>, ws: WebSocketUpgrade) -> Response {
  ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: StubState) {
  let connection_id = Uuid::new_v4();
  let mut outbound = state.inner.outbound.subscribe();
  state.inner.connections.fetch_add(1, Ordering::SeqCst);
  info!(%connection_id, "push client connected");

  let (mut sender, mut receiver) = socket.split();

  'conn: loop {
    tokio::select! {
      msg = receiver.next() => match msg {
        Some(Ok(Message::Text(text))) => {
          for reply in handle_frame(&state, text.as_str()) {
            if send(&mut sender, &reply).await.is_err() {
              break 'conn;
            }
          }
        }
        Some(Ok(Message::Close(_))) | None => break,
        Some(Ok(_)) => {}
        Some(Err(e)) => {
          warn!(%connection_id, error = %e, "push socket error");
          break;
        }
      },
      out = outbound.recv() => match out {
        Ok(Outbound::Frame(frame)) => {
          if send(&mut sender, &frame).await.is_err() {
            break;
          }
        }
        Ok(Outbound::Disconnect) => {
          let _ = sender.send(Message::Close(None)).await;
          break;
        }
        Err(RecvError::Lagged(skipped)) => {
          warn!(%connection_id, skipped, "push client lagging; frames dropped");
        }
        Err(RecvError::Closed) => break,
      },
    }
  }

  state.inner.connections.fetch_sub(1, Ordering::SeqCst);
  info!(%connection_id, "push client disconnected");
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, frame: &PushFrame) -> Result<(), axum::Error> {
  let text = serde_json::to_string(frame).unwrap_or_default();
  sender.send(Message::text(text)).await
}

/// Record a client command and compute the direct replies to it.
fn handle_frame(state: &StubState, text: &str) -> Vec<PushFrame> {
  let frame: PushFrame = match serde_json::from_str(text) {
    Ok(f) => f,
    Err(e) => {
      warn!(error = %e, "ignoring malformed push frame");
      return Vec::new();
    }
  };
  debug!(event = %frame.event, "push command");
  state.inner.received.lock().push(frame.clone());

  match frame.event.as_str() {
    events::GET_NOTIFICATION_COUNT => {
      let count = serde_json::to_value(state.count()).unwrap_or_default();
      vec![PushFrame::new(events::NOTIFICATION_COUNT_UPDATE, count)]
    }
    events::MARK_NOTIFICATION_READ => {
      let id = frame
        .data
        .get("notification_id")
        .and_then(|v| serde_json::from_value::<Id>(v.clone()).ok());
      match id.map(|id| mark_one(state, &id)) {
        Some(Ok(count)) => state.broadcast_count(count),
        Some(Err(e)) => warn!(error = %e, "push mark read failed"),
        None => warn!("mark read without notification_id"),
      }
      Vec::new()
    }
    _ => Vec::new(),
  }
}
