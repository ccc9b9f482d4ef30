//! Push-channel vocabulary: event names, the frame format, and a handler
//! registry shared by every [`Transport`](crate::transport::Transport)
//! implementation.

use std::{
  collections::HashMap,
  fmt,
  sync::{Arc, Weak},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Event names spoken on the push channel.
pub mod events {
  /// Server → client: replace the cached count.
  pub const NOTIFICATION_COUNT_UPDATE: &str = "notification_count_update";
  /// Server → client: merge one notification into the inbox.
  pub const NEW_NOTIFICATION: &str = "new_notification";

  /// Client → server: ask for a `notification_count_update`.
  pub const GET_NOTIFICATION_COUNT: &str = "get_notification_count";
  pub const MARK_NOTIFICATION_READ: &str = "mark_notification_read";
  pub const SUBSCRIBE_NOTIFICATIONS: &str = "subscribe_notifications";
  pub const UNSUBSCRIBE_NOTIFICATIONS: &str = "unsubscribe_notifications";

  pub const SUBSCRIBE_PREFIX: &str = "subscribe_";
  pub const UNSUBSCRIBE_PREFIX: &str = "unsubscribe_";
}

/// One text frame on the push channel: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
  pub event: String,
  #[serde(default)]
  pub data:  serde_json::Value,
}

impl PushFrame {
  pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
    Self {
      event: event.into(),
      data,
    }
  }
}

// ─── Handler registry ────────────────────────────────────────────────────────

pub type Handler = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;

#[derive(Default)]
struct Table {
  next_id:  u64,
  by_event: HashMap<String, Vec<(u64, Handler)>>,
}

/// Event name → handlers. Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct Handlers {
  table: Arc<Mutex<Table>>,
}

impl Handlers {
  pub fn new() -> Self { Self::default() }

  pub fn subscribe(&self, event: &str, handler: Handler) -> Subscription {
    let mut table = self.table.lock();
    table.next_id += 1;
    let id = table.next_id;
    table
      .by_event
      .entry(event.to_owned())
      .or_default()
      .push((id, handler));
    Subscription {
      table: Arc::downgrade(&self.table),
      event: event.to_owned(),
      id,
    }
  }

  /// Invoke every handler registered for `event`. Returns how many ran.
  ///
  /// Handlers are called after the table lock is released, so a handler may
  /// subscribe or dispose without deadlocking.
  pub fn dispatch(&self, event: &str, payload: &serde_json::Value) -> usize {
    let handlers: Vec<Handler> = self
      .table
      .lock()
      .by_event
      .get(event)
      .map(|hs| hs.iter().map(|(_, h)| h.clone()).collect())
      .unwrap_or_default();
    for handler in &handlers {
      handler(payload);
    }
    handlers.len()
  }

  pub fn count(&self, event: &str) -> usize {
    self.table.lock().by_event.get(event).map_or(0, Vec::len)
  }
}

/// Disposer for a registered handler. Unregisters on drop.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
  table: Weak<Mutex<Table>>,
  event: String,
  id:    u64,
}

impl Subscription {
  pub fn event(&self) -> &str { &self.event }

  /// Unregister now. Equivalent to dropping.
  pub fn dispose(self) {}
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("event", &self.event)
      .field("id", &self.id)
      .finish()
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    let Some(table) = self.table.upgrade() else { return };
    let mut table = table.lock();
    if let Some(hs) = table.by_event.get_mut(&self.event) {
      hs.retain(|(id, _)| *id != self.id);
      if hs.is_empty() {
        table.by_event.remove(&self.event);
      }
    }
  }
}
