//! In-process stand-in for the CRM backend.
//!
//! Serves the notification and lead-workflow HTTP surface plus the `/ws`
//! push channel from in-memory state. It answers the contract and little
//! else; there is no persistence and no auth. Tests drive it through
//! [`StubState`]: seed data, queue failures, push events, drop sockets.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let state = StubState::seeded();
//! let addr = clinisync_stub::serve_local(state.clone()).await?;
//! ```

pub mod error;
pub mod leads;
pub mod notifications;
pub mod seed;
pub mod ws;

mod faults;
#[cfg(test)]
mod tests;

use std::{
  collections::{HashMap, VecDeque},
  net::SocketAddr,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use axum::{
  Router,
  http::HeaderMap,
  middleware,
  routing::{get, post},
};
use clinisync_core::{
  lead::{Lead, LeadStatus, LeadStatusHistoryItem},
  notification::{Notification, NotificationCount, Priority},
  push::{PushFrame, events},
};
use parking_lot::Mutex;
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

// ─── State ───────────────────────────────────────────────────────────────────

/// Backend data. Everything the handlers read or write.
#[derive(Debug, Default)]
pub struct Backend {
  pub notifications: Vec<Notification>,
  pub statuses:      Vec<LeadStatus>,
  pub leads:         Vec<Lead>,
  pub history:       Vec<LeadStatusHistoryItem>,
}

impl Backend {
  pub fn unread_count(&self) -> NotificationCount {
    let mut count = NotificationCount::default();
    for n in self.notifications.iter().filter(|n| !n.read) {
      count.total += 1;
      match n.priority {
        Priority::Critical => count.critical += 1,
        Priority::High => count.high += 1,
        Priority::Medium => count.medium += 1,
        Priority::Low => count.low += 1,
        Priority::Unknown => {}
      }
    }
    count
  }
}

/// What the server sends down every open socket.
#[derive(Debug, Clone)]
pub enum Outbound {
  Frame(PushFrame),
  Disconnect,
}

struct Inner {
  backend:      Mutex<Backend>,
  faults:       Mutex<HashMap<String, VecDeque<u16>>>,
  hits:         Mutex<HashMap<String, usize>>,
  last_headers: Mutex<Option<HeaderMap>>,
  delay:        Mutex<Option<Duration>>,
  outbound:     broadcast::Sender<Outbound>,
  received:     Mutex<Vec<PushFrame>>,
  connections:  AtomicUsize,
}

/// Shared handle to the stub. Cheap to clone.
#[derive(Clone)]
pub struct StubState {
  inner: Arc<Inner>,
}

impl Default for StubState {
  fn default() -> Self { Self::new(Backend::default()) }
}

impl StubState {
  pub fn new(backend: Backend) -> Self {
    let (outbound, _) = broadcast::channel(64);
    Self {
      inner: Arc::new(Inner {
        backend: Mutex::new(backend),
        faults: Mutex::new(HashMap::new()),
        hits: Mutex::new(HashMap::new()),
        last_headers: Mutex::new(None),
        delay: Mutex::new(None),
        outbound,
        received: Mutex::new(Vec::new()),
        connections: AtomicUsize::new(0),
      }),
    }
  }

  /// A stub pre-loaded with demo data for tenant `demo`.
  pub fn seeded() -> Self { Self::new(seed::demo()) }

  /// Run `f` against the backend data.
  pub fn with_backend<R>(&self, f: impl FnOnce(&mut Backend) -> R) -> R {
    f(&mut self.inner.backend.lock())
  }

  pub fn count(&self) -> NotificationCount { self.with_backend(|b| b.unread_count()) }

  pub fn lead(&self, id: &str) -> Option<Lead> {
    self.with_backend(|b| b.leads.iter().find(|l| l.id.as_str() == id).cloned())
  }

  // ── Fault injection ───────────────────────────────────────────────────────

  /// Answer the next request on `route` (`"POST /notifications/read"`) with
  /// `status` instead of handling it.
  pub fn fail_next(&self, route: &str, status: u16) {
    self
      .inner
      .faults
      .lock()
      .entry(route.to_owned())
      .or_default()
      .push_back(status);
  }

  /// Delay every HTTP response by `delay`.
  pub fn set_delay(&self, delay: Option<Duration>) { *self.inner.delay.lock() = delay; }

  /// How many requests reached `route`, including injected failures.
  pub fn hits(&self, route: &str) -> usize {
    self.inner.hits.lock().get(route).copied().unwrap_or(0)
  }

  /// A header from the most recent HTTP request.
  pub fn last_header(&self, name: &str) -> Option<String> {
    self
      .inner
      .last_headers
      .lock()
      .as_ref()?
      .get(name)?
      .to_str()
      .ok()
      .map(str::to_owned)
  }

  // ── Push ──────────────────────────────────────────────────────────────────

  /// Send a frame to every open socket. Returns how many received it.
  pub fn broadcast(&self, frame: PushFrame) -> usize {
    self.inner.outbound.send(Outbound::Frame(frame)).unwrap_or(0)
  }

  /// Store a new notification and announce it plus the new count.
  pub fn push_notification(&self, notification: Notification) {
    let payload = serde_json::to_value(&notification).unwrap_or_default();
    let count = self.with_backend(|b| {
      b.notifications.retain(|n| n.id != notification.id);
      b.notifications.push(notification);
      b.unread_count()
    });
    self.broadcast(PushFrame::new(events::NEW_NOTIFICATION, payload));
    self.broadcast_count(count);
  }

  pub(crate) fn broadcast_count(&self, count: NotificationCount) {
    let payload = serde_json::to_value(count).unwrap_or_default();
    self.broadcast(PushFrame::new(events::NOTIFICATION_COUNT_UPDATE, payload));
  }

  /// Close every open socket from the server side.
  pub fn disconnect_all(&self) { let _ = self.inner.outbound.send(Outbound::Disconnect); }

  /// Frames clients sent with `event`, oldest first.
  pub fn received(&self, event: &str) -> Vec<serde_json::Value> {
    self
      .inner
      .received
      .lock()
      .iter()
      .filter(|f| f.event == event)
      .map(|f| f.data.clone())
      .collect()
  }

  /// Currently open sockets.
  pub fn connections(&self) -> usize { self.inner.connections.load(Ordering::SeqCst) }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the stub router over `state`.
pub fn router(state: StubState) -> Router<()> {
  Router::new()
    // Notifications
    .route("/notifications", get(notifications::list))
    .route("/notifications/count", get(notifications::count))
    .route("/notifications/read", post(notifications::mark_read))
    .route("/notifications/read-all", post(notifications::mark_all_read))
    // Lead workflow
    .route("/crm/lead-statuses", get(leads::statuses))
    .route("/crm/leads", get(leads::list))
    .route("/crm/leads/bulk-status", post(leads::bulk_change_status))
    .route("/crm/leads/{id}", get(leads::get_one))
    .route("/crm/leads/{id}/available-transitions", get(leads::transitions))
    .route("/crm/leads/{id}/status", post(leads::change_status))
    .route("/crm/leads/{id}/status-history", get(leads::history))
    .route_layer(middleware::from_fn_with_state(state.clone(), faults::intercept))
    // Push channel; not subject to HTTP fault injection.
    .route("/ws", get(ws::upgrade))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Bind `127.0.0.1` on an ephemeral port and serve `state` in the
/// background.
pub async fn serve_local(state: StubState) -> std::io::Result<SocketAddr> {
  let listener = TcpListener::bind("127.0.0.1:0").await?;
  let addr = listener.local_addr()?;
  let app = router(state);
  tokio::spawn(async move {
    if let Err(e) = axum::serve(listener, app).await {
      tracing::error!(error = %e, "stub server stopped");
    }
  });
  Ok(addr)
}
