//! The notification inbox: unread counts, notification lists, read state.
//!
//! Reads go through two [`CacheStore`]s, one for the count and one for lists
//! keyed by their query. Updates arrive either from the push channel or from
//! periodic pulls, never both at once: the driver started by
//! [`NotificationSync::start`] polls while the push channel is down and
//! stops polling as soon as it is up.
//!
//! Marking read is optimistic. The local read flag and the count change
//! first, the command goes out on whichever channel is live, and a failure
//! puts both back before the error reaches the caller.

use std::{sync::Arc, time::Duration};

use clinisync_core::{
  Error, Id, Result,
  notification::{Notification, NotificationCount, Priority},
  push::events,
  transport::{ConnectionState, Request, Transport},
  wire::{decode_list, decode_one},
};
use parking_lot::Mutex;
use serde_json::json;
use strum::Display;
use tokio::{
  sync::watch,
  time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  cache::{CacheStore, Patched, QueryState},
  inbox::{self, MERGED_CAP, RECENT_CAP},
  scope::ViewScope,
};

const COUNT_KEY: &str = "notifications:count";
const LIST_PREFIX: &str = "notifications:list:";

// ─── Settings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SyncSettings {
  /// Pull interval while the push channel is down.
  pub poll_interval:     Duration,
  /// Sent with push-channel commands so the server can scope them.
  pub user_id:           Option<Id>,
  pub count_stale_after: Duration,
  pub list_stale_after:  Duration,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      poll_interval:     Duration::from_secs(30),
      user_id:           None,
      count_stale_after: Duration::from_secs(30),
      list_stale_after:  Duration::from_secs(30),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListOptions {
  pub unread_only: bool,
  pub limit:       usize,
}

impl Default for ListOptions {
  fn default() -> Self {
    Self {
      unread_only: false,
      limit:       20,
    }
  }
}

impl ListOptions {
  fn key(&self) -> String {
    format!("{LIST_PREFIX}{}:{}", self.unread_only, self.limit)
  }
}

/// Which channel currently keeps the inbox up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransportMode {
  #[default]
  Polling,
  Connected,
}

/// What an optimistic read overlay touched, for rollback.
struct ReadOverlay {
  /// The count patch and how much it took off each field.
  count: Option<(Patched<NotificationCount>, NotificationCount)>,
  ids:   Vec<Id>,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct NotificationSync<T> {
  transport: Arc<T>,
  settings:  SyncSettings,
  counts:    CacheStore<NotificationCount>,
  lists:     CacheStore<Vec<Notification>>,
  /// Push-delivered notifications, newest first.
  recent:    Mutex<Vec<Notification>>,
  /// List queries to refresh on every poll tick.
  watched:   Mutex<Vec<ListOptions>>,
  mode:      watch::Sender<TransportMode>,
}

impl<T: Transport> NotificationSync<T> {
  pub fn new(transport: Arc<T>, settings: SyncSettings) -> Arc<Self> {
    let (mode, _) = watch::channel(TransportMode::Polling);
    Arc::new(Self {
      transport,
      settings,
      counts: CacheStore::new("notification-count"),
      lists: CacheStore::new("notification-list"),
      recent: Mutex::new(Vec::new()),
      watched: Mutex::new(Vec::new()),
      mode,
    })
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  pub async fn get_count(&self) -> Result<NotificationCount> {
    let transport = self.transport.clone();
    self
      .counts
      .read_through(COUNT_KEY, self.settings.count_stale_after, move || async move {
        let body = transport.request(Request::get("/notifications/count")).await?;
        decode_one(body, "count")
      })
      .await
  }

  /// Pulled list merged with whatever the push channel delivered since.
  pub async fn list(&self, options: ListOptions) -> Result<Vec<Notification>> {
    self.watch_list(options);
    let transport = self.transport.clone();
    let request = Request::get("/notifications")
      .param("limit", options.limit)
      .param("unread_only", options.unread_only);
    let pulled = self
      .lists
      .read_through(&options.key(), self.settings.list_stale_after, move || async move {
        decode_list(transport.request(request).await?)
      })
      .await?;
    Ok(self.present(pulled, options))
  }

  /// The push-fed window of the latest notifications.
  pub fn recent(&self) -> Vec<Notification> { self.recent.lock().clone() }

  pub fn count_state(&self) -> QueryState<NotificationCount> { self.counts.query(COUNT_KEY) }

  pub fn list_state(&self, options: ListOptions) -> QueryState<Vec<Notification>> {
    let mut state = self.lists.query(&options.key());
    state.data = state.data.map(|pulled| self.present(pulled, options));
    state
  }

  pub fn mode(&self) -> TransportMode { *self.mode.borrow() }

  pub fn watch_mode(&self) -> watch::Receiver<TransportMode> { self.mode.subscribe() }

  fn present(&self, pulled: Vec<Notification>, options: ListOptions) -> Vec<Notification> {
    let merged = inbox::merge(pulled, &self.recent.lock(), MERGED_CAP);
    merged
      .into_iter()
      .filter(|n| !options.unread_only || !n.read)
      .take(options.limit)
      .collect()
  }

  fn watch_list(&self, options: ListOptions) {
    let mut watched = self.watched.lock();
    if !watched.contains(&options) {
      watched.push(options);
    }
  }

  /// The locally known copy of a notification, pushed copies first.
  fn find(&self, id: &Id) -> Option<Notification> {
    if let Some(n) = self.recent.lock().iter().find(|n| &n.id == id) {
      return Some(n.clone());
    }
    self
      .lists
      .keys(LIST_PREFIX)
      .into_iter()
      .filter_map(|key| self.lists.get(&key).value())
      .find_map(|list| list.into_iter().find(|n| &n.id == id))
  }

  // ── Mutations ─────────────────────────────────────────────────────────────

  /// Mark one notification read.
  ///
  /// Unknown or already-read notifications get no local change, but the
  /// command is still sent.
  pub async fn mark_read(&self, id: &Id) -> Result<()> {
    let overlay = match self.find(id) {
      Some(n) if !n.read => Some(self.apply_read(id, n.priority)),
      Some(_) => {
        debug!(%id, "already read; forwarding without local change");
        None
      }
      None => {
        debug!(%id, "not cached; forwarding without local change");
        None
      }
    };

    let result = self.send_mark_read(id).await;
    if let (Err(e), Some(overlay)) = (&result, overlay) {
      warn!(%id, error = %e, "mark read failed; rolling back");
      self.revert(overlay);
    }
    result
  }

  pub async fn mark_all_read(&self) -> Result<()> {
    let count = self.take_from_count(|c| *c = NotificationCount::default());
    let mut ids = Vec::new();
    for patched in self.lists.patch_matching(LIST_PREFIX, |_, list| {
      !inbox::set_all_read(list).is_empty()
    }) {
      ids.extend(patched.previous().iter().filter(|n| !n.read).map(|n| n.id.clone()));
    }
    ids.extend(inbox::set_all_read(&mut self.recent.lock()));
    ids.sort();
    ids.dedup();

    let result = self
      .transport
      .request(Request::post("/notifications/read-all"))
      .await
      .map(drop);
    if let Err(e) = &result {
      warn!(error = %e, reverted = ids.len(), "mark all read failed; rolling back");
      self.revert(ReadOverlay { count, ids });
    }
    result
  }

  fn apply_read(&self, id: &Id, priority: Priority) -> ReadOverlay {
    let count = self.take_from_count(|c| c.decrement(priority));
    self
      .lists
      .patch_matching(LIST_PREFIX, |_, list| inbox::set_read(list, id, true));
    inbox::set_read(&mut self.recent.lock(), id, true);
    ReadOverlay {
      count,
      ids: vec![id.clone()],
    }
  }

  /// Patch the cached count and record what the patch removed, so it can
  /// be added back without touching other in-flight adjustments.
  fn take_from_count(
    &self,
    f: impl FnOnce(&mut NotificationCount),
  ) -> Option<(Patched<NotificationCount>, NotificationCount)> {
    let mut removed = NotificationCount::default();
    let token = self.counts.patch(COUNT_KEY, |c| {
      let before = *c;
      f(c);
      removed = before.saturating_sub(*c);
    })?;
    Some((token, removed))
  }

  /// Undo a read overlay delta by delta, so overlapping marks and
  /// notifications pushed in the meantime survive the rollback. A count
  /// replaced by the server since is left alone.
  fn revert(&self, overlay: ReadOverlay) {
    if let Some((token, removed)) = overlay.count {
      self.counts.amend(&token, |c| *c += removed);
    }
    self.lists.patch_matching(LIST_PREFIX, |_, list| {
      overlay
        .ids
        .iter()
        .fold(false, |changed, id| inbox::set_read(list, id, false) | changed)
    });
    let mut recent = self.recent.lock();
    for id in &overlay.ids {
      inbox::set_read(&mut recent, id, false);
    }
  }

  async fn send_mark_read(&self, id: &Id) -> Result<()> {
    if self.transport.is_connected() {
      let payload = json!({ "notification_id": id, "user_id": self.settings.user_id });
      match self.transport.emit(events::MARK_NOTIFICATION_READ, payload) {
        Ok(()) => return Ok(()),
        Err(Error::ChannelUnavailable) => {
          debug!(%id, "push channel went away; marking read over http");
        }
        Err(e) => return Err(e),
      }
    }
    let request = Request::post("/notifications/read").json(&json!({ "notification_id": id }))?;
    self.transport.request(request).await.map(drop)
  }

  // ── Push handling ─────────────────────────────────────────────────────────

  fn on_count_update(&self, payload: &serde_json::Value) {
    match decode_one::<NotificationCount>(payload.clone(), "count") {
      Ok(count) => {
        debug!(total = count.total, "count pushed");
        self.counts.set(COUNT_KEY, count, self.settings.count_stale_after);
      }
      Err(e) => warn!(error = %e, "ignoring malformed count update"),
    }
  }

  fn on_new_notification(&self, payload: &serde_json::Value) {
    match decode_one::<Notification>(payload.clone(), "notification") {
      Ok(n) => self.apply_pushed(n),
      Err(e) => warn!(error = %e, "ignoring malformed notification"),
    }
  }

  fn apply_pushed(&self, n: Notification) {
    debug!(id = %n.id, priority = %n.priority, "notification pushed");
    let pushed = std::slice::from_ref(&n);
    {
      let mut recent = self.recent.lock();
      let current = std::mem::take(&mut *recent);
      *recent = inbox::merge(current, pushed, RECENT_CAP);
    }
    self.lists.patch_matching(LIST_PREFIX, |_, list| {
      *list = inbox::merge(std::mem::take(list), pushed, MERGED_CAP);
      true
    });
  }

  // ── Driver ────────────────────────────────────────────────────────────────

  /// Register push handlers and start the mode driver for the life of
  /// `scope`.
  pub fn start(self: &Arc<Self>, scope: &ViewScope) {
    let weak = Arc::downgrade(self);
    scope.hold(self.transport.subscribe(
      events::NOTIFICATION_COUNT_UPDATE,
      Arc::new(move |payload| {
        if let Some(sync) = weak.upgrade() {
          sync.on_count_update(payload);
        }
      }),
    ));
    let weak = Arc::downgrade(self);
    scope.hold(self.transport.subscribe(
      events::NEW_NOTIFICATION,
      Arc::new(move |payload| {
        if let Some(sync) = weak.upgrade() {
          sync.on_new_notification(payload);
        }
      }),
    ));

    if self.settings.user_id.is_some() {
      // The transport remembers subscriptions and replays them on every
      // reconnect, so a failure here only means "not connected yet".
      let _ = self
        .transport
        .emit(events::SUBSCRIBE_NOTIFICATIONS, self.user_payload());
    }

    tokio::spawn(self.clone().drive(scope.token()));
  }

  fn user_payload(&self) -> serde_json::Value {
    match &self.settings.user_id {
      Some(id) => json!({ "user_id": id }),
      None => serde_json::Value::Null,
    }
  }

  fn set_mode(&self, next: TransportMode) {
    let changed = self.mode.send_if_modified(|current| {
      if *current == next {
        false
      } else {
        *current = next;
        true
      }
    });
    if changed {
      info!(mode = %next, "notification sync mode changed");
    }
  }

  async fn drive(self: Arc<Self>, cancel: CancellationToken) {
    let mut state = self.transport.connection_state();
    loop {
      let connected = *state.borrow_and_update() == ConnectionState::Connected;
      let keep_going = if connected && self.resync() {
        self.set_mode(TransportMode::Connected);
        self.hold_connected(&mut state, &cancel).await
      } else {
        self.set_mode(TransportMode::Polling);
        self.poll_until_connected(&mut state, &cancel).await
      };
      if !keep_going {
        break;
      }
    }

    if self.settings.user_id.is_some() {
      let _ = self
        .transport
        .emit(events::UNSUBSCRIBE_NOTIFICATIONS, self.user_payload());
    }
    debug!("notification driver stopped");
  }

  /// Ask the server for a fresh count; the in-memory one may be stale after
  /// a disconnect gap.
  fn resync(&self) -> bool {
    match self
      .transport
      .emit(events::GET_NOTIFICATION_COUNT, self.user_payload())
    {
      Ok(()) => true,
      Err(e) => {
        warn!(error = %e, "count resync failed; staying on polling");
        false
      }
    }
  }

  /// Wait out the connected stretch. Returns `false` when the driver should
  /// stop.
  ///
  /// Any published change ends it, even one that reads `Connected` again:
  /// the receiver only sees the latest value, so that means a disconnect gap
  /// went by unobserved and the count needs the same resync.
  async fn hold_connected(
    &self,
    state: &mut watch::Receiver<ConnectionState>,
    cancel: &CancellationToken,
  ) -> bool {
    tokio::select! {
      _ = cancel.cancelled() => false,
      changed = state.changed() => changed.is_ok(),
    }
  }

  /// Returns `false` when the driver should stop.
  async fn poll_until_connected(
    &self,
    state: &mut watch::Receiver<ConnectionState>,
    cancel: &CancellationToken,
  ) -> bool {
    let mut ticker = time::interval(self.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        _ = cancel.cancelled() => return false,
        changed = state.changed() => {
          if changed.is_err() {
            return false;
          }
          if *state.borrow() == ConnectionState::Connected {
            return true;
          }
        }
        _ = ticker.tick() => self.poll().await,
      }
    }
  }

  async fn poll(&self) {
    debug!("polling notifications");
    self.counts.invalidate(COUNT_KEY);
    if let Err(e) = self.get_count().await {
      warn!(error = %e, "count poll failed");
    }

    let watched = self.watched.lock().clone();
    for options in watched {
      self.lists.invalidate(&options.key());
      if let Err(e) = self.list(options).await {
        warn!(error = %e, unread_only = options.unread_only, "list poll failed");
      }
    }
  }
}
