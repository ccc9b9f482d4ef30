//! Handlers for `/notifications` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/notifications` | `?limit` (default 20), `?unread_only`; newest first |
//! | `GET`  | `/notifications/count` | Unread counts by priority |
//! | `POST` | `/notifications/read` | Body: `{"notification_id": ...}` |
//! | `POST` | `/notifications/read-all` | Marks everything read |
//!
//! Every change to read state is followed by a `notification_count_update`
//! on the push channel.

use axum::{
  Json,
  extract::{Query, State},
};
use clinisync_core::{
  Id,
  notification::{Notification, NotificationCount},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{ApiError, StubState};

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  #[serde(default = "default_limit")]
  pub limit:       usize,
  #[serde(default)]
  pub unread_only: bool,
}

fn default_limit() -> usize { 20 }

/// `GET /notifications?limit=<n>&unread_only=<bool>`
pub async fn list(State(state): State<StubState>, Query(params): Query<ListParams>) -> Json<Value> {
  let mut notifications: Vec<Notification> = state.with_backend(|b| {
    b.notifications
      .iter()
      .filter(|n| !params.unread_only || !n.read)
      .cloned()
      .collect()
  });
  notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
  notifications.truncate(params.limit);
  Json(json!({ "notifications": notifications }))
}

/// `GET /notifications/count`
pub async fn count(State(state): State<StubState>) -> Json<NotificationCount> {
  Json(state.count())
}

// ─── Mark read ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MarkReadBody {
  pub notification_id: Id,
}

/// `POST /notifications/read`
pub async fn mark_read(
  State(state): State<StubState>,
  Json(body): Json<MarkReadBody>,
) -> Result<Json<Value>, ApiError> {
  let count = mark_one(&state, &body.notification_id)?;
  state.broadcast_count(count);
  Ok(Json(json!({ "success": true })))
}

/// `POST /notifications/read-all`
pub async fn mark_all_read(State(state): State<StubState>) -> Json<Value> {
  let updated = state.with_backend(|b| {
    let mut updated = 0;
    for n in b.notifications.iter_mut().filter(|n| !n.read) {
      n.read = true;
      updated += 1;
    }
    updated
  });
  state.broadcast_count(NotificationCount::default());
  Json(json!({ "updated": updated }))
}

/// Shared by the HTTP route and the push command. Returns the new count.
pub(crate) fn mark_one(state: &StubState, id: &Id) -> Result<NotificationCount, ApiError> {
  state.with_backend(|b| {
    let n = b
      .notifications
      .iter_mut()
      .find(|n| &n.id == id)
      .ok_or_else(|| ApiError::NotFound(format!("notification {id} not found")))?;
    n.read = true;
    Ok(b.unread_count())
  })
}
