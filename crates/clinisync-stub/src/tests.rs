//! Router tests against the seeded demo backend.

use axum::{
  Router,
  body::{Body, to_bytes},
  http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt as _;

use crate::{StubState, router};

fn app() -> (StubState, Router) {
  let state = StubState::seeded();
  (state.clone(), router(state))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let mut req = Request::builder().method(method).uri(uri);
  let body = match body {
    Some(json) => {
      req = req.header("content-type", "application/json");
      Body::from(json.to_string())
    }
    None => Body::empty(),
  };
  let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
  let status = resp.status();
  let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  let json = if bytes.is_empty() {
    Value::Null
  } else {
    serde_json::from_slice(&bytes).unwrap()
  };
  (status, json)
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[tokio::test]
async fn count_reflects_unread_by_priority() {
  let (_, app) = app();
  let (status, body) = call(&app, "GET", "/notifications/count", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "total": 3, "critical": 1, "high": 1, "medium": 1, "low": 0 }));
}

#[tokio::test]
async fn list_is_newest_first_and_filters_unread() {
  let (_, app) = app();
  let (_, body) = call(&app, "GET", "/notifications?limit=2", None).await;
  let ids: Vec<_> = body["notifications"]
    .as_array()
    .unwrap()
    .iter()
    .map(|n| n["id"].as_str().unwrap().to_owned())
    .collect();
  assert_eq!(ids, ["n-1", "n-2"]);

  let (_, body) = call(&app, "GET", "/notifications?unread_only=true&limit=50", None).await;
  assert_eq!(body["notifications"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn mark_read_updates_count() {
  let (state, app) = app();
  let (status, _) = call(
    &app,
    "POST",
    "/notifications/read",
    Some(json!({ "notification_id": "n-1" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(state.count().critical, 0);

  let (status, body) = call(
    &app,
    "POST",
    "/notifications/read",
    Some(json!({ "notification_id": "missing" })),
  )
  .await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert_eq!(body["detail"], "notification missing not found");

  call(&app, "POST", "/notifications/read-all", None).await;
  assert!(state.count().is_zero());
}

// ─── Lead workflow ───────────────────────────────────────────────────────────

#[tokio::test]
async fn statuses_hide_inactive_by_default() {
  let (_, app) = app();
  let (_, active) = call(&app, "GET", "/crm/lead-statuses", None).await;
  let (_, all) = call(&app, "GET", "/crm/lead-statuses?include_inactive=true", None).await;
  assert_eq!(active.as_array().unwrap().len(), 5);
  assert_eq!(all.as_array().unwrap().len(), 6);
  assert_eq!(active[0]["code"], "new");
}

#[tokio::test]
async fn final_status_has_no_transitions() {
  let (_, app) = app();
  let (_, open) = call(&app, "GET", "/crm/leads/101/available-transitions", None).await;
  assert!(!open.as_array().unwrap().is_empty());
  assert!(open.as_array().unwrap().iter().all(|t| t["to_status_code"] != "new"));

  let (status, closed) = call(&app, "GET", "/crm/leads/105/available-transitions", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(closed, json!([]));
}

#[tokio::test]
async fn change_status_records_history() {
  let (state, app) = app();
  let (status, body) = call(
    &app,
    "POST",
    "/crm/leads/101/status",
    Some(json!({ "status": "contacted", "comment": "called back" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["lead"]["status"], "contacted");
  assert_eq!(state.lead("101").unwrap().status, "contacted");

  let (_, history) = call(&app, "GET", "/crm/leads/101/status-history", None).await;
  assert_eq!(history["timeline"][0]["from_status_code"], "new");
  assert_eq!(history["timeline"][0]["comment"], "called back");
}

#[tokio::test]
async fn change_status_enforces_rules() {
  let (_, app) = app();
  let (status, _) =
    call(&app, "POST", "/crm/leads/101/status", Some(json!({ "status": "won" }))).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

  let (status, body) =
    call(&app, "POST", "/crm/leads/105/status", Some(json!({ "status": "new" }))).await;
  assert_eq!(status, StatusCode::CONFLICT);
  assert!(body["detail"].as_str().unwrap().contains("not allowed"));

  let (status, _) =
    call(&app, "POST", "/crm/leads/999/status", Some(json!({ "status": "new" }))).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bulk_reports_partial_success() {
  let (_, app) = app();
  let (status, body) = call(
    &app,
    "POST",
    "/crm/leads/bulk-status",
    Some(json!({ "lead_ids": ["101", "104", "105"], "status": "contacted" })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "successful": 2, "failed": 1 }));
}

// ─── Fault injection ─────────────────────────────────────────────────────────

#[tokio::test]
async fn queued_failure_applies_once() {
  let (state, app) = app();
  state.fail_next("GET /notifications/count", 503);

  let (status, body) = call(&app, "GET", "/notifications/count", None).await;
  assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
  assert_eq!(body["detail"], "injected failure");

  let (status, _) = call(&app, "GET", "/notifications/count", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(state.hits("GET /notifications/count"), 2);
}
