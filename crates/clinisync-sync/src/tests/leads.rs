use std::sync::Arc;

use clinisync_core::{Error, ErrorKind, Id, lead::StatusChange};
use serde_json::json;

use super::{FakeTransport, at, lead, settle, status};
use crate::{LeadQuery, LeadWorkflow};

const STATUSES: &str = "GET /crm/lead-statuses";
const LEADS: &str = "GET /crm/leads";
const BULK: &str = "POST /crm/leads/bulk-status";

fn change_route(lead: &str) -> String { format!("POST /crm/leads/{lead}/status") }

/// Workflow with statuses loaded (`won` demands a comment) and one cached
/// lead list holding leads `7` (`new`) and `8` (`contacted`).
async fn primed() -> (Arc<FakeTransport>, LeadWorkflow<FakeTransport>) {
  let transport = Arc::new(FakeTransport::new());
  let workflow = LeadWorkflow::new(transport.clone(), Id::from("t1"));
  transport.respond(
    STATUSES,
    Ok(json!([
      status("won", true, true, 3),
      status("new", false, true, 1),
      status("contacted", false, true, 2),
      status("archived", false, false, 9),
    ])),
  );
  transport.respond(LEADS, Ok(json!({ "items": [lead("7", "new"), lead("8", "contacted")] })));
  workflow.get_statuses(&Id::from("t1"), false).await.unwrap();
  workflow.list_leads(&LeadQuery::default()).await.unwrap();
  (transport, workflow)
}

async fn cached_status(workflow: &LeadWorkflow<FakeTransport>, id: &str) -> String {
  workflow
    .list_leads(&LeadQuery::default())
    .await
    .unwrap()
    .into_iter()
    .find(|l| l.id == Id::from(id))
    .unwrap()
    .status
}

// ─── Reads ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn statuses_are_sorted_filtered_and_cached() {
  let (transport, workflow) = primed().await;

  let active = workflow.get_statuses(&Id::from("t1"), false).await.unwrap();
  let codes: Vec<_> = active.iter().map(|s| s.code.as_str()).collect();
  assert_eq!(codes, ["new", "contacted", "won"]);
  assert_eq!(transport.requests_to(STATUSES), 1);

  let all = workflow.get_statuses(&Id::from("t1"), true).await.unwrap();
  assert_eq!(all.len(), 4);
  assert_eq!(transport.requests_to(STATUSES), 2);
  let sent = transport.last_request(STATUSES).unwrap();
  assert!(sent.query.contains(&("include_inactive".to_string(), "true".to_string())));

  assert!(workflow.status_for_code("won").unwrap().requires_comment);
  assert!(workflow.status_for_code("lost").is_none());
}

#[tokio::test]
async fn transitions_are_refetched_and_may_be_empty() {
  let transport = Arc::new(FakeTransport::new());
  let workflow = LeadWorkflow::new(transport.clone(), Id::from("t1"));
  let route = "GET /crm/leads/7/available-transitions";
  transport.respond(route, Ok(json!([])));

  assert!(workflow.get_transitions(&Id::from("7")).await.unwrap().is_empty());
  transport.respond(
    route,
    Ok(json!([{ "from_status_code": "new", "to_status_code": "contacted", "label": "Contact" }])),
  );
  let transitions = workflow.get_transitions(&Id::from("7")).await.unwrap();
  assert_eq!(transitions[0].to_status_code, "contacted");
  assert_eq!(transport.requests_to(route), 2);
}

#[tokio::test]
async fn history_unwraps_timeline_newest_first() {
  let transport = Arc::new(FakeTransport::new());
  let workflow = LeadWorkflow::new(transport.clone(), Id::from("t1"));
  let route = "GET /crm/leads/7/status-history";
  transport.respond(
    route,
    Ok(json!({ "timeline": [
      { "id": 1, "lead_id": 7, "to_status_code": "new", "created_at": at(1) },
      { "id": 2, "lead_id": 7, "from_status_code": "new", "to_status_code": "contacted",
        "changed_by_name": "Dr. Lima", "created_at": at(30) },
    ]})),
  );

  let items = workflow.get_history(&Id::from("7"), 20, 0).await.unwrap();
  assert_eq!(items[0].to_status_code, "contacted");
  assert_eq!(items[1].from_status_code, None);

  let sent = transport.last_request(route).unwrap();
  assert_eq!(sent.query, vec![
    ("limit".to_string(), "20".to_string()),
    ("offset".to_string(), "0".to_string()),
  ]);
}

// ─── change_status ───────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_comment_is_rejected_before_sending() {
  let (transport, workflow) = primed().await;

  for change in [StatusChange::new("won"), StatusChange::new("won").with_comment("   ")] {
    let err = workflow.change_status(&Id::from("7"), change).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
  }
  assert_eq!(transport.requests_to(&change_route("7")), 0);
  assert_eq!(cached_status(&workflow, "7").await, "new");
}

#[tokio::test]
async fn comment_rule_loads_statuses_when_none_are_cached() {
  let transport = Arc::new(FakeTransport::new());
  let workflow = LeadWorkflow::new(transport.clone(), Id::from("t1"));
  transport.respond(STATUSES, Ok(json!([status("won", true, true, 3)])));

  let err = workflow
    .change_status(&Id::from("7"), StatusChange::new("won"))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);
  assert_eq!(transport.requests_to(&change_route("7")), 0);

  let err = workflow
    .bulk_change_status(&[Id::from("7")], "won", None)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);
  assert_eq!(transport.requests_to(BULK), 0);
  assert_eq!(transport.requests_to(STATUSES), 1);
  let sent = transport.last_request(STATUSES).unwrap();
  assert!(sent.query.contains(&("include_inactive".to_string(), "true".to_string())));
}

#[tokio::test]
async fn unreachable_statuses_let_the_server_decide() {
  let transport = Arc::new(FakeTransport::new());
  let workflow = LeadWorkflow::new(transport.clone(), Id::from("t1"));
  transport.respond(STATUSES, Err(Error::Timeout));
  transport.respond(&change_route("7"), Ok(serde_json::Value::Null));

  workflow
    .change_status(&Id::from("7"), StatusChange::new("won"))
    .await
    .unwrap();
  assert_eq!(transport.requests_to(&change_route("7")), 1);
}

#[tokio::test]
async fn unknown_status_skips_validation() {
  let (transport, workflow) = primed().await;
  transport.respond(&change_route("7"), Ok(json!({ "ok": true })));

  workflow
    .change_status(&Id::from("7"), StatusChange::new("escalated"))
    .await
    .unwrap();
  assert_eq!(transport.requests_to(&change_route("7")), 1);
}

#[tokio::test]
async fn comment_is_trimmed_on_the_wire() {
  let (transport, workflow) = primed().await;
  transport.respond(&change_route("7"), Ok(serde_json::Value::Null));

  workflow
    .change_status(
      &Id::from("7"),
      StatusChange::new("won")
        .with_comment("  contract signed \n")
        .with_metadata(json!({ "value": 1200 })),
    )
    .await
    .unwrap();

  let body = transport.last_request(&change_route("7")).unwrap().body.unwrap();
  assert_eq!(body, json!({
    "status": "won",
    "comment": "contract signed",
    "metadata": { "value": 1200 },
  }));
}

#[tokio::test]
async fn conflict_reverts_optimistic_status() {
  let (transport, workflow) = primed().await;
  let gate = transport.hold(&change_route("7"));
  let workflow = Arc::new(workflow);

  let pending = tokio::spawn({
    let workflow = workflow.clone();
    async move {
      workflow
        .change_status(&Id::from("7"), StatusChange::new("contacted"))
        .await
    }
  });
  settle().await;
  assert_eq!(cached_status(&workflow, "7").await, "contacted");

  gate
    .send(Err(Error::Http {
      status: 409,
      detail: "transition not allowed".into(),
    }))
    .unwrap();
  let err = pending.await.unwrap().unwrap_err();

  assert_eq!(err.kind(), ErrorKind::Http4xx);
  assert_eq!(cached_status(&workflow, "7").await, "new");
  assert_eq!(cached_status(&workflow, "8").await, "contacted");
}

#[tokio::test]
async fn late_failure_does_not_clobber_newer_change() {
  let (transport, workflow) = primed().await;
  let route = change_route("7");
  let first = transport.hold(&route);
  transport.respond(&route, Ok(serde_json::Value::Null));
  let workflow = Arc::new(workflow);

  let slow = tokio::spawn({
    let workflow = workflow.clone();
    async move {
      workflow
        .change_status(&Id::from("7"), StatusChange::new("contacted"))
        .await
    }
  });
  settle().await;
  workflow
    .change_status(&Id::from("7"), StatusChange::new("lost"))
    .await
    .unwrap();

  first.send(Err(Error::Timeout)).unwrap();
  slow.await.unwrap().unwrap_err();
  assert_eq!(cached_status(&workflow, "7").await, "lost");
}

#[tokio::test]
async fn success_invalidates_detail_transitions_and_history() {
  let (transport, workflow) = primed().await;
  let id = Id::from("7");
  let detail = "GET /crm/leads/7";
  let transitions = "GET /crm/leads/7/available-transitions";
  let history = "GET /crm/leads/7/status-history";
  transport.respond(detail, Ok(json!({ "lead": lead("7", "new") })));
  transport.respond(transitions, Ok(json!([])));
  transport.respond(history, Ok(json!({ "timeline": [] })));
  transport.respond(&change_route("7"), Ok(serde_json::Value::Null));

  workflow.get_lead(&id).await.unwrap();
  workflow.get_history(&id, 10, 0).await.unwrap();
  workflow.get_lead(&id).await.unwrap();
  workflow.get_history(&id, 10, 0).await.unwrap();
  assert_eq!(transport.requests_to(detail), 1);
  assert_eq!(transport.requests_to(history), 1);

  workflow
    .change_status(&id, StatusChange::new("contacted"))
    .await
    .unwrap();

  workflow.get_lead(&id).await.unwrap();
  workflow.get_history(&id, 10, 0).await.unwrap();
  assert_eq!(transport.requests_to(detail), 2);
  assert_eq!(transport.requests_to(history), 2);
  // The list keeps the patched value until it is refetched on its own
  // schedule.
  assert_eq!(cached_status(&workflow, "7").await, "contacted");
  assert_eq!(transport.requests_to(LEADS), 1);
}

// ─── bulk_change_status ──────────────────────────────────────────────────────

#[tokio::test]
async fn bulk_with_no_leads_sends_nothing() {
  let (transport, workflow) = primed().await;
  let result = workflow.bulk_change_status(&[], "contacted", None).await.unwrap();
  assert_eq!((result.successful, result.failed), (0, 0));
  assert_eq!(transport.requests_to(BULK), 0);
}

#[tokio::test]
async fn bulk_success_invalidates_every_list() {
  let (transport, workflow) = primed().await;
  transport.respond(BULK, Ok(json!({ "successful": 1, "failed": 1 })));

  let ids = [Id::from("7"), Id::from("8")];
  let result = workflow
    .bulk_change_status(&ids, "contacted", Some(" follow-up call "))
    .await
    .unwrap();
  assert_eq!((result.successful, result.failed), (1, 1));

  let body = transport.last_request(BULK).unwrap().body.unwrap();
  assert_eq!(body, json!({
    "lead_ids": ["7", "8"],
    "status": "contacted",
    "comment": "follow-up call",
  }));

  // Nothing was patched; the next read goes back to the server.
  assert_eq!(cached_status(&workflow, "7").await, "new");
  assert_eq!(transport.requests_to(LEADS), 2);
}

#[tokio::test]
async fn bulk_failure_leaves_cache_untouched() {
  let (transport, workflow) = primed().await;
  transport.respond(BULK, Err(Error::Network("connection refused".into())));

  let err = workflow
    .bulk_change_status(&[Id::from("7")], "contacted", None)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Network);

  cached_status(&workflow, "7").await;
  assert_eq!(transport.requests_to(LEADS), 1);
}

#[tokio::test]
async fn bulk_applies_comment_gate() {
  let (transport, workflow) = primed().await;
  let err = workflow
    .bulk_change_status(&[Id::from("7")], "won", Some("  "))
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::Validation);
  assert_eq!(transport.requests_to(BULK), 0);
}
