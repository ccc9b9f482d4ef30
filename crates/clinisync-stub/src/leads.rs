//! Handlers for `/crm` lead-workflow endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/crm/lead-statuses` | `?include_inactive`, `?tenant_id` |
//! | `GET`  | `/crm/leads` | `?status`, `?limit`, `?offset`; `{"items": [...]}` |
//! | `GET`  | `/crm/leads/{id}` | `{"lead": {...}}` |
//! | `GET`  | `/crm/leads/{id}/available-transitions` | Bare array, may be empty |
//! | `POST` | `/crm/leads/{id}/status` | Body: [`StatusChange`] |
//! | `POST` | `/crm/leads/bulk-status` | Body: [`BulkStatusChange`] |
//! | `GET`  | `/crm/leads/{id}/status-history` | `{"timeline": [...]}`, newest first |
//!
//! Transition rule: a lead in a non-final status may move to any other
//! active status. Final statuses have no way out.

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::Utc;
use clinisync_core::{
  Id,
  lead::{
    BulkStatusChange, BulkStatusResult, Lead, LeadStatus, LeadStatusHistoryItem,
    LeadStatusTransition, StatusChange,
  },
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{ApiError, Backend, StubState};

// ─── Master data ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StatusParams {
  #[serde(default)]
  pub include_inactive: bool,
  pub tenant_id:        Option<Id>,
}

/// `GET /crm/lead-statuses`
pub async fn statuses(
  State(state): State<StubState>,
  Query(params): Query<StatusParams>,
) -> Json<Vec<LeadStatus>> {
  let mut statuses: Vec<LeadStatus> = state.with_backend(|b| {
    b.statuses
      .iter()
      .filter(|s| params.include_inactive || s.is_active)
      .filter(|s| params.tenant_id.as_ref().is_none_or(|t| &s.tenant_id == t))
      .cloned()
      .collect()
  });
  statuses.sort_by_key(|s| s.sort_order);
  Json(statuses)
}

// ─── Leads ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub status: Option<String>,
  #[serde(default = "default_limit")]
  pub limit:  usize,
  #[serde(default)]
  pub offset: usize,
}

fn default_limit() -> usize { 50 }

/// `GET /crm/leads`
pub async fn list(State(state): State<StubState>, Query(params): Query<ListParams>) -> Json<Value> {
  let items: Vec<Lead> = state.with_backend(|b| {
    b.leads
      .iter()
      .filter(|l| params.status.as_ref().is_none_or(|s| &l.status == s))
      .skip(params.offset)
      .take(params.limit)
      .cloned()
      .collect()
  });
  Json(json!({ "items": items }))
}

/// `GET /crm/leads/{id}`
pub async fn get_one(
  State(state): State<StubState>,
  Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
  let lead = state.lead(&id).ok_or_else(|| not_found(&id))?;
  Ok(Json(json!({ "lead": lead })))
}

fn not_found(id: &str) -> ApiError { ApiError::NotFound(format!("lead {id} not found")) }

// ─── Transitions ─────────────────────────────────────────────────────────────

fn transitions_for(b: &Backend, current: &str) -> Vec<LeadStatusTransition> {
  if b.statuses.iter().any(|s| s.code == current && s.is_final) {
    return Vec::new();
  }
  let mut targets: Vec<&LeadStatus> = b
    .statuses
    .iter()
    .filter(|s| s.is_active && s.code != current)
    .collect();
  targets.sort_by_key(|s| s.sort_order);
  targets
    .into_iter()
    .map(|s| LeadStatusTransition {
      from_status_code:  Some(current.to_owned()),
      to_status_code:    s.code.clone(),
      label:             format!("Move to {}", s.name),
      requires_approval: false,
      approval_role:     None,
      to_status_name:    Some(s.name.clone()),
      to_status_color:   s.color.clone(),
      to_status_icon:    s.icon.clone(),
    })
    .collect()
}

/// `GET /crm/leads/{id}/available-transitions`
pub async fn transitions(
  State(state): State<StubState>,
  Path(id): Path<String>,
) -> Result<Json<Vec<LeadStatusTransition>>, ApiError> {
  state.with_backend(|b| {
    let lead = b.leads.iter().find(|l| l.id.as_str() == id).ok_or_else(|| not_found(&id))?;
    Ok(Json(transitions_for(b, &lead.status)))
  })
}

// ─── Status changes ──────────────────────────────────────────────────────────

/// Apply one change, enforcing the same rules as the real backend. Appends a
/// history record on success.
fn apply_change(
  b: &mut Backend,
  id: &str,
  status: &str,
  comment: Option<&str>,
) -> Result<Lead, ApiError> {
  let current = b
    .leads
    .iter()
    .find(|l| l.id.as_str() == id)
    .map(|l| l.status.clone())
    .ok_or_else(|| not_found(id))?;
  let target = b
    .statuses
    .iter()
    .find(|s| s.code == status)
    .ok_or_else(|| ApiError::BadRequest(format!("unknown status '{status}'")))?;
  let comment = comment.map(str::trim).filter(|c| !c.is_empty());
  if target.requires_comment && comment.is_none() {
    return Err(ApiError::Unprocessable(format!("status '{status}' requires a comment")));
  }
  if !transitions_for(b, &current).iter().any(|t| t.to_status_code == status) {
    return Err(ApiError::Conflict(format!(
      "transition from '{current}' to '{status}' not allowed"
    )));
  }

  let now = Utc::now();
  b.history.push(LeadStatusHistoryItem {
    id:                 Id::new(Uuid::new_v4().to_string()),
    lead_id:            Id::from(id),
    from_status_code:   Some(current),
    to_status_code:     status.to_owned(),
    changed_by_user_id: None,
    changed_by_name:    Some("stub".to_owned()),
    comment:            comment.map(str::to_owned),
    created_at:         now,
  });
  let lead = b
    .leads
    .iter_mut()
    .find(|l| l.id.as_str() == id)
    .ok_or_else(|| not_found(id))?;
  lead.status = status.to_owned();
  lead.updated_at = Some(now);
  Ok(lead.clone())
}

/// `POST /crm/leads/{id}/status`
pub async fn change_status(
  State(state): State<StubState>,
  Path(id): Path<String>,
  Json(body): Json<StatusChange>,
) -> Result<Json<Value>, ApiError> {
  let lead =
    state.with_backend(|b| apply_change(b, &id, &body.status, body.comment.as_deref()))?;
  Ok(Json(json!({ "lead": lead })))
}

/// `POST /crm/leads/bulk-status`
pub async fn bulk_change_status(
  State(state): State<StubState>,
  Json(body): Json<BulkStatusChange>,
) -> Json<BulkStatusResult> {
  let result = state.with_backend(|b| {
    let mut result = BulkStatusResult::default();
    for id in &body.lead_ids {
      match apply_change(b, id.as_str(), &body.status, body.comment.as_deref()) {
        Ok(_) => result.successful += 1,
        Err(_) => result.failed += 1,
      }
    }
    result
  });
  Json(result)
}

// ─── History ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
  #[serde(default = "default_history_limit")]
  pub limit:  usize,
  #[serde(default)]
  pub offset: usize,
}

fn default_history_limit() -> usize { 20 }

/// `GET /crm/leads/{id}/status-history`
pub async fn history(
  State(state): State<StubState>,
  Path(id): Path<String>,
  Query(params): Query<HistoryParams>,
) -> Result<Json<Value>, ApiError> {
  let timeline = state.with_backend(|b| {
    if !b.leads.iter().any(|l| l.id.as_str() == id) {
      return Err(not_found(&id));
    }
    let mut items: Vec<LeadStatusHistoryItem> = b
      .history
      .iter()
      .filter(|h| h.lead_id.as_str() == id)
      .cloned()
      .collect();
    items.sort_by(|x, y| y.created_at.cmp(&x.created_at));
    Ok(items.into_iter().skip(params.offset).take(params.limit).collect::<Vec<_>>())
  })?;
  Ok(Json(json!({ "timeline": timeline })))
}
