//! The lead workflow: status master data, per-lead transitions and history,
//! and status changes.
//!
//! Only a lead's `status` in cached lists is ever patched locally. Everything
//! else is server truth that gets invalidated and refetched after a change,
//! because the server may apply side effects the client cannot predict.

use std::{sync::Arc, time::Duration};

use clinisync_core::{
  Error, Id, Result,
  lead::{
    BulkStatusChange, BulkStatusResult, Lead, LeadStatus, LeadStatusHistoryItem,
    LeadStatusTransition, StatusChange,
  },
  transport::{Request, Transport},
  wire::{decode_list, decode_one},
};
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, Patched};

const STATUSES_STALE_AFTER: Duration = Duration::from_secs(60 * 60);
const LEADS_STALE_AFTER: Duration = Duration::from_secs(30);
const HISTORY_STALE_AFTER: Duration = Duration::from_secs(30);

const LIST_PREFIX: &str = "leads:list:";

fn detail_key(lead: &Id) -> String { format!("leads:{lead}:detail") }
fn transitions_key(lead: &Id) -> String { format!("leads:{lead}:transitions") }
fn history_prefix(lead: &Id) -> String { format!("leads:{lead}:history:") }

/// Filter and page for [`LeadWorkflow::list_leads`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadQuery {
  pub status: Option<String>,
  pub limit:  usize,
  pub offset: usize,
}

impl Default for LeadQuery {
  fn default() -> Self {
    Self {
      status: None,
      limit:  50,
      offset: 0,
    }
  }
}

impl LeadQuery {
  fn key(&self) -> String {
    format!(
      "{LIST_PREFIX}{}:{}:{}",
      self.status.as_deref().unwrap_or("*"),
      self.limit,
      self.offset
    )
  }
}

pub struct LeadWorkflow<T> {
  transport:   Arc<T>,
  /// Tenant whose status definitions gate `change_status`.
  tenant:      Id,
  statuses:    CacheStore<Vec<LeadStatus>>,
  leads:       CacheStore<Vec<Lead>>,
  details:     CacheStore<Lead>,
  transitions: CacheStore<Vec<LeadStatusTransition>>,
  history:     CacheStore<Vec<LeadStatusHistoryItem>>,
}

impl<T: Transport> LeadWorkflow<T> {
  pub fn new(transport: Arc<T>, tenant: Id) -> Self {
    Self {
      transport,
      tenant,
      statuses: CacheStore::new("lead-statuses"),
      leads: CacheStore::new("lead-list"),
      details: CacheStore::new("lead-detail"),
      transitions: CacheStore::new("lead-transitions"),
      history: CacheStore::new("lead-history"),
    }
  }

  pub fn tenant(&self) -> &Id { &self.tenant }

  // ─── Master data ───────────────────────────────────────────────────────────

  /// Status definitions for `tenant`, ordered by `sort_order`.
  pub async fn get_statuses(&self, tenant: &Id, include_inactive: bool) -> Result<Vec<LeadStatus>> {
    let scope = if include_inactive { "all" } else { "active" };
    let key = format!("lead-statuses:{tenant}:{scope}");
    let transport = self.transport.clone();
    let request = Request::get("/crm/lead-statuses")
      .param("tenant_id", tenant)
      .param("include_inactive", include_inactive);
    self
      .statuses
      .read_through(&key, STATUSES_STALE_AFTER, move || async move {
        let mut statuses: Vec<LeadStatus> = decode_list(transport.request(request).await?)?;
        if !include_inactive {
          statuses.retain(|s| s.is_active);
        }
        statuses.sort_by_key(|s| s.sort_order);
        Ok(statuses)
      })
      .await
  }

  /// The cached definition for `code` in this workflow's tenant, if any has
  /// been loaded. Never touches the network.
  pub fn status_for_code(&self, code: &str) -> Option<LeadStatus> {
    self
      .statuses
      .keys(&format!("lead-statuses:{}:", self.tenant))
      .into_iter()
      .filter_map(|key| self.statuses.get(&key).value())
      .find_map(|list| list.into_iter().find(|s| s.code == code))
  }

  // ─── Per-lead reads ────────────────────────────────────────────────────────

  /// Moves currently legal for `lead`. Always refetched; concurrent callers
  /// still share one request. An empty list is a valid answer.
  pub async fn get_transitions(&self, lead: &Id) -> Result<Vec<LeadStatusTransition>> {
    let transport = self.transport.clone();
    let request = Request::get(format!("/crm/leads/{lead}/available-transitions"));
    self
      .transitions
      .read_through(&transitions_key(lead), Duration::ZERO, move || async move {
        decode_list(transport.request(request).await?)
      })
      .await
  }

  /// One page of the status audit trail, newest first.
  pub async fn get_history(
    &self,
    lead: &Id,
    limit: usize,
    offset: usize,
  ) -> Result<Vec<LeadStatusHistoryItem>> {
    let key = format!("{}{limit}:{offset}", history_prefix(lead));
    let transport = self.transport.clone();
    let request = Request::get(format!("/crm/leads/{lead}/status-history"))
      .param("limit", limit)
      .param("offset", offset);
    self
      .history
      .read_through(&key, HISTORY_STALE_AFTER, move || async move {
        let mut items: Vec<LeadStatusHistoryItem> = decode_list(transport.request(request).await?)?;
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
      })
      .await
  }

  pub async fn list_leads(&self, query: &LeadQuery) -> Result<Vec<Lead>> {
    let transport = self.transport.clone();
    let request = Request::get("/crm/leads")
      .param_opt("status", query.status.as_deref())
      .param("limit", query.limit)
      .param("offset", query.offset);
    self
      .leads
      .read_through(&query.key(), LEADS_STALE_AFTER, move || async move {
        decode_list(transport.request(request).await?)
      })
      .await
  }

  pub async fn get_lead(&self, lead: &Id) -> Result<Lead> {
    let transport = self.transport.clone();
    let request = Request::get(format!("/crm/leads/{lead}"));
    self
      .details
      .read_through(&detail_key(lead), LEADS_STALE_AFTER, move || async move {
        decode_one(transport.request(request).await?, "lead")
      })
      .await
  }

  // ─── Mutations ─────────────────────────────────────────────────────────────

  /// Fail before sending when the target status demands a comment and none
  /// was given. Definitions come from the full status list, read through the
  /// cache. Codes it does not know pass; the server decides.
  async fn check_comment(&self, status: &str, comment: Option<&str>) -> Result<()> {
    let def = match self.get_statuses(&self.tenant, true).await {
      Ok(statuses) => statuses.into_iter().find(|s| s.code == status),
      Err(e) => {
        warn!(status, error = %e, "statuses unavailable; checking against cached definitions");
        self.status_for_code(status)
      }
    };
    match def {
      Some(def) if def.requires_comment && comment.is_none() => Err(Error::Validation(format!(
        "moving to '{}' requires a comment",
        def.name
      ))),
      Some(_) => Ok(()),
      None => {
        debug!(status, "unknown status; skipping comment check");
        Ok(())
      }
    }
  }

  /// Move one lead to `change.status`.
  ///
  /// Cached lists show the new status immediately. On success the lead's
  /// detail, transitions and history are invalidated; on failure the list
  /// entries are put back unless something else has changed them since.
  pub async fn change_status(&self, lead: &Id, change: StatusChange) -> Result<()> {
    let comment = change.trimmed_comment().map(str::to_owned);
    self.check_comment(&change.status, comment.as_deref()).await?;

    let target = change.status.clone();
    let patched = self.leads.patch_matching(LIST_PREFIX, |_, list| {
      let mut changed = false;
      for entry in list.iter_mut().filter(|l| &l.id == lead && l.status != target) {
        entry.status = target.clone();
        changed = true;
      }
      changed
    });
    debug!(%lead, status = %target, entries = patched.len(), "status patched");

    let body = StatusChange {
      comment,
      ..change
    };
    let result = self.send_status_change(lead, &body).await;

    match result {
      Ok(()) => {
        self.details.invalidate(&detail_key(lead));
        self.transitions.invalidate(&transitions_key(lead));
        self.history.invalidate(&history_prefix(lead));
        info!(%lead, status = %target, "status changed");
        Ok(())
      }
      Err(e) => {
        warn!(%lead, status = %target, error = %e, "status change failed; rolling back");
        self.roll_back_status(lead, &target, patched);
        Err(e)
      }
    }
  }

  async fn send_status_change(&self, lead: &Id, body: &StatusChange) -> Result<()> {
    let request = Request::post(format!("/crm/leads/{lead}/status")).json(body)?;
    self.transport.request(request).await.map(drop)
  }

  /// Put each entry's pre-patch status back, but only where it still shows
  /// the status this change wrote.
  fn roll_back_status(&self, lead: &Id, target: &str, patched: Vec<Patched<Vec<Lead>>>) {
    for token in patched {
      let Some(previous) = token
        .previous()
        .iter()
        .find(|l| &l.id == lead)
        .map(|l| l.status.clone())
      else {
        continue;
      };
      self.leads.patch(token.key(), |list| {
        for entry in list.iter_mut().filter(|l| &l.id == lead && l.status == target) {
          entry.status = previous.clone();
        }
      });
    }
  }

  /// Move many leads at once. Nothing is patched locally; on success every
  /// cached lead list is invalidated.
  pub async fn bulk_change_status(
    &self,
    leads: &[Id],
    status: &str,
    comment: Option<&str>,
  ) -> Result<BulkStatusResult> {
    if leads.is_empty() {
      return Ok(BulkStatusResult::default());
    }
    let comment = comment.map(str::trim).filter(|c| !c.is_empty());
    self.check_comment(status, comment).await?;

    let body = BulkStatusChange {
      lead_ids: leads.to_vec(),
      status:   status.to_owned(),
      comment:  comment.map(str::to_owned),
    };
    let request = Request::post("/crm/leads/bulk-status").json(&body)?;
    let response = self.transport.request(request).await?;

    // The server accepted the batch; whatever it did, local lists are stale.
    self.leads.invalidate(LIST_PREFIX);
    for lead in leads {
      self.details.invalidate(&detail_key(lead));
      self.transitions.invalidate(&transitions_key(lead));
      self.history.invalidate(&history_prefix(lead));
    }

    let outcome = if response.is_null() {
      BulkStatusResult::default()
    } else {
      decode_one(response, "result")?
    };
    info!(
      status,
      successful = outcome.successful,
      failed = outcome.failed,
      "bulk status change"
    );
    Ok(outcome)
  }
}
