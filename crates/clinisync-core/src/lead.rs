//! Lead workflow types: status master data, per-lead transitions, history.
//!
//! A status is identified by its `code`, a stable human key distinct from the
//! database `id`. Transitions and history reference codes, never ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Id;

// ─── Master data ─────────────────────────────────────────────────────────────

/// Tenant-scoped lead status definition. Effectively tenant configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadStatus {
  pub id:               Id,
  pub tenant_id:        Id,
  pub code:             String,
  pub name:             String,
  /// Hex colour, e.g. `#3b82f6`.
  #[serde(default)]
  pub color:            Option<String>,
  /// Symbolic icon name.
  #[serde(default)]
  pub icon:             Option<String>,
  #[serde(default)]
  pub badge_style:      Option<String>,
  #[serde(default = "default_true")]
  pub is_active:        bool,
  #[serde(default)]
  pub is_initial:       bool,
  #[serde(default)]
  pub is_final:         bool,
  #[serde(default)]
  pub requires_comment: bool,
  #[serde(default)]
  pub sort_order:       i32,
}

fn default_true() -> bool { true }

// ─── Transitions ─────────────────────────────────────────────────────────────

/// A move currently legal for one specific lead in its current state.
///
/// Legality is computed by the server; the client only renders the edges it
/// is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadStatusTransition {
  #[serde(default)]
  pub from_status_code:  Option<String>,
  pub to_status_code:    String,
  #[serde(default)]
  pub label:             String,
  #[serde(default)]
  pub requires_approval: bool,
  #[serde(default)]
  pub approval_role:     Option<String>,
  #[serde(default)]
  pub to_status_name:    Option<String>,
  #[serde(default)]
  pub to_status_color:   Option<String>,
  #[serde(default)]
  pub to_status_icon:    Option<String>,
}

// ─── History ─────────────────────────────────────────────────────────────────

/// One append-only audit record of a status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadStatusHistoryItem {
  pub id:                 Id,
  pub lead_id:            Id,
  #[serde(default)]
  pub from_status_code:   Option<String>,
  pub to_status_code:     String,
  #[serde(default)]
  pub changed_by_user_id: Option<Id>,
  #[serde(default)]
  pub changed_by_name:    Option<String>,
  #[serde(default)]
  pub comment:            Option<String>,
  pub created_at:         DateTime<Utc>,
}

// ─── Leads ───────────────────────────────────────────────────────────────────

/// A lead as it appears in list and detail views.
///
/// Only `status` is ever patched locally. Fields the client does not model
/// are preserved in `extra` so nothing the server sent is lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
  pub id:          Id,
  #[serde(default)]
  pub name:        String,
  pub status:      String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub assigned_to: Option<Id>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at:  Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub extra:       serde_json::Map<String, serde_json::Value>,
}

// ─── Mutations ───────────────────────────────────────────────────────────────

/// Body of `POST /crm/leads/{id}/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
  pub status:   String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub comment:  Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metadata: Option<serde_json::Value>,
}

impl StatusChange {
  pub fn new(status: impl Into<String>) -> Self {
    Self {
      status: status.into(),
      ..Self::default()
    }
  }

  pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
    self.comment = Some(comment.into());
    self
  }

  pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
    self.metadata = Some(metadata);
    self
  }

  /// The comment with surrounding whitespace removed, if anything is left.
  pub fn trimmed_comment(&self) -> Option<&str> {
    self
      .comment
      .as_deref()
      .map(str::trim)
      .filter(|c| !c.is_empty())
  }
}

/// Body of `POST /crm/leads/bulk-status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkStatusChange {
  pub lead_ids: Vec<Id>,
  pub status:   String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub comment:  Option<String>,
}

/// Outcome of a bulk change. The client never reasons about which subset
/// succeeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkStatusResult {
  #[serde(default)]
  pub successful: u64,
  #[serde(default)]
  pub failed:     u64,
}
