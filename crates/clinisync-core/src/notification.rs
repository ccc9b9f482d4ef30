//! Notification inbox types.
//!
//! Notifications are created server-side. The only field the client ever
//! changes locally is [`Notification::read`], and only speculatively.

use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use crate::Id;

// ─── Classification ──────────────────────────────────────────────────────────

/// What produced a notification. Unknown server values fold into `Other`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationType {
  Unanswered,
  HotLead,
  Followup,
  PerformanceAlert,
  Assignment,
  AiAction,
  #[default]
  #[serde(other)]
  Other,
}

/// Urgency bucket. Each known priority has a matching field in
/// [`NotificationCount`]; `Unknown` has none.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  Display,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
  Critical,
  High,
  Medium,
  Low,
  #[default]
  #[serde(other)]
  Unknown,
}

/// The entity a notification points at, e.g. `{kind: "lead", id: "42"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntity {
  pub kind: String,
  pub id:   Id,
}

// ─── Notification ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  pub id:             Id,
  #[serde(rename = "type", default)]
  pub kind:           NotificationType,
  #[serde(default)]
  pub priority:       Priority,
  #[serde(default, alias = "is_read")]
  pub read:           bool,
  pub created_at:     DateTime<Utc>,
  #[serde(default)]
  pub title:          Option<String>,
  #[serde(default)]
  pub message:        Option<String>,
  #[serde(
    rename = "relatedEntity",
    alias = "related_entity",
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub related_entity: Option<RelatedEntity>,
  #[serde(default)]
  pub metadata:       serde_json::Map<String, serde_json::Value>,
}

// ─── Counts ──────────────────────────────────────────────────────────────────

/// Aggregate unread counts.
///
/// `total == critical + high + medium + low` is the server's contract and is
/// not enforced here. Local adjustments saturate at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotificationCount {
  #[serde(default)]
  pub total:    u64,
  #[serde(default)]
  pub critical: u64,
  #[serde(default)]
  pub high:     u64,
  #[serde(default)]
  pub medium:   u64,
  #[serde(default)]
  pub low:      u64,
}

impl NotificationCount {
  pub fn new(critical: u64, high: u64, medium: u64, low: u64) -> Self {
    Self {
      total: critical + high + medium + low,
      critical,
      high,
      medium,
      low,
    }
  }

  fn bucket_mut(&mut self, priority: Priority) -> Option<&mut u64> {
    match priority {
      Priority::Critical => Some(&mut self.critical),
      Priority::High => Some(&mut self.high),
      Priority::Medium => Some(&mut self.medium),
      Priority::Low => Some(&mut self.low),
      Priority::Unknown => None,
    }
  }

  /// Account for one notification of `priority` becoming read.
  ///
  /// `total` always drops by one; the bucket only when the priority is known.
  pub fn decrement(&mut self, priority: Priority) {
    self.total = self.total.saturating_sub(1);
    if let Some(bucket) = self.bucket_mut(priority) {
      *bucket = bucket.saturating_sub(1);
    }
  }

  pub fn is_zero(&self) -> bool { *self == Self::default() }

  /// Field-wise `self - other`, clamped at zero.
  pub fn saturating_sub(self, other: Self) -> Self {
    Self {
      total:    self.total.saturating_sub(other.total),
      critical: self.critical.saturating_sub(other.critical),
      high:     self.high.saturating_sub(other.high),
      medium:   self.medium.saturating_sub(other.medium),
      low:      self.low.saturating_sub(other.low),
    }
  }
}

impl AddAssign for NotificationCount {
  fn add_assign(&mut self, other: Self) {
    self.total += other.total;
    self.critical += other.critical;
    self.high += other.high;
    self.medium += other.medium;
    self.low += other.low;
  }
}
