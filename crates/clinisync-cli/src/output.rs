//! One-line renderings for terminal output.

use clinisync_core::{
  lead::{Lead, LeadStatus, LeadStatusHistoryItem, LeadStatusTransition},
  notification::{Notification, NotificationCount},
};

const TIME: &str = "%Y-%m-%d %H:%M";

pub fn count(c: &NotificationCount) -> String {
  format!(
    "unread {}  (critical {}, high {}, medium {}, low {})",
    c.total, c.critical, c.high, c.medium, c.low
  )
}

pub fn notification(n: &Notification) -> String {
  let marker = if n.read { ' ' } else { '*' };
  let title = n
    .title
    .as_deref()
    .or(n.message.as_deref())
    .unwrap_or("(untitled)");
  format!(
    "{marker} {}  {:<8}  {:<12}  {title}",
    n.created_at.format(TIME),
    n.priority.as_ref(),
    n.id,
  )
}

pub fn status(s: &LeadStatus) -> String {
  let mut flags = Vec::new();
  if s.is_initial {
    flags.push("initial");
  }
  if s.is_final {
    flags.push("final");
  }
  if s.requires_comment {
    flags.push("comment");
  }
  if !s.is_active {
    flags.push("inactive");
  }
  let flags = if flags.is_empty() {
    String::new()
  } else {
    format!("  [{}]", flags.join(", "))
  };
  format!("{:>3}  {:<12}  {}{flags}", s.sort_order, s.code, s.name)
}

pub fn transition(t: &LeadStatusTransition) -> String {
  let label = if t.label.is_empty() {
    t.to_status_name.as_deref().unwrap_or(&t.to_status_code)
  } else {
    &t.label
  };
  let approval = match (&t.approval_role, t.requires_approval) {
    (Some(role), true) => format!("  (approval: {role})"),
    (None, true) => "  (approval required)".to_owned(),
    _ => String::new(),
  };
  format!("-> {:<12}  {label}{approval}", t.to_status_code)
}

pub fn history(h: &LeadStatusHistoryItem) -> String {
  let from = h.from_status_code.as_deref().unwrap_or("-");
  let by = h
    .changed_by_name
    .as_deref()
    .map(|name| format!("  by {name}"))
    .unwrap_or_default();
  let comment = h
    .comment
    .as_deref()
    .map(|c| format!("  \"{c}\""))
    .unwrap_or_default();
  format!(
    "{}  {from} -> {}{by}{comment}",
    h.created_at.format(TIME),
    h.to_status_code
  )
}

pub fn lead(l: &Lead) -> String {
  let name = if l.name.is_empty() { "(unnamed)" } else { &l.name };
  format!("{:<8}  {:<12}  {name}", l.id, l.status)
}
