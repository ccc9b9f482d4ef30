//! Merging push-delivered notifications into pull-sourced lists.

use std::collections::HashMap;

use clinisync_core::{Id, notification::Notification};

/// Size of the push-fed "recent" window.
pub const RECENT_CAP: usize = 10;
/// Upper bound on any merged notification list.
pub const MERGED_CAP: usize = 50;

/// Union of `pulled` and `pushed` keyed by id, newest first, at most `cap`
/// entries. On an id collision the pushed copy wins.
pub fn merge(pulled: Vec<Notification>, pushed: &[Notification], cap: usize) -> Vec<Notification> {
  let mut by_id: HashMap<Id, Notification> = pulled.into_iter().map(|n| (n.id.clone(), n)).collect();
  for n in pushed {
    by_id.insert(n.id.clone(), n.clone());
  }

  let mut merged: Vec<Notification> = by_id.into_values().collect();
  merged.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
  merged.truncate(cap);
  merged
}

/// Set `read` on the entry with `id`. Returns whether anything changed.
pub fn set_read(list: &mut [Notification], id: &Id, read: bool) -> bool {
  let mut changed = false;
  for n in list.iter_mut().filter(|n| &n.id == id && n.read != read) {
    n.read = read;
    changed = true;
  }
  changed
}

/// Mark every entry read. Returns the ids that flipped.
pub fn set_all_read(list: &mut [Notification]) -> Vec<Id> {
  list
    .iter_mut()
    .filter(|n| !n.read)
    .map(|n| {
      n.read = true;
      n.id.clone()
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};
  use clinisync_core::notification::Priority;

  use super::*;

  fn note(id: &str, minute: u32, title: &str) -> Notification {
    serde_json::from_value(serde_json::json!({
      "id": id,
      "type": "hot_lead",
      "priority": "high",
      "created_at": Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
      "title": title,
    }))
    .unwrap()
  }

  #[test]
  fn pushed_copy_overrides_pulled() {
    let pulled = vec![note("1", 0, "pulled"), note("2", 1, "pulled")];
    let pushed = vec![note("2", 1, "pushed")];

    let merged = merge(pulled, &pushed, MERGED_CAP);
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].id, Id::from("2"));
    assert_eq!(merged[0].title.as_deref(), Some("pushed"));
  }

  #[test]
  fn merge_keeps_newest_within_cap() {
    let pulled: Vec<_> = (0..40).map(|i| note(&format!("p{i}"), i, "")).collect();
    let pushed: Vec<_> = (40..55).map(|i| note(&format!("s{i}"), i, "")).collect();

    let merged = merge(pulled, &pushed, MERGED_CAP);
    assert_eq!(merged.len(), MERGED_CAP);
    assert_eq!(merged[0].id, Id::from("s54"));
    assert!(merged.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    assert!(!merged.iter().any(|n| n.id == Id::from("p4")));
  }

  #[test]
  fn set_read_reports_changes_only() {
    let mut list = vec![note("1", 0, ""), note("2", 1, "")];
    assert!(set_read(&mut list, &Id::from("1"), true));
    assert!(!set_read(&mut list, &Id::from("1"), true));
    assert!(!set_read(&mut list, &Id::from("9"), true));
    assert_eq!(set_all_read(&mut list), vec![Id::from("2")]);
    assert!(list.iter().all(|n| n.read && n.priority == Priority::High));
  }
}
