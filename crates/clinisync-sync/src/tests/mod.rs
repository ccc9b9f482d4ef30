mod leads;

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};

pub use self::fake::FakeTransport;

fn at(minute: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0).unwrap()
}

fn notification(id: &str, priority: &str, read: bool, minute: u32) -> Value {
  json!({
    "id": id,
    "type": "hot_lead",
    "priority": priority,
    "read": read,
    "created_at": at(minute),
    "title": format!("notification {id}"),
  })
}

fn count(critical: u64, high: u64, medium: u64, low: u64) -> Value {
  json!({
    "total": critical + high + medium + low,
    "critical": critical,
    "high": high,
    "medium": medium,
    "low": low,
  })
}

fn status(code: &str, requires_comment: bool, is_active: bool, sort_order: i32) -> Value {
  json!({
    "id": format!("st-{code}"),
    "tenant_id": "t1",
    "code": code,
    "name": code.to_uppercase(),
    "color": "#3b82f6",
    "is_active": is_active,
    "requires_comment": requires_comment,
    "sort_order": sort_order,
  })
}

fn lead(id: &str, status: &str) -> Value {
  json!({ "id": id, "name": format!("Lead {id}"), "status": status, "source": "instagram" })
}

/// Let spawned tasks run until they park.
async fn settle() { tokio::time::sleep(Duration::from_millis(5)).await; }
