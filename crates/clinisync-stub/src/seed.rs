//! Demo data for tenant `demo`.

use chrono::{Duration, Utc};
use clinisync_core::{
  Id,
  lead::{Lead, LeadStatus, LeadStatusHistoryItem},
  notification::{Notification, NotificationType, Priority, RelatedEntity},
};
use uuid::Uuid;

use crate::Backend;

pub const TENANT: &str = "demo";

/// A status definition for [`TENANT`].
pub fn status(code: &str, name: &str, sort_order: i32) -> LeadStatus {
  LeadStatus {
    id: Id::new(format!("status-{code}")),
    tenant_id: Id::from(TENANT),
    code: code.to_owned(),
    name: name.to_owned(),
    color: None,
    icon: None,
    badge_style: None,
    is_active: true,
    is_initial: false,
    is_final: false,
    requires_comment: false,
    sort_order,
  }
}

pub fn lead(id: &str, name: &str, status: &str) -> Lead {
  Lead {
    id:          Id::from(id),
    name:        name.to_owned(),
    status:      status.to_owned(),
    assigned_to: None,
    updated_at:  None,
    extra:       serde_json::Map::new(),
  }
}

/// An unread notification created `minutes_ago` minutes before now.
pub fn notification(id: &str, priority: Priority, minutes_ago: i64) -> Notification {
  Notification {
    id:             Id::from(id),
    kind:           NotificationType::Other,
    priority,
    read:           false,
    created_at:     Utc::now() - Duration::minutes(minutes_ago),
    title:          None,
    message:        None,
    related_entity: None,
    metadata:       serde_json::Map::new(),
  }
}

pub fn demo() -> Backend {
  let statuses = vec![
    LeadStatus {
      is_initial: true,
      color: Some("#3b82f6".into()),
      icon: Some("sparkles".into()),
      ..status("new", "New", 1)
    },
    LeadStatus {
      color: Some("#f59e0b".into()),
      icon: Some("phone".into()),
      ..status("contacted", "Contacted", 2)
    },
    LeadStatus {
      color: Some("#8b5cf6".into()),
      ..status("scheduled", "Appointment scheduled", 3)
    },
    LeadStatus {
      is_final: true,
      requires_comment: true,
      color: Some("#10b981".into()),
      icon: Some("check".into()),
      ..status("won", "Won", 4)
    },
    LeadStatus {
      is_final: true,
      requires_comment: true,
      color: Some("#ef4444".into()),
      icon: Some("x".into()),
      ..status("lost", "Lost", 5)
    },
    LeadStatus {
      is_active: false,
      ..status("archived", "Archived", 99)
    },
  ];

  let leads = vec![
    lead("101", "Ana Souza", "new"),
    lead("102", "Bruno Lima", "contacted"),
    lead("103", "Carla Mendes", "scheduled"),
    lead("104", "Diego Rocha", "new"),
    lead("105", "Elisa Prado", "won"),
  ];

  let now = Utc::now();
  let history = vec![
    LeadStatusHistoryItem {
      id:                 Id::new(Uuid::new_v4().to_string()),
      lead_id:            Id::from("102"),
      from_status_code:   Some("new".into()),
      to_status_code:     "contacted".into(),
      changed_by_user_id: Some(Id::from("u-1")),
      changed_by_name:    Some("Reception".into()),
      comment:            None,
      created_at:         now - Duration::hours(3),
    },
    LeadStatusHistoryItem {
      id:                 Id::new(Uuid::new_v4().to_string()),
      lead_id:            Id::from("105"),
      from_status_code:   Some("scheduled".into()),
      to_status_code:     "won".into(),
      changed_by_user_id: Some(Id::from("u-2")),
      changed_by_name:    Some("Dr. Alves".into()),
      comment:            Some("Treatment plan signed".into()),
      created_at:         now - Duration::hours(1),
    },
  ];

  let notifications = vec![
    Notification {
      kind: NotificationType::HotLead,
      title: Some("Hot lead waiting".into()),
      related_entity: Some(RelatedEntity {
        kind: "lead".into(),
        id:   Id::from("101"),
      }),
      ..notification("n-1", Priority::Critical, 2)
    },
    Notification {
      kind: NotificationType::Unanswered,
      title: Some("Unanswered message".into()),
      ..notification("n-2", Priority::High, 15)
    },
    Notification {
      kind: NotificationType::Followup,
      title: Some("Follow-up due".into()),
      ..notification("n-3", Priority::Medium, 60)
    },
    Notification {
      kind: NotificationType::PerformanceAlert,
      read: true,
      title: Some("Weekly summary".into()),
      ..notification("n-4", Priority::Low, 600)
    },
  ];

  Backend {
    notifications,
    statuses,
    leads,
    history,
  }
}
