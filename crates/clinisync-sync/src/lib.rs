//! Client-side state synchronisation for the notification inbox and the lead
//! workflow.
//!
//! Both engines keep read-through caches of server-owned data, apply
//! optimistic overlays for the fields the user mutates, and confirm or roll
//! those overlays back once the server answers. Neither engine knows which
//! channel delivered an update; they see a
//! [`Transport`](clinisync_core::transport::Transport).

pub mod cache;
pub mod inbox;
pub mod leads;
pub mod notifications;
pub mod scope;

pub use cache::{CacheStore, Lookup, Patched, QueryState};
pub use leads::{LeadQuery, LeadWorkflow};
pub use notifications::{ListOptions, NotificationSync, SyncSettings, TransportMode};
pub use scope::ViewScope;

#[cfg(test)]
mod tests;
