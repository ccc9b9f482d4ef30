//! Lifetime of one consuming view.
//!
//! A [`ViewScope`] owns the push-handler registrations and background timers
//! a view started. Closing it (or dropping it) unregisters the handlers and
//! stops the timers. Requests already in flight are left to finish; their
//! results may still land in the shared cache, but code that touches
//! view-local state checks [`ViewScope::is_mounted`] first.

use clinisync_core::push::Subscription;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Default)]
pub struct ViewScope {
  token:         CancellationToken,
  subscriptions: Mutex<Vec<Subscription>>,
}

impl ViewScope {
  pub fn new() -> Self { Self::default() }

  /// Keep `subscription` registered until the scope closes.
  pub fn hold(&self, subscription: Subscription) {
    if self.token.is_cancelled() {
      // Already torn down; dropping unregisters immediately.
      return;
    }
    self.subscriptions.lock().push(subscription);
  }

  /// Token cancelled when the scope closes. Background tasks select on it.
  pub fn token(&self) -> CancellationToken { self.token.child_token() }

  pub fn is_mounted(&self) -> bool { !self.token.is_cancelled() }

  /// Run `f` only while the view is still mounted.
  pub fn if_mounted<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
    self.is_mounted().then(f)
  }

  pub fn close(&self) {
    if self.token.is_cancelled() {
      return;
    }
    self.token.cancel();
    let subs = std::mem::take(&mut *self.subscriptions.lock());
    debug!(handlers = subs.len(), "view scope closed");
    drop(subs);
  }
}

impl Drop for ViewScope {
  fn drop(&mut self) { self.close(); }
}
