//! [`CacheStore`]: a keyed, typed cache with per-entry freshness.
//!
//! One store holds one resource kind. Keys are `:`-separated paths
//! (`leads:42:transitions`) so a prefix addresses a family of entries.
//!
//! Writes are synchronous and happen under a short lock that is never held
//! across an `.await`; a reader sees either the value before a patch or the
//! value after it, never a half-applied one. Fetches for the same key are
//! deduplicated: a second reader while a fetch is in flight awaits the same
//! result instead of issuing another request.

use std::{collections::HashMap, future::Future, time::Duration};

use clinisync_core::{Error, Result};
use futures::{
  FutureExt,
  future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

type Pending<V> = Shared<BoxFuture<'static, Result<V>>>;

// ─── Read results ────────────────────────────────────────────────────────────

/// Result of a synchronous [`CacheStore::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
  Fresh(V),
  /// Present but past its freshness window or explicitly invalidated.
  Stale(V),
  Absent,
}

impl<V> Lookup<V> {
  pub fn value(self) -> Option<V> {
    match self {
      Self::Fresh(v) | Self::Stale(v) => Some(v),
      Self::Absent => None,
    }
  }

  pub fn is_fresh(&self) -> bool { matches!(self, Self::Fresh(_)) }
}

/// What a view should render for a key: last-known data plus whether the
/// latest refresh failed.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<V> {
  pub data:     Option<V>,
  pub error:    Option<Error>,
  pub stale:    bool,
  pub fetching: bool,
}

/// Token returned by [`CacheStore::patch`]; hand it to
/// [`CacheStore::restore`] to undo the patch.
#[derive(Debug, Clone)]
pub struct Patched<V> {
  key:      String,
  previous: V,
  version:  u64,
}

impl<V> Patched<V> {
  pub fn key(&self) -> &str { &self.key }

  pub fn previous(&self) -> &V { &self.previous }
}

// ─── Store ───────────────────────────────────────────────────────────────────

struct Entry<V> {
  value:       Option<V>,
  stored_at:   Instant,
  stale_after: Duration,
  invalidated: bool,
  error:       Option<Error>,
  /// Bumped by every wholesale `set`; patches keep it.
  version:     u64,
}

impl<V> Entry<V> {
  fn is_fresh(&self) -> bool {
    !self.invalidated && self.stored_at.elapsed() < self.stale_after
  }
}

pub struct CacheStore<V> {
  name:      &'static str,
  entries:   Mutex<HashMap<String, Entry<V>>>,
  in_flight: Mutex<HashMap<String, Pending<V>>>,
  versions:  Mutex<u64>,
}

impl<V> CacheStore<V>
where
  V: Clone + Send + Sync + 'static,
{
  /// `name` only labels log lines.
  pub fn new(name: &'static str) -> Self {
    Self {
      name,
      entries: Mutex::new(HashMap::new()),
      in_flight: Mutex::new(HashMap::new()),
      versions: Mutex::new(0),
    }
  }

  fn next_version(&self) -> u64 {
    let mut v = self.versions.lock();
    *v += 1;
    *v
  }

  pub fn get(&self, key: &str) -> Lookup<V> {
    let entries = self.entries.lock();
    let Some(entry) = entries.get(key) else {
      return Lookup::Absent;
    };
    match &entry.value {
      Some(v) if entry.is_fresh() => Lookup::Fresh(v.clone()),
      Some(v) => Lookup::Stale(v.clone()),
      None => Lookup::Absent,
    }
  }

  /// Replace the value wholesale and clear any error flag.
  pub fn set(&self, key: &str, value: V, stale_after: Duration) {
    let version = self.next_version();
    self.entries.lock().insert(key.to_owned(), Entry {
      value: Some(value),
      stored_at: Instant::now(),
      stale_after,
      invalidated: false,
      error: None,
      version,
    });
  }

  /// Mark every entry whose key starts with `prefix` for refetch on next
  /// read. Values stay readable as stale. Fetches already in flight for those
  /// keys are detached so their results are not written back.
  pub fn invalidate(&self, prefix: &str) -> usize {
    let mut hit = 0;
    for (key, entry) in self.entries.lock().iter_mut() {
      if key.starts_with(prefix) {
        entry.invalidated = true;
        hit += 1;
      }
    }
    self.in_flight.lock().retain(|key, _| !key.starts_with(prefix));
    debug!(cache = self.name, prefix, entries = hit, "invalidated");
    hit
  }

  /// Apply `f` to the cached value in place.
  ///
  /// Returns `None` when there is no value under `key`.
  pub fn patch(&self, key: &str, f: impl FnOnce(&mut V)) -> Option<Patched<V>> {
    let mut entries = self.entries.lock();
    let entry = entries.get_mut(key)?;
    let value = entry.value.as_mut()?;
    let previous = value.clone();
    f(value);
    Some(Patched {
      key: key.to_owned(),
      previous,
      version: entry.version,
    })
  }

  /// Apply `f` to every value under `prefix`. `f` returns whether it changed
  /// anything; only changed entries are committed and reported.
  pub fn patch_matching(
    &self,
    prefix: &str,
    mut f: impl FnMut(&str, &mut V) -> bool,
  ) -> Vec<Patched<V>> {
    let mut patched = Vec::new();
    for (key, entry) in self.entries.lock().iter_mut() {
      if !key.starts_with(prefix) {
        continue;
      }
      let Some(value) = entry.value.as_mut() else { continue };
      let mut next = value.clone();
      if f(key, &mut next) {
        patched.push(Patched {
          key:      key.clone(),
          previous: std::mem::replace(value, next),
          version:  entry.version,
        });
      }
    }
    patched
  }

  /// Put back the pre-patch snapshot.
  ///
  /// Skipped (returns `false`) when the entry was replaced wholesale since
  /// the patch, so a rollback never overwrites newer server data.
  pub fn restore(&self, patched: Patched<V>) -> bool {
    let mut entries = self.entries.lock();
    match entries.get_mut(&patched.key) {
      Some(entry) if entry.version == patched.version => {
        entry.value = Some(patched.previous);
        true
      }
      _ => {
        debug!(cache = self.name, key = %patched.key, "restore skipped; entry replaced");
        false
      }
    }
  }

  /// Apply `f` to the entry `patched` came from, keeping any patches made
  /// after it. Skipped like [`restore`](Self::restore) when the entry was
  /// replaced wholesale since.
  pub fn amend(&self, patched: &Patched<V>, f: impl FnOnce(&mut V)) -> bool {
    let mut entries = self.entries.lock();
    match entries.get_mut(&patched.key) {
      Some(Entry {
        value: Some(value),
        version,
        ..
      }) if *version == patched.version => {
        f(value);
        true
      }
      _ => {
        debug!(cache = self.name, key = %patched.key, "amend skipped; entry replaced");
        false
      }
    }
  }

  pub fn keys(&self, prefix: &str) -> Vec<String> {
    self
      .entries
      .lock()
      .keys()
      .filter(|k| k.starts_with(prefix))
      .cloned()
      .collect()
  }

  pub fn query(&self, key: &str) -> QueryState<V> {
    let fetching = self.in_flight.lock().contains_key(key);
    let entries = self.entries.lock();
    match entries.get(key) {
      Some(e) => QueryState {
        data: e.value.clone(),
        error: e.error.clone(),
        stale: !e.is_fresh(),
        fetching,
      },
      None => QueryState {
        data: None,
        error: None,
        stale: true,
        fetching,
      },
    }
  }

  /// Flag the entry as failed without touching its value.
  pub fn record_error(&self, key: &str, error: Error) {
    let mut entries = self.entries.lock();
    match entries.get_mut(key) {
      Some(entry) => entry.error = Some(error),
      None => {
        entries.insert(key.to_owned(), Entry {
          value:       None,
          stored_at:   Instant::now(),
          stale_after: Duration::ZERO,
          invalidated: true,
          error:       Some(error),
          version:     0,
        });
      }
    }
  }

  /// Read-through: return the fresh value, or run `fetcher` (deduplicated
  /// per key) and store its result.
  ///
  /// On failure the error is recorded on the entry and returned; any
  /// previous value stays in place.
  pub async fn fetch<F, Fut>(&self, key: &str, stale_after: Duration, fetcher: F) -> Result<V>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>> + Send + 'static,
  {
    if let Lookup::Fresh(v) = self.get(key) {
      debug!(cache = self.name, key, "hit");
      return Ok(v);
    }

    let pending = {
      let mut in_flight = self.in_flight.lock();
      match in_flight.get(key) {
        Some(p) => {
          debug!(cache = self.name, key, "joining in-flight fetch");
          p.clone()
        }
        None => {
          debug!(cache = self.name, key, "miss");
          let p = fetcher().boxed().shared();
          in_flight.insert(key.to_owned(), p.clone());
          p
        }
      }
    };

    let result = pending.clone().await;

    // Whoever retires the in-flight entry writes the result. Nobody does if
    // the key was invalidated meanwhile.
    let owner = {
      let mut in_flight = self.in_flight.lock();
      match in_flight.get(key) {
        Some(p) if p.ptr_eq(&pending) => {
          in_flight.remove(key);
          true
        }
        _ => false,
      }
    };
    if owner {
      match &result {
        Ok(v) => self.set(key, v.clone(), stale_after),
        Err(e) => self.record_error(key, e.clone()),
      }
    }
    result
  }

  /// [`fetch`](Self::fetch), but a failed refresh falls back to the last
  /// known value when there is one. The error stays visible through
  /// [`query`](Self::query).
  pub async fn read_through<F, Fut>(
    &self,
    key: &str,
    stale_after: Duration,
    fetcher: F,
  ) -> Result<V>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>> + Send + 'static,
  {
    match self.fetch(key, stale_after, fetcher).await {
      Ok(v) => Ok(v),
      Err(e) => match self.get(key).value() {
        Some(v) => {
          warn!(cache = self.name, key, error = %e, "refresh failed; serving last known value");
          Ok(v)
        }
        None => Err(e),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  use tokio::sync::oneshot;

  use super::*;

  const MINUTE: Duration = Duration::from_secs(60);

  #[tokio::test]
  async fn concurrent_reads_share_one_fetch() {
    let cache = Arc::new(CacheStore::<u32>::new("test"));
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = oneshot::channel::<u32>();
    let rx = rx.shared();

    let fetch = |cache: Arc<CacheStore<u32>>| {
      let calls = calls.clone();
      let rx = rx.clone();
      async move {
        cache
          .fetch("k", MINUTE, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            rx.await.map_err(|_| Error::Network("dropped".into()))
          })
          .await
      }
    };

    let a = tokio::spawn(fetch(cache.clone()));
    let b = tokio::spawn(fetch(cache.clone()));
    tokio::task::yield_now().await;
    tx.send(7).unwrap();

    assert_eq!(a.await.unwrap().unwrap(), 7);
    assert_eq!(b.await.unwrap().unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("k"), Lookup::Fresh(7));
  }

  #[tokio::test]
  async fn invalidate_forces_refetch_by_prefix() {
    let cache = CacheStore::<u32>::new("test");
    cache.set("leads:list:a", 1, MINUTE);
    cache.set("leads:list:b", 2, MINUTE);
    cache.set("leads:7:detail", 3, MINUTE);

    assert_eq!(cache.invalidate("leads:list:"), 2);
    assert_eq!(cache.get("leads:list:a"), Lookup::Stale(1));
    assert_eq!(cache.get("leads:7:detail"), Lookup::Fresh(3));

    let v = cache.fetch("leads:list:a", MINUTE, || async { Ok(10) }).await.unwrap();
    assert_eq!(v, 10);
    assert_eq!(cache.get("leads:list:a"), Lookup::Fresh(10));
  }

  #[tokio::test(start_paused = true)]
  async fn entries_go_stale_after_window() {
    let cache = CacheStore::<u32>::new("test");
    cache.set("k", 1, Duration::from_secs(5));
    assert!(cache.get("k").is_fresh());
    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(cache.get("k"), Lookup::Stale(1));
  }

  #[test]
  fn restore_undoes_patch() {
    let cache = CacheStore::<Vec<u32>>::new("test");
    cache.set("k", vec![1, 2], MINUTE);
    let token = cache.patch("k", |v| v.push(3)).unwrap();
    assert_eq!(cache.get("k").value().unwrap(), vec![1, 2, 3]);

    assert!(cache.restore(token));
    assert_eq!(cache.get("k").value().unwrap(), vec![1, 2]);
  }

  #[test]
  fn restore_skips_entries_replaced_since_patch() {
    let cache = CacheStore::<u32>::new("test");
    cache.set("k", 5, MINUTE);
    let token = cache.patch("k", |v| *v -= 1).unwrap();
    cache.set("k", 9, MINUTE);

    assert!(!cache.restore(token));
    assert_eq!(cache.get("k").value(), Some(9));
  }

  #[test]
  fn amend_keeps_later_patches() {
    let cache = CacheStore::<u32>::new("test");
    cache.set("k", 2, MINUTE);
    let first = cache.patch("k", |v| *v -= 1).unwrap();
    cache.patch("k", |v| *v -= 1).unwrap();

    assert!(cache.amend(&first, |v| *v += 1));
    assert_eq!(cache.get("k").value(), Some(1));

    cache.set("k", 9, MINUTE);
    assert!(!cache.amend(&first, |v| *v += 1));
    assert_eq!(cache.get("k").value(), Some(9));
  }

  #[test]
  fn patch_on_missing_key_is_none() {
    let cache = CacheStore::<u32>::new("test");
    assert!(cache.patch("nope", |v| *v += 1).is_none());
  }

  #[test]
  fn patch_matching_commits_only_changed_entries() {
    let cache = CacheStore::<u32>::new("test");
    cache.set("n:1", 1, MINUTE);
    cache.set("n:2", 2, MINUTE);
    cache.set("m:1", 1, MINUTE);

    let patched = cache.patch_matching("n:", |_, v| {
      if *v == 1 {
        *v = 100;
        true
      } else {
        false
      }
    });
    assert_eq!(patched.len(), 1);
    assert_eq!(patched[0].key(), "n:1");
    assert_eq!(cache.get("n:1").value(), Some(100));
    assert_eq!(cache.get("m:1").value(), Some(1));
  }

  #[tokio::test]
  async fn failed_refresh_keeps_stale_value_and_flags_error() {
    let cache = CacheStore::<u32>::new("test");
    cache.set("k", 4, Duration::ZERO);

    let v = cache
      .read_through("k", MINUTE, || async { Err(Error::Timeout) })
      .await
      .unwrap();
    assert_eq!(v, 4);

    let state = cache.query("k");
    assert_eq!(state.data, Some(4));
    assert_eq!(state.error, Some(Error::Timeout));
    assert!(state.stale);
  }

  #[tokio::test]
  async fn failed_first_read_surfaces_error() {
    let cache = CacheStore::<u32>::new("test");
    let err = cache
      .read_through("k", MINUTE, || async { Err(Error::Network("refused".into())) })
      .await
      .unwrap_err();
    assert_eq!(err.kind(), clinisync_core::ErrorKind::Network);
    assert_eq!(cache.query("k").error, Some(err));
  }

  #[tokio::test]
  async fn invalidation_during_fetch_discards_result() {
    let cache = Arc::new(CacheStore::<u32>::new("test"));
    let (tx, rx) = oneshot::channel::<u32>();

    let reader = {
      let cache = cache.clone();
      tokio::spawn(async move {
        cache
          .fetch("k", MINUTE, move || async move {
            rx.await.map_err(|_| Error::Network("dropped".into()))
          })
          .await
      })
    };
    tokio::task::yield_now().await;
    cache.invalidate("k");
    tx.send(1).unwrap();

    assert_eq!(reader.await.unwrap().unwrap(), 1);
    assert_eq!(cache.get("k"), Lookup::Absent);
  }
}
