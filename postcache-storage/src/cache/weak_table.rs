//! Weak-keyed concurrent cache table.
//!
//! Entries are keyed by post id and hold only a `Weak` reference to the key
//! instance that stored them. An entry lives exactly as long as someone
//! outside the table holds a handle to that key instance; after that it is
//! removed the next time the table drains its reclamation channel.
//!
//! # Reclamation
//!
//! - Dropping the last handle of a stored key queues a notice on the table's
//!   channel ([`super::key`]).
//! - `put`, `len`, `is_empty`, `keys` and `purge_unreachable` drain the
//!   channel before doing their work.
//! - `get` treats an entry whose key no longer upgrades as a miss and removes
//!   it on the spot.
//!
//! Callers must treat every lookup as a possible miss, including for keys
//! they inserted a moment ago.
//!
//! # Concurrency
//!
//! Backed by a sharded `DashMap`, so lookups only contend with writers that
//! hash to the same shard. No shard lock is ever held while a key handle is
//! dropped or while the reclamation channel is locked.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, TryLockError};

use dashmap::DashMap;
use postcache_core::{PostId, Timestamp};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::key::{CacheKey, ReclaimNotice, ReclaimSender, WeakKey};

struct Entry<V> {
    handle: WeakKey,
    serial: u64,
    created_at: Timestamp,
    value: Arc<V>,
}

struct TableInner<V> {
    entries: DashMap<PostId, Entry<V>>,
    reclaim_tx: ReclaimSender,
    reclaim_rx: Mutex<UnboundedReceiver<ReclaimNotice>>,
    reclaimed: AtomicU64,
}

/// Concurrent map from [`CacheKey`] to values with weak key retention.
///
/// Cloning the table is cheap and yields another handle to the same entries.
pub struct WeakCacheTable<V> {
    inner: Arc<TableInner<V>>,
}

impl<V> WeakCacheTable<V> {
    /// Create an empty table.
    pub fn new() -> Self {
        let (reclaim_tx, reclaim_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(TableInner {
                entries: DashMap::new(),
                reclaim_tx,
                reclaim_rx: Mutex::new(reclaim_rx),
                reclaimed: AtomicU64::new(0),
            }),
        }
    }

    /// Insert `value` under `key`, replacing any entry with an equal key.
    ///
    /// The table does not retain `key`; the entry survives only while the
    /// caller (or someone it hands the key to) keeps a handle.
    pub fn put(&self, key: &CacheKey, value: impl Into<Arc<V>>) {
        self.drain_reclaimed();
        key.attach(&self.inner.reclaim_tx);
        let entry = Entry {
            handle: key.downgrade(),
            serial: key.serial(),
            created_at: key.created_at(),
            value: value.into(),
        };
        self.inner.entries.insert(key.id(), entry);
    }

    /// Look up the value stored under a key equal to `key`.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        let id = key.id();
        let stale_serial = {
            let entry = self.inner.entries.get(&id)?;
            if entry.handle.is_live() {
                return Some(Arc::clone(&entry.value));
            }
            entry.serial
        };
        self.expunge(id, stale_serial);
        None
    }

    /// Look up by bare id, returning the stored key handle with the value.
    ///
    /// The returned key keeps the entry alive for as long as it is held.
    pub fn get_entry(&self, id: PostId) -> Option<(CacheKey, Arc<V>)> {
        let stale_serial = {
            let entry = self.inner.entries.get(&id)?;
            match entry.handle.upgrade() {
                Some(key) => return Some((key, Arc::clone(&entry.value))),
                None => entry.serial,
            }
        };
        self.expunge(id, stale_serial);
        None
    }

    /// Remove the entry stored under a key equal to `key`.
    ///
    /// Removing an absent key is a no-op.
    pub fn remove(&self, key: &CacheKey) -> Option<Arc<V>> {
        self.inner
            .entries
            .remove(&key.id())
            .map(|(_, entry)| entry.value)
    }

    /// Remove the entry only if it was stored by this exact key instance.
    ///
    /// Returns false if the entry is gone or was replaced by another instance
    /// with the same id.
    pub fn remove_exact(&self, key: &CacheKey) -> bool {
        let serial = key.serial();
        self.inner
            .entries
            .remove_if(&key.id(), |_, entry| entry.serial == serial)
            .is_some()
    }

    /// Number of entries after applying pending reclamation notices.
    pub fn len(&self) -> usize {
        self.drain_reclaimed();
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drain_reclaimed();
        self.inner.entries.is_empty()
    }

    /// Snapshot of the keys of all live entries.
    ///
    /// Each id appears at most once. The snapshot holds strong handles, so
    /// the listed entries cannot be reclaimed while it is alive; they can
    /// still be removed explicitly.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.drain_reclaimed();
        let mut live = Vec::with_capacity(self.inner.entries.len());
        let mut stale = Vec::new();
        for entry in self.inner.entries.iter() {
            match entry.handle.upgrade() {
                Some(key) => live.push(key),
                None => stale.push((*entry.key(), entry.serial)),
            }
        }
        for (id, serial) in stale {
            self.expunge(id, serial);
        }
        live
    }

    /// Creation time of the stored key for `id`, if any entry exists.
    pub fn created_at(&self, id: PostId) -> Option<Timestamp> {
        self.inner.entries.get(&id).map(|entry| entry.created_at)
    }

    /// Apply queued reclamation notices. Returns the number of entries removed.
    ///
    /// Skips the drain when another caller is already draining.
    pub fn drain_reclaimed(&self) -> usize {
        let mut rx = match self.inner.reclaim_rx.try_lock() {
            Ok(rx) => rx,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return 0,
        };
        let mut removed = 0;
        while let Ok(notice) = rx.try_recv() {
            if self.expunge(notice.id, notice.serial) {
                removed += 1;
            }
        }
        removed
    }

    /// Remove every entry whose key instance is no longer referenced.
    ///
    /// Full scan; does not wait for notices to arrive.
    pub fn purge_unreachable(&self) -> usize {
        let mut removed = self.drain_reclaimed();
        let mut purged = 0usize;
        self.inner.entries.retain(|_, entry| {
            let live = entry.handle.is_live();
            if !live {
                purged += 1;
            }
            live
        });
        if purged > 0 {
            self.inner
                .reclaimed
                .fetch_add(purged as u64, Ordering::Relaxed);
        }
        removed += purged;
        removed
    }

    /// Total entries removed because their key became unreachable.
    pub fn reclaimed_count(&self) -> u64 {
        self.inner.reclaimed.load(Ordering::Relaxed)
    }

    fn expunge(&self, id: PostId, serial: u64) -> bool {
        let removed = self
            .inner
            .entries
            .remove_if(&id, |_, entry| entry.serial == serial && !entry.handle.is_live())
            .is_some();
        if removed {
            self.inner.reclaimed.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }
}

impl<V> Clone for WeakCacheTable<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for WeakCacheTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> fmt::Debug for WeakCacheTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCacheTable")
            .field("entries", &self.inner.entries.len())
            .field("reclaimed", &self.reclaimed_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use postcache_core::Post;

    fn post(id: i64) -> Post {
        Post::new(id, format!("post {id}"))
    }

    /// Poll `condition` for up to a second; reclamation is eventual.
    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_put_get_while_key_held() {
        let table = WeakCacheTable::new();
        let key = CacheKey::new(1);
        table.put(&key, post(1));

        let hit = table.get(&key).unwrap();
        assert_eq!(hit.id, PostId::new(1));
        assert_eq!(table.len(), 1);
        assert!(!table.is_empty());
    }

    #[test]
    fn test_equal_key_finds_entry() {
        let table = WeakCacheTable::new();
        let stored = CacheKey::new(1);
        table.put(&stored, post(1));

        let lookup = CacheKey::new(1);
        assert!(table.get(&lookup).is_some());
        assert!(table.get(&CacheKey::new(2)).is_none());
    }

    #[test]
    fn test_dropping_key_reclaims_entry() {
        let table: WeakCacheTable<Post> = WeakCacheTable::new();
        let key = CacheKey::new(1);
        table.put(&key, post(1));
        assert_eq!(table.len(), 1);

        drop(key);
        assert!(wait_for(|| table.is_empty()));
        assert_eq!(table.reclaimed_count(), 1);
    }

    #[test]
    fn test_get_after_drop_is_miss() {
        let table = WeakCacheTable::new();
        let key = CacheKey::new(1);
        table.put(&key, post(1));
        drop(key);

        // A fresh lookup with the same id cannot revive the entry.
        assert!(table.get(&CacheKey::new(1)).is_none());
        assert!(table.get_entry(PostId::new(1)).is_none());
    }

    #[test]
    fn test_put_replaces_equal_key() {
        let table = WeakCacheTable::new();
        let first = CacheKey::new(1);
        let second = CacheKey::new(1);
        table.put(&first, Post::new(1, "old"));
        table.put(&second, Post::new(1, "new"));

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&first).unwrap().content, "new");

        let (stored, _) = table.get_entry(PostId::new(1)).unwrap();
        assert!(stored.same_instance(&second));
    }

    #[test]
    fn test_stale_notice_does_not_remove_replacement() {
        let table = WeakCacheTable::new();
        let first = CacheKey::new(1);
        table.put(&first, Post::new(1, "old"));
        let second = CacheKey::new(1);
        table.put(&second, Post::new(1, "new"));

        drop(first);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&second).unwrap().content, "new");

        drop(second);
        assert!(wait_for(|| table.is_empty()));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let table = WeakCacheTable::new();
        let held = CacheKey::new(1);
        table.put(&held, post(1));

        assert!(table.remove(&CacheKey::new(99)).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_explicit() {
        let table = WeakCacheTable::new();
        let key = CacheKey::new(1);
        table.put(&key, post(1));

        let removed = table.remove(&key).unwrap();
        assert_eq!(removed.id, PostId::new(1));
        assert!(table.get(&key).is_none());
        assert!(table.is_empty());
        assert_eq!(table.reclaimed_count(), 0);
    }

    #[test]
    fn test_remove_exact_respects_instance() {
        let table = WeakCacheTable::new();
        let first = CacheKey::new(1);
        table.put(&first, post(1));
        let second = CacheKey::new(1);
        table.put(&second, post(1));

        assert!(!table.remove_exact(&first));
        assert_eq!(table.len(), 1);
        assert!(table.remove_exact(&second));
        assert!(table.is_empty());
        assert!(!table.remove_exact(&second));
    }

    #[test]
    fn test_keys_snapshot_lists_live_entries() {
        let table = WeakCacheTable::new();
        let k1 = CacheKey::new(1);
        let k2 = CacheKey::new(2);
        let k3 = CacheKey::new(3);
        for key in [&k1, &k2, &k3] {
            table.put(key, post(key.id().as_i64()));
        }
        drop(k2);

        let mut ids: Vec<i64> = table.keys().iter().map(|k| k.id().as_i64()).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_keys_snapshot_keeps_entries_alive() {
        let table = WeakCacheTable::new();
        let key = CacheKey::new(1);
        table.put(&key, post(1));

        let snapshot = table.keys();
        drop(key);
        assert_eq!(table.len(), 1);

        drop(snapshot);
        assert!(wait_for(|| table.is_empty()));
    }

    #[test]
    fn test_created_at_reports_stored_instance() {
        let table = WeakCacheTable::new();
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let key = CacheKey::with_created_at(4, t0);
        table.put(&key, post(4));

        assert_eq!(table.created_at(PostId::new(4)), Some(t0));
        assert_eq!(table.created_at(PostId::new(5)), None);

        let newer = CacheKey::with_created_at(4, t0 + Duration::seconds(1));
        table.put(&newer, post(4));
        assert_eq!(
            table.created_at(PostId::new(4)),
            Some(t0 + Duration::seconds(1))
        );
    }

    #[test]
    fn test_shared_key_reclaims_in_every_table() {
        let first: WeakCacheTable<Post> = WeakCacheTable::new();
        let second: WeakCacheTable<Post> = WeakCacheTable::new();
        let key = CacheKey::new(1);
        first.put(&key, post(1));
        second.put(&key, post(1));
        drop(key);

        assert!(wait_for(|| first.is_empty()));
        assert!(wait_for(|| second.is_empty()));
        assert_eq!(first.reclaimed_count(), 1);
        assert_eq!(second.reclaimed_count(), 1);
    }

    #[test]
    fn test_key_outliving_its_first_table() {
        let key = CacheKey::new(1);
        {
            let first: WeakCacheTable<Post> = WeakCacheTable::new();
            first.put(&key, post(1));
        }

        let second: WeakCacheTable<Post> = WeakCacheTable::new();
        second.put(&key, post(1));
        assert_eq!(key.attached_tables(), 1);
        drop(key);

        assert!(wait_for(|| second.is_empty()));
    }

    #[test]
    fn test_purge_removes_dead_entries() {
        let table: WeakCacheTable<Post> = WeakCacheTable::new();
        let kept = CacheKey::new(1);
        let dropped = CacheKey::new(2);
        table.put(&kept, post(1));
        table.put(&dropped, post(2));
        drop(dropped);

        assert_eq!(table.purge_unreachable(), 1);
        assert_eq!(table.len(), 1);
        assert!(table.get(&kept).is_some());
    }

    #[test]
    fn test_clones_share_entries() {
        let table = WeakCacheTable::new();
        let view = table.clone();
        let key = CacheKey::new(1);
        table.put(&key, post(1));

        assert!(view.get(&key).is_some());
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_concurrent_put_get_remove() {
        use std::thread;

        let table: WeakCacheTable<Post> = WeakCacheTable::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let table = table.clone();
                thread::spawn(move || {
                    let mut held = Vec::new();
                    for i in 0..100 {
                        let id = t * 100 + i;
                        let key = CacheKey::new(id);
                        table.put(&key, post(id));
                        assert!(table.get(&key).is_some());
                        if i % 2 == 0 {
                            table.remove(&key);
                        } else {
                            held.push(key);
                        }
                        let _ = table.keys();
                    }
                    held
                })
            })
            .collect();

        let held: Vec<CacheKey> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(table.len(), held.len());

        drop(held);
        assert!(wait_for(|| table.is_empty()));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use postcache_core::Post;
    use proptest::prelude::*;
    use std::collections::HashSet;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Property: after dropping a subset of keys, exactly the held ids remain.
        #[test]
        fn prop_only_held_keys_survive(
            ids in proptest::collection::hash_set(0i64..500, 1..40),
            drop_mask in proptest::collection::vec(any::<bool>(), 40)
        ) {
            let table: WeakCacheTable<Post> = WeakCacheTable::new();
            let mut held = Vec::new();
            let mut expected = HashSet::new();

            for (i, id) in ids.iter().enumerate() {
                let key = CacheKey::new(*id);
                table.put(&key, Post::new(*id, "x"));
                if !drop_mask[i] {
                    expected.insert(*id);
                    held.push(key);
                }
            }

            prop_assert_eq!(table.len(), expected.len());
            let actual: HashSet<i64> = table.keys().iter().map(|k| k.id().as_i64()).collect();
            prop_assert_eq!(actual, expected);
        }

        /// Property: removing absent ids never changes the size.
        #[test]
        fn prop_remove_absent_keeps_size(
            stored in proptest::collection::hash_set(0i64..100, 0..20),
            lookup in 100i64..200
        ) {
            let table: WeakCacheTable<Post> = WeakCacheTable::new();
            let held: Vec<CacheKey> = stored.iter().map(|id| CacheKey::new(*id)).collect();
            for key in &held {
                table.put(key, Post::new(key.id(), "x"));
            }

            let before = table.len();
            prop_assert!(table.remove(&CacheKey::new(lookup)).is_none());
            prop_assert_eq!(table.len(), before);
        }
    }
}
