//! Cache key handles with reference-count reclamation.
//!
//! A [`CacheKey`] is a cheap, cloneable handle. Clones share one identity; the
//! table only keeps a `Weak` reference to it. When the last handle of a key
//! instance that was stored in a table is dropped, the key posts a
//! [`ReclaimNotice`] on the channel of every table that stored it. Tables
//! drain their channel lazily, so reclamation is eventual rather than
//! synchronous with the drop.
//!
//! The drop hook only sends `(id, serial)` on a channel. It cannot carry
//! caller-supplied code.

use postcache_core::{now, PostId, Timestamp};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc::UnboundedSender;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Sent when the last handle of a stored key instance goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReclaimNotice {
    pub(crate) id: PostId,
    pub(crate) serial: u64,
}

pub(crate) type ReclaimSender = UnboundedSender<ReclaimNotice>;

struct KeyInner {
    id: PostId,
    created_at: Timestamp,
    serial: u64,
    /// One sender per table that stored this instance.
    reclaim: Mutex<Vec<ReclaimSender>>,
}

impl Drop for KeyInner {
    fn drop(&mut self) {
        let notice = ReclaimNotice {
            id: self.id,
            serial: self.serial,
        };
        let senders = self.reclaim.get_mut().unwrap_or_else(PoisonError::into_inner);
        for tx in senders.iter() {
            // A table that is already gone has nothing left to clean up.
            let _ = tx.send(notice);
        }
    }
}

/// Identifier of a cached post plus the moment the key was created.
///
/// Equality and hashing use the id only: two keys with the same id and
/// different `created_at` are interchangeable for lookup. `created_at` orders
/// eviction for whichever instance is actually stored.
#[derive(Clone)]
pub struct CacheKey {
    inner: Arc<KeyInner>,
}

impl CacheKey {
    /// Key for `id` stamped with the current time.
    pub fn new(id: impl Into<PostId>) -> Self {
        Self::with_created_at(id, now())
    }

    /// Key for `id` with an explicit creation time.
    pub fn with_created_at(id: impl Into<PostId>, created_at: Timestamp) -> Self {
        Self {
            inner: Arc::new(KeyInner {
                id: id.into(),
                created_at,
                serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
                reclaim: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> PostId {
        self.inner.id
    }

    pub fn created_at(&self) -> Timestamp {
        self.inner.created_at
    }

    /// Sweep order: oldest first, ascending id on equal timestamps.
    pub fn eviction_order(&self) -> (Timestamp, PostId) {
        (self.inner.created_at, self.inner.id)
    }

    /// True when both handles point at the same key instance.
    pub fn same_instance(&self, other: &CacheKey) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles to this key instance.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub(crate) fn serial(&self) -> u64 {
        self.inner.serial
    }

    pub(crate) fn downgrade(&self) -> WeakKey {
        WeakKey(Arc::downgrade(&self.inner))
    }

    /// Also send this instance's reclamation notice to `tx`.
    ///
    /// Attaching the same table twice is a no-op. Senders of dropped tables
    /// are pruned here.
    pub(crate) fn attach(&self, tx: &ReclaimSender) {
        let mut senders = self
            .inner
            .reclaim
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        senders.retain(|existing| !existing.is_closed());
        if !senders.iter().any(|existing| existing.same_channel(tx)) {
            senders.push(tx.clone());
        }
    }

    /// Number of live tables this instance will notify.
    #[cfg(test)]
    pub(crate) fn attached_tables(&self) -> usize {
        self.inner
            .reclaim
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKey")
            .field("id", &self.inner.id)
            .field("created_at", &self.inner.created_at)
            .finish()
    }
}

/// Non-owning reference to a key instance, held by the table.
pub(crate) struct WeakKey(Weak<KeyInner>);

impl WeakKey {
    pub(crate) fn upgrade(&self) -> Option<CacheKey> {
        self.0.upgrade().map(|inner| CacheKey { inner })
    }

    pub(crate) fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    #[test]
    fn test_equality_ignores_created_at() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = CacheKey::with_created_at(1, t0);
        let b = CacheKey::with_created_at(1, t0 + Duration::seconds(5));
        let c = CacheKey::with_created_at(2, t0);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.same_instance(&b));

        let set: HashSet<CacheKey> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_clones_share_identity() {
        let key = CacheKey::new(7);
        let clone = key.clone();
        assert!(key.same_instance(&clone));
        assert_eq!(key.serial(), clone.serial());
        assert_eq!(key.handle_count(), 2);
        drop(clone);
        assert_eq!(key.handle_count(), 1);
    }

    #[test]
    fn test_eviction_order_breaks_ties_by_id() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let low = CacheKey::with_created_at(1, t0);
        let high = CacheKey::with_created_at(2, t0);
        let older = CacheKey::with_created_at(9, t0 - Duration::seconds(1));

        assert!(low.eviction_order() < high.eviction_order());
        assert!(older.eviction_order() < low.eviction_order());
    }

    #[test]
    fn test_last_drop_sends_notice() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let key = CacheKey::new(3);
        let serial = key.serial();
        key.attach(&tx);

        let clone = key.clone();
        drop(key);
        assert!(rx.try_recv().is_err(), "notice only after the last handle");

        drop(clone);
        let notice = rx.try_recv().unwrap();
        assert_eq!(
            notice,
            ReclaimNotice {
                id: PostId::new(3),
                serial
            }
        );
    }

    #[test]
    fn test_unattached_key_sends_nothing() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<ReclaimNotice>();
        drop(CacheKey::new(4));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_every_attached_table_is_notified() {
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let key = CacheKey::new(5);
        key.attach(&tx_a);
        key.attach(&tx_b);
        key.attach(&tx_a);
        assert_eq!(key.attached_tables(), 2);
        drop(key);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err(), "one notice per table");
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_attach_prunes_closed_tables() {
        let (tx_a, rx_a) = mpsc::unbounded_channel::<ReclaimNotice>();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let key = CacheKey::new(8);
        key.attach(&tx_a);
        drop(rx_a);

        key.attach(&tx_b);
        assert_eq!(key.attached_tables(), 1);

        drop(key);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_weak_key_tracks_liveness() {
        let key = CacheKey::new(6);
        let weak = key.downgrade();
        assert!(weak.is_live());
        assert!(weak.upgrade().unwrap().same_instance(&key));

        drop(key);
        assert!(!weak.is_live());
        assert!(weak.upgrade().is_none());
    }
}
