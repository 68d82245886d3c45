use growable_bloom_filter::GrowableBloom;
use tokio::sync::Mutex;

use crate::crawler::job::EntityKey;

/// Probabilistic seen-set gating User job fan-out.
///
/// Backed by a scalable bloom filter: false positives are acceptable (a user
/// is silently never re-crawled), false negatives cannot happen for a key
/// that was actually marked. State lives for the process lifetime only.
///
/// Shared by every worker; the single lock makes check-then-mark atomic, so
/// two workers racing on the same discovery cannot both enqueue it.
pub struct DedupFilter {
    inner: Mutex<GrowableBloom>,
}

impl DedupFilter {
    pub fn new(false_positive_rate: f64, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(GrowableBloom::new(false_positive_rate, capacity)),
        }
    }

    pub async fn seen(&self, key: &EntityKey) -> bool {
        self.inner.lock().await.contains(key)
    }

    pub async fn mark_seen(&self, key: &EntityKey) {
        self.inner.lock().await.insert(key);
    }

    /// Atomically mark `key` seen. Returns true if it was newly marked,
    /// false if it was (or appeared to be) already present.
    pub async fn check_and_mark(&self, key: &EntityKey) -> bool {
        let mut filter = self.inner.lock().await;
        if filter.contains(key) {
            return false;
        }
        filter.insert(key);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unmarked_key_is_not_seen() {
        let filter = DedupFilter::new(0.001, 1024);
        assert!(!filter.seen(&EntityKey::user("123")).await);
    }

    #[tokio::test]
    async fn marked_key_stays_seen() {
        let filter = DedupFilter::new(0.001, 1024);
        let key = EntityKey::user("123");
        filter.mark_seen(&key).await;
        for _ in 0..10 {
            assert!(filter.seen(&key).await);
        }
    }

    #[tokio::test]
    async fn check_and_mark_is_idempotent() {
        let filter = DedupFilter::new(0.001, 1024);
        let key = EntityKey::user("777");
        assert!(filter.check_and_mark(&key).await);
        assert!(!filter.check_and_mark(&key).await);
        assert!(filter.seen(&key).await);
    }

    #[tokio::test]
    async fn no_false_negatives_under_growth() {
        let filter = DedupFilter::new(0.01, 64);
        let keys: Vec<EntityKey> = (0..1000).map(|i| EntityKey::user(i.to_string())).collect();
        for key in &keys {
            filter.mark_seen(key).await;
        }
        for key in &keys {
            assert!(filter.seen(key).await, "lost {key}");
        }
    }
}
