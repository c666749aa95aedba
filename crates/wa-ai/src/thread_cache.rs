use std::collections::HashMap;
use std::time::{Duration, Instant};

pub(crate) type ThreadKey = (String, String);

#[derive(Debug, Clone)]
struct CachedThread {
    thread_id: String,
    last_used: Instant,
}

/// `(tenant, sender)` to assistant thread map with idle expiry and a size cap.
///
/// Expired entries are pruned on every access; when the cap is reached the
/// least recently used thread is evicted.
#[derive(Debug)]
pub(crate) struct ThreadCache {
    entries: HashMap<ThreadKey, CachedThread>,
    idle_ttl: Duration,
    max_entries: usize,
}

impl ThreadCache {
    pub(crate) fn new(idle_ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            idle_ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns the cached thread and refreshes its idle timer.
    pub(crate) fn get(&mut self, key: &ThreadKey, now: Instant) -> Option<String> {
        self.prune_expired(now);
        let entry = self.entries.get_mut(key)?;
        entry.last_used = now;
        Some(entry.thread_id.clone())
    }

    pub(crate) fn insert(&mut self, key: ThreadKey, thread_id: String, now: Instant) {
        self.prune_expired(now);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            key,
            CachedThread {
                thread_id,
                last_used: now,
            },
        );
    }

    pub(crate) fn remove(&mut self, key: &ThreadKey) {
        self.entries.remove(key);
    }

    /// Drops every thread of `tenant_id`, returning how many were cached.
    pub(crate) fn forget_tenant(&mut self, tenant_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(tenant, _), _| tenant != tenant_id);
        before - self.entries.len()
    }

    pub(crate) fn prune_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let idle_ttl = self.idle_ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_used) < idle_ttl);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{ThreadCache, ThreadKey};

    fn key(tenant: &str, sender: &str) -> ThreadKey {
        (tenant.to_string(), sender.to_string())
    }

    #[test]
    fn unit_idle_threads_expire_and_used_threads_stay() {
        let start = Instant::now();
        let mut cache = ThreadCache::new(Duration::from_secs(60), 10);
        cache.insert(key("acme", "1@c.us"), "thread_1".to_string(), start);
        cache.insert(key("acme", "2@c.us"), "thread_2".to_string(), start);

        let later = start + Duration::from_secs(45);
        assert_eq!(
            cache.get(&key("acme", "1@c.us"), later).as_deref(),
            Some("thread_1")
        );

        let expired = start + Duration::from_secs(75);
        assert_eq!(cache.prune_expired(expired), 1);
        assert!(cache.get(&key("acme", "2@c.us"), expired).is_none());
        assert_eq!(
            cache.get(&key("acme", "1@c.us"), expired).as_deref(),
            Some("thread_1")
        );
    }

    #[test]
    fn functional_full_cache_evicts_least_recently_used() {
        let start = Instant::now();
        let mut cache = ThreadCache::new(Duration::from_secs(3_600), 2);
        cache.insert(key("acme", "a"), "thread_a".to_string(), start);
        cache.insert(
            key("acme", "b"),
            "thread_b".to_string(),
            start + Duration::from_secs(1),
        );
        cache.get(&key("acme", "a"), start + Duration::from_secs(2));
        cache.insert(
            key("acme", "c"),
            "thread_c".to_string(),
            start + Duration::from_secs(3),
        );

        let now = start + Duration::from_secs(4);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("acme", "b"), now).is_none());
        assert!(cache.get(&key("acme", "a"), now).is_some());
        assert!(cache.get(&key("acme", "c"), now).is_some());
    }

    #[test]
    fn unit_forget_tenant_leaves_other_tenants_alone() {
        let now = Instant::now();
        let mut cache = ThreadCache::new(Duration::from_secs(60), 10);
        cache.insert(key("acme", "a"), "thread_a".to_string(), now);
        cache.insert(key("acme", "b"), "thread_b".to_string(), now);
        cache.insert(key("globex", "a"), "thread_g".to_string(), now);

        assert_eq!(cache.forget_tenant("acme"), 2);
        assert_eq!(cache.forget_tenant("acme"), 0);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key("globex", "a"), now).is_some());
    }
}
