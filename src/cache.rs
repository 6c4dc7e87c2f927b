use crate::topledger::client::QueryParams;
use moka::sync::Cache;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A cached value stamped with when it was stored and how long it stays fresh.
#[derive(Debug, Clone)]
pub struct CachedEntry<T> {
    pub data: T,
    pub timestamp: i64,
    pub expires_in_ms: i64,
}

impl<T> CachedEntry<T> {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms - self.timestamp < self.expires_in_ms
    }
}

/// Process-local TTL cache that keeps expired entries around so they can be
/// served when the upstream is failing. Entries are only ever replaced, never
/// evicted, so the map grows with the number of distinct keys.
pub struct TtlCache<T> {
    inner: Cache<String, CachedEntry<T>>,
    ttl_ms: i64,
}

impl<T: Clone + Send + Sync + 'static> TtlCache<T> {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            inner: Cache::builder().build(),
            ttl_ms: (ttl_secs as i64).saturating_mul(1000),
        }
    }

    /// Fresh value for `key`, or `None` on miss or expiry.
    pub fn get(&self, key: &str) -> Option<T> {
        self.get_at(key, now_ms())
    }

    pub fn get_at(&self, key: &str, now_ms: i64) -> Option<T> {
        self.inner
            .get(key)
            .filter(|entry| entry.is_fresh(now_ms))
            .map(|entry| entry.data)
    }

    /// Last stored entry regardless of age.
    pub fn get_stale(&self, key: &str) -> Option<CachedEntry<T>> {
        self.inner.get(key)
    }

    pub fn set(&self, key: String, value: T) {
        self.set_at(key, value, now_ms());
    }

    pub fn set_at(&self, key: String, value: T, now_ms: i64) {
        self.inner.insert(
            key,
            CachedEntry {
                data: value,
                timestamp: now_ms,
                expires_in_ms: self.ttl_ms,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.invalidate(key);
    }

    /// Drop every key belonging to `resource`, filtered or not.
    pub fn invalidate_resource(&self, resource: &str) {
        let filtered_prefix = format!("{resource}?");
        let keys: Vec<String> = self
            .inner
            .iter()
            .filter(|(k, _)| k.as_str() == resource || k.starts_with(&filtered_prefix))
            .map(|(k, _)| k.as_ref().clone())
            .collect();
        for key in keys {
            self.inner.invalidate(&key);
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

/// Composite key: the resource id followed by the form-encoded filters in
/// name order, so `?b=2&a=1` and `?a=1&b=2` share an entry. Encoding keeps a
/// value containing `&` or `=` from posing as extra filters.
pub fn cache_key(resource: &str, filters: &QueryParams) -> String {
    if filters.is_empty() {
        return resource.to_string();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(filters.iter())
        .finish();
    format!("{resource}?{query}")
}

/// Payload returned by every cached data endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Cached<T> {
    pub data: T,
    pub cached: bool,
    pub stale: bool,
    pub timestamp: i64,
}

/// Serve a fresh cache hit, otherwise fetch and store. When the fetch fails
/// and any earlier value exists, that value is returned with `stale: true`;
/// with nothing cached the fetch error is returned to the caller.
pub async fn fetch_cached<T, E, F, Fut>(
    cache: &TtlCache<T>,
    key: &str,
    fetch: F,
) -> Result<Cached<T>, E>
where
    T: Clone + Send + Sync + 'static,
    E: Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let now = now_ms();
    if let Some(entry) = cache.get_stale(key) {
        if entry.is_fresh(now) {
            return Ok(Cached {
                data: entry.data,
                cached: true,
                stale: false,
                timestamp: entry.timestamp,
            });
        }
    }

    match fetch().await {
        Ok(data) => {
            cache.set_at(key.to_string(), data.clone(), now);
            Ok(Cached {
                data,
                cached: false,
                stale: false,
                timestamp: now,
            })
        }
        Err(e) => match cache.get_stale(key) {
            Some(entry) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    age_ms = now - entry.timestamp,
                    "fetch failed, serving stale cache entry"
                );
                Ok(Cached {
                    data: entry.data,
                    cached: true,
                    stale: true,
                    timestamp: entry.timestamp,
                })
            }
            None => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_within_ttl_returns_value() {
        let cache = TtlCache::new(300);
        cache.set_at("chart-1".into(), vec![1, 2, 3], 1_000);
        assert_eq!(cache.get_at("chart-1", 1_000 + 299_999), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_get_after_ttl_is_miss_but_stale_remains() {
        let cache = TtlCache::new(300);
        cache.set_at("chart-1".into(), "v".to_string(), 1_000);
        assert_eq!(cache.get_at("chart-1", 1_000 + 300_000), None);
        let stale = cache.get_stale("chart-1").unwrap();
        assert_eq!(stale.data, "v");
        assert_eq!(stale.timestamp, 1_000);
        assert_eq!(stale.expires_in_ms, 300_000);
    }

    #[test]
    fn test_cache_key_ignores_filter_order() {
        let mut a = QueryParams::new();
        a.insert("granularity".into(), "week".into());
        a.insert("vote_account".into(), "Vote111".into());
        let mut b = QueryParams::new();
        b.insert("vote_account".into(), "Vote111".into());
        b.insert("granularity".into(), "week".into());
        assert_eq!(cache_key("rewards", &a), cache_key("rewards", &b));
        assert_eq!(
            cache_key("rewards", &a),
            "rewards?granularity=week&vote_account=Vote111"
        );
        assert_eq!(cache_key("rewards", &QueryParams::new()), "rewards");
    }

    #[test]
    fn test_cache_key_escapes_separators() {
        let mut smuggled = QueryParams::new();
        smuggled.insert("a".into(), "1&b=2".into());
        let mut pair = QueryParams::new();
        pair.insert("a".into(), "1".into());
        pair.insert("b".into(), "2".into());
        assert_ne!(cache_key("res", &smuggled), cache_key("res", &pair));
        assert_eq!(cache_key("res", &smuggled), "res?a=1%26b%3D2");
        assert_eq!(cache_key("res", &pair), "res?a=1&b=2");
    }

    #[test]
    fn test_invalidate_resource_keeps_other_resources() {
        let cache = TtlCache::new(300);
        cache.set("chart:a".into(), 1);
        cache.set("chart:a?range=7d".into(), 2);
        cache.set("chart:ab".into(), 3);
        cache.invalidate_resource("chart:a");
        assert!(cache.get_stale("chart:a").is_none());
        assert!(cache.get_stale("chart:a?range=7d").is_none());
        assert_eq!(cache.get("chart:ab"), Some(3));
    }

    #[tokio::test]
    async fn test_fetch_cached_hit_skips_fetch() {
        let cache = TtlCache::new(300);
        cache.set("k".into(), 7);
        let result = fetch_cached(&cache, "k", || async {
            Err::<i32, String>("should not be called".into())
        })
        .await
        .unwrap();
        assert_eq!(result.data, 7);
        assert!(result.cached);
        assert!(!result.stale);
    }

    #[tokio::test]
    async fn test_fetch_cached_serves_stale_on_error() {
        let cache = TtlCache::new(300);
        cache.set_at("k".into(), 7, 0);
        let result = fetch_cached(&cache, "k", || async { Err::<i32, String>("boom".into()) })
            .await
            .unwrap();
        assert_eq!(result.data, 7);
        assert!(result.stale);
        assert_eq!(result.timestamp, 0);
    }

    #[tokio::test]
    async fn test_fetch_cached_refreshes_expired_entry() {
        let cache = TtlCache::new(300);
        cache.set_at("k".into(), 1, 0);
        let result = fetch_cached(&cache, "k", || async { Ok::<i32, String>(2) })
            .await
            .unwrap();
        assert_eq!(result.data, 2);
        assert!(!result.cached);
        assert_eq!(cache.get("k"), Some(2));
    }

    #[tokio::test]
    async fn test_fetch_cached_propagates_without_entry() {
        let cache: TtlCache<i32> = TtlCache::new(300);
        let result = fetch_cached(&cache, "k", || async { Err::<i32, String>("boom".into()) }).await;
        assert_eq!(result.unwrap_err(), "boom");
    }
}
