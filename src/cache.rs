//! Route Cache — an in-memory, atomically-swappable snapshot of the Route
//! Store, giving the Proxy Engine sub-millisecond longest-prefix lookups
//! without hitting SQLite on the request path.
//!
//! The swap pattern mirrors the teacher's `RouterState::config_lock`:
//! readers hold the lock only long enough to clone an `Arc`, so a refresh
//! never blocks an in-flight lookup and no reader ever observes a partial
//! snapshot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::store::{Route, RouteStore};

/// An immutable, point-in-time view of every configured route, plus a
/// length-descending key list so [`Snapshot::find_match`] can scan from
/// most to least specific and return on the first prefix hit.
struct Snapshot {
    by_path: std::collections::HashMap<String, Route>,
    paths_longest_first: Vec<String>,
}

impl Snapshot {
    fn build(routes: Vec<Route>) -> Self {
        let mut paths_longest_first: Vec<String> = routes.iter().map(|r| r.path.clone()).collect();
        paths_longest_first.sort_by_key(|p| std::cmp::Reverse(p.len()));

        let by_path = routes.into_iter().map(|r| (r.path.clone(), r)).collect();
        Self { by_path, paths_longest_first }
    }

    fn find_match(&self, request_path: &str) -> Option<Route> {
        self.paths_longest_first
            .iter()
            .find(|path| request_path.starts_with(path.as_str()))
            .and_then(|path| self.by_path.get(path))
            .cloned()
    }

    fn len(&self) -> usize {
        self.by_path.len()
    }
}

/// Holds the current [`Snapshot`] and refreshes it from the [`RouteStore`]
/// on demand or on a fixed schedule.
pub struct RouteCache {
    store: Arc<RouteStore>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl RouteCache {
    /// Build an empty cache. Call [`RouteCache::refresh`] before serving
    /// traffic — an empty cache matches nothing.
    pub fn new(store: Arc<RouteStore>) -> Self {
        Self { store, snapshot: RwLock::new(Arc::new(Snapshot::build(Vec::new()))) }
    }

    /// Reload every route from the store and publish it as the current
    /// snapshot in a single lock write — no reader ever sees a torn view.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let routes = self.store.find_all().await?;
        let snapshot = Snapshot::build(routes);
        tracing::debug!(routes = snapshot.len(), "route cache refreshed");
        *self.snapshot.write().await = Arc::new(snapshot);
        Ok(())
    }

    /// Longest-prefix match against the currently published snapshot.
    pub async fn find_match(&self, request_path: &str) -> Option<Route> {
        let snapshot = self.snapshot.read().await.clone();
        snapshot.find_match(request_path)
    }

    /// Spawn the background refresh loop. Sleeps `interval` *after* each
    /// refresh completes rather than ticking on a fixed wall-clock
    /// schedule, so a slow refresh can never overlap with the next one.
    /// Failures here are logged and the previous snapshot is kept; only
    /// the startup refresh (see [`RouteCache::refresh`] called directly by
    /// the caller) is treated as fatal.
    pub fn spawn_refresh_loop(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(err) = self.refresh().await {
                    tracing::warn!(error = %err, "periodic route cache refresh failed, keeping previous snapshot");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewRoute;

    async fn seeded_cache() -> RouteCache {
        let store = Arc::new(RouteStore::open_in_memory().await.unwrap());
        store
            .insert(NewRoute { path: "/api".into(), target_url: "http://api".into(), capacity: None, refill_rate_per_second: None })
            .await
            .unwrap();
        store
            .insert(NewRoute {
                path: "/api/v1".into(),
                target_url: "http://api-v1".into(),
                capacity: None,
                refill_rate_per_second: None,
            })
            .await
            .unwrap();
        let cache = RouteCache::new(store);
        cache.refresh().await.unwrap();
        cache
    }

    #[tokio::test]
    async fn find_match_prefers_longest_prefix() {
        let cache = seeded_cache().await;
        let route = cache.find_match("/api/v1/widgets").await.unwrap();
        assert_eq!(route.path, "/api/v1");
    }

    #[tokio::test]
    async fn find_match_falls_back_to_shorter_prefix() {
        let cache = seeded_cache().await;
        let route = cache.find_match("/api/v2/widgets").await.unwrap();
        assert_eq!(route.path, "/api");
    }

    #[tokio::test]
    async fn find_match_returns_none_when_no_prefix_matches() {
        let cache = seeded_cache().await;
        assert!(cache.find_match("/unrelated").await.is_none());
    }

    #[tokio::test]
    async fn empty_cache_matches_nothing() {
        let store = Arc::new(RouteStore::open_in_memory().await.unwrap());
        let cache = RouteCache::new(store);
        assert!(cache.find_match("/anything").await.is_none());
    }

    #[tokio::test]
    async fn refresh_picks_up_newly_inserted_routes() {
        let store = Arc::new(RouteStore::open_in_memory().await.unwrap());
        let cache = RouteCache::new(store.clone());
        cache.refresh().await.unwrap();
        assert!(cache.find_match("/new").await.is_none());

        store
            .insert(NewRoute { path: "/new".into(), target_url: "http://new".into(), capacity: None, refill_rate_per_second: None })
            .await
            .unwrap();
        cache.refresh().await.unwrap();
        assert!(cache.find_match("/new").await.is_some());
    }
}
