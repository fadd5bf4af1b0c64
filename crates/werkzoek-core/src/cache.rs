//! Response cache with an explicit time-to-live per query kind.
//!
//! Entries are raw JSON bodies keyed by
//! [`RequestDescriptor::cache_key`](crate::request::RequestDescriptor::cache_key),
//! so one cache serves every response type.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

/// What a cached response belongs to. Each kind has its own staleness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Search,
    Detail,
    Similar,
    JobDomains,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub search_ttl: Duration,
    pub detail_ttl: Duration,
    pub similar_ttl: Duration,
    pub job_domains_ttl: Duration,
    /// Maximum entries per kind.
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl: Duration::from_secs(5 * 60),
            detail_ttl: Duration::from_secs(10 * 60),
            similar_ttl: Duration::from_secs(5 * 60),
            job_domains_ttl: Duration::from_secs(24 * 60 * 60),
            max_entries: 500,
        }
    }
}

impl CacheConfig {
    /// Same TTL for every kind.
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            search_ttl: ttl,
            detail_ttl: ttl,
            similar_ttl: ttl,
            job_domains_ttl: ttl,
            ..Self::default()
        }
    }
}

/// TTL cache for successful GET responses.
#[derive(Clone)]
pub struct QueryCache {
    search: Cache<String, Arc<str>>,
    detail: Cache<String, Arc<str>>,
    similar: Cache<String, Arc<str>>,
    job_domains: Cache<String, Arc<str>>,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        let build = |ttl: Duration| {
            Cache::builder()
                .max_capacity(config.max_entries)
                .time_to_live(ttl)
                .build()
        };
        Self {
            search: build(config.search_ttl),
            detail: build(config.detail_ttl),
            similar: build(config.similar_ttl),
            job_domains: build(config.job_domains_ttl),
        }
    }

    fn cache(&self, kind: QueryKind) -> &Cache<String, Arc<str>> {
        match kind {
            QueryKind::Search => &self.search,
            QueryKind::Detail => &self.detail,
            QueryKind::Similar => &self.similar,
            QueryKind::JobDomains => &self.job_domains,
        }
    }

    pub async fn get(&self, kind: QueryKind, key: &str) -> Option<Arc<str>> {
        let hit = self.cache(kind).get(key).await;
        if hit.is_some() {
            tracing::debug!(?kind, %key, "Cache hit");
        }
        hit
    }

    pub async fn insert(&self, kind: QueryKind, key: String, body: Arc<str>) {
        self.cache(kind).insert(key, body).await;
    }

    pub async fn invalidate(&self, kind: QueryKind, key: &str) {
        self.cache(kind).invalidate(key).await;
    }

    pub fn clear(&self) {
        for cache in [&self.search, &self.detail, &self.similar, &self.job_domains] {
            cache.invalidate_all();
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
