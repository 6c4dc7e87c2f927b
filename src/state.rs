use crate::blog::analytics::BlogAnalytics;
use crate::cache::TtlCache;
use crate::charts::store::ChartStore;
use crate::config::AppConfig;
use crate::newsletter::NewsletterClient;
use crate::storage::collection::Collection;
use crate::storage::object_store::ObjectStore;
use crate::storage::temp::TempStore;
use crate::topledger::client::TopLedgerClient;
use crate::updater::AutoUpdater;
use deadpool_sqlite::Pool;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// Everything the handlers share. Built once in `main` (or a test harness)
/// and passed to the router; nothing here starts background work on its own.
pub struct AppState {
    pub config: AppConfig,
    pub store: ObjectStore,
    pub pool: Pool,
    pub topledger: TopLedgerClient,
    /// Rows for chart, table and counter data endpoints.
    pub data_cache: TtlCache<Vec<Value>>,
    /// Typed metric series.
    pub metrics_cache: TtlCache<Value>,
    pub charts: ChartStore,
    pub tables: Collection,
    pub counters: Collection,
    pub articles: Collection,
    pub blog_analytics: BlogAnalytics,
    pub newsletter: NewsletterClient,
    pub updater: Arc<AutoUpdater>,
    pub temp: TempStore,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: ObjectStore,
        pool: Pool,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let topledger = TopLedgerClient::new(&config.topledger)?;
        let newsletter = NewsletterClient::new(config.newsletter.clone())?;
        let data_ttl = config.cache.chart_data_ttl_secs;

        Ok(Self {
            topledger,
            newsletter,
            data_cache: TtlCache::new(data_ttl),
            metrics_cache: TtlCache::new(data_ttl),
            charts: ChartStore::new(store.clone(), pool.clone(), config.cache.chart_config_ttl_secs),
            tables: Collection::new(store.clone(), "tables/", "table"),
            counters: Collection::new(store.clone(), "config/counters/", "counter"),
            articles: Collection::new(store.clone(), "blog-articles/", "article"),
            blog_analytics: BlogAnalytics::new(Collection::new(
                store.clone(),
                "blog-analytics/",
                "analytics",
            )),
            updater: Arc::new(AutoUpdater::new(config.auto_update.clone())),
            temp: TempStore::new(config.temp.dir.clone(), config.temp.gzip),
            started_at: Instant::now(),
            store,
            pool,
            config,
        })
    }
}
