use super::types::{ChartConfig, ChartInput, CHART_TYPES};
use crate::cache::TtlCache;
use crate::error::{AppError, AppResult};
use crate::storage::object_store::ObjectStore;
use crate::types::{is_valid_id, non_empty, now_rfc3339};
use deadpool_sqlite::Pool;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;

/// Result of a write. Object storage always succeeded when this is returned;
/// `db_synced` tells whether the SQLite backup copy was updated as well.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub chart: ChartConfig,
    pub db_synced: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub deleted: String,
    pub db_synced: bool,
}

/// Write-through chart configuration store.
///
/// Object storage is the source of truth. SQLite holds a best-effort copy:
/// writes go to object storage first and abort if that fails, then to SQLite
/// where a failure is logged and reported but not fatal. Reads fall back to
/// SQLite when an object is missing and write the row back (read repair).
pub struct ChartStore {
    store: ObjectStore,
    pool: Pool,
    cache: TtlCache<ChartConfig>,
}

fn object_key(id: &str) -> String {
    format!("charts/{id}.json")
}

fn validate_chart_type(chart_type: &str) -> AppResult<()> {
    if CHART_TYPES.contains(&chart_type) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "unsupported chartType {chart_type:?}, expected one of: {}",
            CHART_TYPES.join(", ")
        )))
    }
}

fn millis(rfc3339: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .map(|t| t.timestamp_millis())
        .unwrap_or_else(|_| chrono::Utc::now().timestamp_millis())
}

impl ChartStore {
    pub fn new(store: ObjectStore, pool: Pool, config_ttl_secs: u64) -> Self {
        Self {
            store,
            pool,
            cache: TtlCache::new(config_ttl_secs),
        }
    }

    pub fn cached_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub async fn get(&self, id: &str) -> AppResult<Option<ChartConfig>> {
        if !is_valid_id(id) {
            return Err(AppError::Validation(format!("invalid chart id: {id:?}")));
        }
        if let Some(chart) = self.cache.get(id) {
            return Ok(Some(chart));
        }

        match self.store.get_json::<ChartConfig>(&object_key(id)).await {
            Ok(Some(chart)) => {
                self.cache.set(id.to_string(), chart.clone());
                return Ok(Some(chart));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(chart_id = %id, error = %e, "object read failed, trying database");
            }
        }

        let Some(chart) = self.db_get(id).await? else {
            return Ok(None);
        };
        match self.store.put_json(&object_key(id), &chart).await {
            Ok(()) => tracing::info!(chart_id = %id, "restored chart to object storage from database"),
            Err(e) => tracing::warn!(chart_id = %id, error = %e, "read repair failed"),
        }
        self.cache.set(id.to_string(), chart.clone());
        Ok(Some(chart))
    }

    /// All charts, optionally limited to one dashboard page, ordered by
    /// creation time.
    pub async fn list(&self, page: Option<&str>) -> AppResult<Vec<ChartConfig>> {
        let mut charts = match self.store.list_json::<ChartConfig>("charts/").await {
            Ok(charts) => charts,
            Err(e) => {
                tracing::warn!(error = %e, "object listing failed, listing charts from database");
                self.db_list().await?
            }
        };
        if let Some(page) = page {
            charts.retain(|c| c.page == page);
        }
        charts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(charts)
    }

    pub async fn create(&self, input: ChartInput) -> AppResult<SaveOutcome> {
        let missing = input.missing_required();
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let id = match non_empty(&input.id) {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        if !is_valid_id(&id) {
            return Err(AppError::Validation(format!("invalid chart id: {id:?}")));
        }
        if self.get(&id).await?.is_some() {
            return Err(AppError::Validation(format!("chart {id} already exists")));
        }

        let now = now_rfc3339();
        let chart = ChartConfig {
            id,
            title: input.title.unwrap_or_default().trim().to_string(),
            subtitle: input.subtitle,
            page: input.page.unwrap_or_default().trim().to_string(),
            chart_type: input.chart_type.unwrap_or_default().trim().to_string(),
            api_endpoint: input.api_endpoint.unwrap_or_default(),
            api_key: input.api_key,
            data_mapping: input.data_mapping.unwrap_or_default(),
            created_at: now.clone(),
            updated_at: now,
        };
        validate_chart_type(&chart.chart_type)?;
        self.save(chart).await
    }

    /// Apply the provided fields onto an existing chart.
    pub async fn update(&self, id: &str, input: ChartInput) -> AppResult<SaveOutcome> {
        let mut chart = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("chart {id} not found")))?;

        if let Some(title) = input.title {
            chart.title = title.trim().to_string();
        }
        if let Some(page) = input.page {
            chart.page = page.trim().to_string();
        }
        if let Some(chart_type) = input.chart_type {
            chart.chart_type = chart_type.trim().to_string();
        }
        if input.subtitle.is_some() {
            chart.subtitle = input.subtitle;
        }
        if let Some(endpoint) = input.api_endpoint {
            chart.api_endpoint = endpoint;
        }
        if input.api_key.is_some() {
            chart.api_key = input.api_key;
        }
        if let Some(mapping) = input.data_mapping {
            chart.data_mapping = mapping;
        }

        let mut missing = Vec::new();
        if chart.title.is_empty() {
            missing.push("title");
        }
        if chart.page.is_empty() {
            missing.push("page");
        }
        if chart.chart_type.is_empty() {
            missing.push("chartType");
        }
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }
        validate_chart_type(&chart.chart_type)?;

        chart.updated_at = now_rfc3339();
        self.save(chart).await
    }

    async fn save(&self, chart: ChartConfig) -> AppResult<SaveOutcome> {
        self.store.put_json(&object_key(&chart.id), &chart).await?;
        self.cache.set(chart.id.clone(), chart.clone());

        let db_synced = match self.db_upsert(&chart).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(chart_id = %chart.id, error = %e, "chart backup write failed");
                false
            }
        };
        tracing::info!(chart_id = %chart.id, page = %chart.page, db_synced, "chart saved");
        Ok(SaveOutcome { chart, db_synced })
    }

    pub async fn delete(&self, id: &str) -> AppResult<DeleteOutcome> {
        if !is_valid_id(id) {
            return Err(AppError::Validation(format!("invalid chart id: {id:?}")));
        }
        let key = object_key(id);
        let in_store = self.store.get(&key).await?.is_some();
        if in_store {
            self.store.delete(&key).await?;
        }
        self.cache.invalidate(id);

        let (in_db, db_synced) = match self.db_delete(id).await {
            Ok(removed) => (removed, true),
            Err(e) => {
                tracing::warn!(chart_id = %id, error = %e, "chart backup delete failed");
                (false, false)
            }
        };

        if !in_store && !in_db && db_synced {
            return Err(AppError::NotFound(format!("chart {id} not found")));
        }
        tracing::info!(chart_id = %id, db_synced, "chart deleted");
        Ok(DeleteOutcome {
            deleted: id.to_string(),
            db_synced,
        })
    }

    async fn db_upsert(&self, chart: &ChartConfig) -> AppResult<()> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
        let config = serde_json::to_string(chart)
            .map_err(|e| AppError::Internal(format!("serialize chart: {e}")))?;
        let id = chart.id.clone();
        let title = chart.title.clone();
        let page = chart.page.clone();
        let chart_type = chart.chart_type.clone();
        let created = millis(&chart.created_at);
        let updated = millis(&chart.updated_at);

        conn.interact(move |conn| {
            conn.execute(
                "INSERT INTO charts (id, title, page, chart_type, config, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (id) DO UPDATE SET
                    title = excluded.title,
                    page = excluded.page,
                    chart_type = excluded.chart_type,
                    config = excluded.config,
                    updated_at = excluded.updated_at",
                params![id, title, page, chart_type, config, created, updated],
            )
        })
        .await??;
        Ok(())
    }

    async fn db_get(&self, id: &str) -> AppResult<Option<ChartConfig>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
        let id = id.to_string();
        let row = conn
            .interact(move |conn| {
                conn.query_row(
                    "SELECT config FROM charts WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
            .await??;

        match row {
            Some(config) => serde_json::from_str(&config)
                .map(Some)
                .map_err(|e| AppError::Internal(format!("corrupt chart row: {e}"))),
            None => Ok(None),
        }
    }

    async fn db_list(&self) -> AppResult<Vec<ChartConfig>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
        let rows = conn
            .interact(|conn| {
                let mut stmt = conn.prepare("SELECT config FROM charts ORDER BY created_at")?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await??;

        Ok(rows
            .iter()
            .filter_map(|config| match serde_json::from_str(config) {
                Ok(chart) => Some(chart),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping corrupt chart row");
                    None
                }
            })
            .collect())
    }

    async fn db_delete(&self, id: &str) -> AppResult<bool> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
        let id = id.to_string();
        let removed = conn
            .interact(move |conn| conn.execute("DELETE FROM charts WHERE id = ?1", params![id]))
            .await??;
        Ok(removed > 0)
    }

    /// Backfill object storage from SQLite: every backed-up chart whose
    /// object is missing is written back. Object storage charts missing
    /// from the backup table are copied the other way. Returns
    /// (synced, failed) over both directions.
    pub async fn reconcile(&self) -> AppResult<(usize, usize)> {
        let stored: HashSet<String> = self.store.list("charts/").await?.into_iter().collect();
        let rows = self.db_list().await?;
        let backed_up: HashSet<String> = rows.iter().map(|c| c.id.clone()).collect();

        let mut synced = 0;
        let mut failed = 0;
        for chart in rows.iter().filter(|c| !stored.contains(&object_key(&c.id))) {
            match self.store.put_json(&object_key(&chart.id), chart).await {
                Ok(()) => {
                    self.cache.invalidate(&chart.id);
                    synced += 1;
                }
                Err(e) => {
                    tracing::warn!(chart_id = %chart.id, error = %e, "restoring chart object failed");
                    failed += 1;
                }
            }
        }

        let objects = self.store.list_json::<ChartConfig>("charts/").await?;
        for chart in objects.iter().filter(|c| !backed_up.contains(&c.id)) {
            match self.db_upsert(chart).await {
                Ok(()) => synced += 1,
                Err(e) => {
                    tracing::warn!(chart_id = %chart.id, error = %e, "backing up chart row failed");
                    failed += 1;
                }
            }
        }

        tracing::info!(synced, failed, "charts reconciled");
        Ok((synced, failed))
    }
}
