use crate::error::{AppError, AppResult, LoggedJson};
use crate::state::AppState;
use crate::storage::collection::Collection;
use crate::types::{is_valid_id, now_rfc3339};
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSession {
    pub session_id: String,
    pub timestamp: String,
    pub read_time: u64,
    pub is_new_view: bool,
}

/// Per-article view and read-time totals, one document per slug.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArticleAnalytics {
    pub slug: String,
    pub total_views: u64,
    pub total_read_time: u64,
    #[serde(default)]
    pub sessions: Vec<AnalyticsSession>,
    pub last_updated: String,
}

impl ArticleAnalytics {
    pub fn empty(slug: &str) -> Self {
        Self {
            slug: slug.to_string(),
            total_views: 0,
            total_read_time: 0,
            sessions: Vec::new(),
            last_updated: now_rfc3339(),
        }
    }

    /// Fold one tracking event into the record. A session counts as a view
    /// once; later events for it replace its read time. Returns whether this
    /// event was a new view.
    pub fn record(&mut self, session_id: &str, read_time: u64, now: &str) -> bool {
        let is_new = match self.sessions.iter_mut().find(|s| s.session_id == session_id) {
            Some(session) => {
                session.read_time = read_time;
                session.timestamp = now.to_string();
                session.is_new_view = false;
                false
            }
            None => {
                self.total_views += 1;
                self.sessions.push(AnalyticsSession {
                    session_id: session_id.to_string(),
                    timestamp: now.to_string(),
                    read_time,
                    is_new_view: true,
                });
                true
            }
        };
        self.total_read_time = self
            .sessions
            .iter()
            .fold(0u64, |total, s| total.saturating_add(s.read_time));
        self.last_updated = now.to_string();
        is_new
    }
}

/// One day. Longer reading sessions are rejected as bogus.
pub const MAX_READ_TIME_SECS: u64 = 86_400;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub read_time: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackResponse {
    pub success: bool,
    pub is_new_view: bool,
    pub total_views: u64,
    pub total_read_time: u64,
}

/// Tracking store. Updates to one slug are serialized through a per-slug
/// async lock; other processes writing the same bucket can still race.
pub struct BlogAnalytics {
    docs: Collection,
    locks: moka::sync::Cache<String, Arc<Mutex<()>>>,
}

impl BlogAnalytics {
    pub fn new(docs: Collection) -> Self {
        Self {
            docs,
            locks: moka::sync::Cache::builder()
                .time_to_idle(Duration::from_secs(600))
                .build(),
        }
    }

    fn lock_for(&self, slug: &str) -> Arc<Mutex<()>> {
        self.locks
            .get_with(slug.to_string(), || Arc::new(Mutex::new(())))
    }

    pub async fn get(&self, slug: &str) -> AppResult<ArticleAnalytics> {
        Ok(self
            .docs
            .get(slug)
            .await?
            .unwrap_or_else(|| ArticleAnalytics::empty(slug)))
    }

    pub async fn track(
        &self,
        slug: &str,
        session_id: &str,
        read_time: u64,
    ) -> AppResult<(ArticleAnalytics, bool)> {
        let lock = self.lock_for(slug);
        let _guard = lock.lock().await;

        let mut record = self.get(slug).await?;
        let is_new = record.record(session_id, read_time, &now_rfc3339());
        self.docs.put(slug, &record).await?;
        tracing::debug!(slug = %slug, is_new, total_views = record.total_views, "view tracked");
        Ok((record, is_new))
    }
}

/// POST /api/blog-analytics/track
pub async fn track(
    State(state): State<Arc<AppState>>,
    LoggedJson(req): LoggedJson<TrackRequest>,
) -> AppResult<Json<TrackResponse>> {
    let slug = req.slug.trim();
    let session_id = req.session_id.trim();
    if slug.is_empty() || session_id.is_empty() {
        return Err(AppError::Validation(
            "slug and sessionId are required".to_string(),
        ));
    }
    if !is_valid_id(slug) {
        return Err(AppError::Validation(format!("invalid slug: {slug:?}")));
    }
    if session_id.len() > 256 {
        return Err(AppError::Validation("sessionId is too long".to_string()));
    }
    let read_time = u64::try_from(req.read_time)
        .map_err(|_| AppError::Validation("readTime must be non-negative".to_string()))?;
    if read_time > MAX_READ_TIME_SECS {
        return Err(AppError::Validation(format!(
            "readTime must be at most {MAX_READ_TIME_SECS} seconds"
        )));
    }

    let (record, is_new_view) = state
        .blog_analytics
        .track(slug, session_id, read_time)
        .await?;
    Ok(Json(TrackResponse {
        success: true,
        is_new_view,
        total_views: record.total_views,
        total_read_time: record.total_read_time,
    }))
}

/// GET /api/blog-analytics/{slug} - Zeroed record when nothing was tracked.
pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> AppResult<Json<ArticleAnalytics>> {
    Ok(Json(state.blog_analytics.get(&slug).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fs::FsStore;
    use crate::storage::object_store::ObjectStore;

    #[test]
    fn test_same_session_is_one_view() {
        let mut a = ArticleAnalytics::empty("a");
        assert!(a.record("s1", 10, "t1"));
        assert!(!a.record("s1", 25, "t2"));
        assert_eq!(a.total_views, 1);
        assert_eq!(a.total_read_time, 25);
        assert_eq!(a.sessions.len(), 1);
        assert!(!a.sessions[0].is_new_view);
        assert_eq!(a.sessions[0].timestamp, "t2");
    }

    #[test]
    fn test_read_time_is_sum_over_sessions() {
        let mut a = ArticleAnalytics::empty("a");
        a.record("s1", 10, "t1");
        a.record("s2", 7, "t2");
        a.record("s1", 12, "t3");
        assert_eq!(a.total_views, 2);
        assert_eq!(a.total_read_time, 19);
    }

    #[test]
    fn test_total_read_time_saturates() {
        let mut a = ArticleAnalytics::empty("a");
        for session in ["s1", "s2", "s3"] {
            a.record(session, i64::MAX as u64, "t");
        }
        assert_eq!(a.total_views, 3);
        assert_eq!(a.total_read_time, u64::MAX);
    }

    #[tokio::test]
    async fn test_concurrent_tracks_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::Fs(FsStore::new(dir.path().to_path_buf()));
        let analytics = Arc::new(BlogAnalytics::new(Collection::new(
            store,
            "blog-analytics/",
            "analytics",
        )));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let analytics = analytics.clone();
            tasks.push(tokio::spawn(async move {
                analytics.track("post", &format!("s{i}"), 1).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let record = analytics.get("post").await.unwrap();
        assert_eq!(record.total_views, 16);
        assert_eq!(record.total_read_time, 16);
    }
}
