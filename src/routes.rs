use crate::auth;
use crate::blog::{analytics as blog_analytics, articles};
use crate::charts::handler as charts;
use crate::config::RateLimitConfig;
use crate::counters;
use crate::error::{AppError, AppResult};
use crate::newsletter;
use crate::state::AppState;
use crate::storage::sqlite;
use crate::storage::temp::{TempError, TempKind};
use crate::tables;
use crate::topledger::handler as topledger;
use crate::types::{CacheStats, HealthResponse, SiteConfig, StatusResponse};
use crate::updater::handler as updater;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use xxhash_rust::xxh3::xxh3_64;

/// Public write endpoints only ever receive small JSON bodies.
const PUBLIC_BODY_LIMIT: usize = 16 * 1024;
/// Chart configs and blog articles can carry larger payloads.
const ADMIN_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// GET /health - Liveness plus storage and database reachability.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (storage_ok, db_ok) = tokio::join!(state.store.ping(), sqlite::ping(&state.pool));
    Json(HealthResponse {
        status: if storage_ok && db_ok {
            "ok".into()
        } else {
            "degraded".into()
        },
        storage_ok,
        db_ok,
    })
}

/// GET /api/status - Monitoring view, guarded by the status key.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let (storage_ok, db_ok) = tokio::join!(state.store.ping(), sqlite::ping(&state.pool));
    Json(StatusResponse {
        status: if storage_ok && db_ok {
            "ok".into()
        } else {
            "degraded".into()
        },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        storage_backend: state.store.backend_name(),
        storage_ok,
        db_ok,
        cache: CacheStats {
            data_entries: state.data_cache.entry_count(),
            metric_entries: state.metrics_cache.entry_count(),
            chart_config_entries: state.charts.cached_count(),
        },
        auto_update: state.updater.status(),
    })
}

/// GET /api/site-config - Values the frontend needs at runtime.
pub async fn site_config(State(state): State<Arc<AppState>>) -> Json<SiteConfig> {
    Json(SiteConfig {
        base_url: state.config.server.base_url.clone(),
        ga_tracking_id: state
            .config
            .analytics
            .ga_tracking_id
            .clone()
            .filter(|id| !id.is_empty()),
    })
}

/// Strong ETag over the decompressed JSON body.
pub fn etag(body: &[u8]) -> String {
    format!("\"{:016x}\"", xxh3_64(body))
}

fn if_none_match(headers: &HeaderMap, tag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|t| t.trim() == tag || t.trim() == "*"))
}

async fn serve_temp(
    state: &AppState,
    kind: TempKind,
    id: &str,
    headers: &HeaderMap,
) -> AppResult<Response> {
    let body = match state.temp.read(kind, id).await {
        Ok(Some(body)) => body,
        Ok(None) => return Err(AppError::NotFound(format!("no data for {id}"))),
        Err(TempError::InvalidId(id)) => {
            return Err(AppError::Validation(format!("invalid id: {id:?}")))
        }
        Err(TempError::Io(e)) => return Err(AppError::Internal(format!("read failed: {e}"))),
    };

    let tag = etag(&body);
    let etag_header = HeaderValue::from_str(&tag)
        .map_err(|e| AppError::Internal(format!("invalid etag: {e}")))?;
    if if_none_match(headers, &tag) {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag_header)]).into_response());
    }

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=60")),
            (header::ETAG, etag_header),
        ],
        body,
    )
        .into_response())
}

/// GET /api/temp/chart-data/{id}
pub async fn temp_chart_data(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    serve_temp(&state, TempKind::ChartData, &id, &headers).await
}

/// GET /api/temp/chart-configs/{id}
pub async fn temp_chart_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    serve_temp(&state, TempKind::ChartConfigs, &id, &headers).await
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::IF_NONE_MATCH,
            HeaderName::from_static(auth::INTERNAL_HEADER),
            HeaderName::from_static(auth::STATUS_KEY_HEADER),
        ])
        .expose_headers([header::ETAG])
}

/// Assemble every route. Rate limiting of the public write endpoints is
/// applied only when `rate_limit` is given and enabled; it keys on the
/// client IP and needs the server to provide `ConnectInfo`.
pub fn build_router(state: Arc<AppState>, rate_limit: Option<&RateLimitConfig>) -> Router {
    // ── Public reads ──
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/api/site-config", get(site_config))
        .route("/api/auth/check", post(auth::auth_check))
        .route("/api/charts", get(charts::list_charts))
        .route("/api/charts/{id}", get(charts::get_chart))
        .route("/api/charts/{id}/data", get(charts::chart_data))
        .route("/api/tables", get(tables::list_tables))
        .route("/api/tables/{id}", get(tables::get_table))
        .route("/api/tables/{id}/data", get(tables::table_data))
        .route("/api/counters", get(counters::list_counters))
        .route("/api/counters/{id}", get(counters::get_counter))
        .route("/api/counters/{id}/value", get(counters::counter_value))
        .route("/api/metrics/{name}", get(topledger::metric))
        .route("/api/blog", get(articles::list_articles))
        .route("/api/blog/{slug}", get(articles::get_article))
        .route("/api/blog-analytics/{slug}", get(blog_analytics::get_analytics))
        .route("/api/auto-update/status", get(updater::status))
        .route("/api/temp/chart-data/{id}", get(temp_chart_data))
        .route("/api/temp/chart-configs/{id}", get(temp_chart_config))
        .layer(DefaultBodyLimit::max(PUBLIC_BODY_LIMIT));

    // ── Public writes (rate limited) ──
    let mut tracking_routes = Router::new()
        .route("/api/blog-analytics/track", post(blog_analytics::track))
        .route("/api/newsletter", post(newsletter::subscribe))
        .layer(RequestBodyLimitLayer::new(PUBLIC_BODY_LIMIT));
    if let Some(rl) = rate_limit.filter(|rl| rl.enabled) {
        match GovernorConfigBuilder::default()
            .key_extractor(SmartIpKeyExtractor)
            .per_second(rl.per_second)
            .burst_size(rl.burst_size)
            .finish()
        {
            Some(conf) => tracking_routes = tracking_routes.layer(GovernorLayer::new(conf)),
            None => tracing::warn!(
                per_second = rl.per_second,
                burst_size = rl.burst_size,
                "invalid rate limit settings, public writes are not rate limited"
            ),
        }
    }

    // ── Admin writes (Bearer admin password) ──
    let admin_routes = Router::new()
        .route("/api/charts", post(charts::create_chart))
        .route("/api/charts/sync", post(charts::sync_charts))
        .route(
            "/api/charts/{id}",
            axum::routing::put(charts::update_chart).delete(charts::delete_chart),
        )
        .route("/api/tables", post(tables::create_table))
        .route(
            "/api/tables/{id}",
            axum::routing::put(tables::update_table).delete(tables::delete_table),
        )
        .route("/api/counters", post(counters::create_counter))
        .route(
            "/api/counters/{id}",
            axum::routing::put(counters::update_counter).delete(counters::delete_counter),
        )
        .route("/api/blog", post(articles::create_article))
        .route(
            "/api/blog/{slug}",
            axum::routing::put(articles::update_article).delete(articles::delete_article),
        )
        .layer(DefaultBodyLimit::max(ADMIN_BODY_LIMIT))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    // ── Internal (data-fetching script) ──
    let internal_routes = Router::new()
        .route("/api/auto-update/trigger", post(updater::trigger))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_internal,
        ));

    // ── Monitoring ──
    let status_routes = Router::new()
        .route("/api/status", get(status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_status_key,
        ));

    Router::new()
        .merge(public_routes)
        .merge(tracking_routes)
        .merge(admin_routes)
        .merge(internal_routes)
        .merge(status_routes)
        .fallback(not_found)
        .layer(cors())
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::NotFound("route not found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_is_quoted_and_stable() {
        let a = etag(br#"{"rows":[]}"#);
        assert_eq!(a, etag(br#"{"rows":[]}"#));
        assert_ne!(a, etag(br#"{"rows":[1]}"#));
        assert!(a.starts_with('"') && a.ends_with('"'));
        assert_eq!(a.len(), 18);
    }

    #[test]
    fn test_if_none_match() {
        let mut headers = HeaderMap::new();
        assert!(!if_none_match(&headers, "\"abc\""));
        headers.insert(
            header::IF_NONE_MATCH,
            HeaderValue::from_static("\"zzz\", \"abc\""),
        );
        assert!(if_none_match(&headers, "\"abc\""));
        assert!(!if_none_match(&headers, "\"def\""));
    }
}
