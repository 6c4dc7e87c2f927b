use super::client::{FetchError, QueryParams};
use super::metrics::{self, Granularity};
use crate::cache::{cache_key, fetch_cached, now_ms, Cached};
use crate::charts::types::DataMapping;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Rows for a configured endpoint (chart, table or counter), through the
/// shared data cache. Errors only reach the caller when nothing is cached.
pub async fn cached_rows(
    state: &AppState,
    resource: &str,
    endpoint: &str,
    api_key: Option<&str>,
    filters: &QueryParams,
    mapping: Option<&DataMapping>,
) -> AppResult<Cached<Vec<Value>>> {
    if endpoint.trim().is_empty() {
        return Err(AppError::Validation(format!(
            "{resource} has no apiEndpoint configured"
        )));
    }
    let key = cache_key(resource, filters);
    let client = &state.topledger;
    let api_key = api_key
        .filter(|k| !k.is_empty())
        .unwrap_or(&state.config.topledger.api_key);
    let result = fetch_cached(&state.data_cache, &key, || async move {
        let rows = client
            .fetch_rows(endpoint, api_key, filters)
            .await?;
        Ok::<_, FetchError>(match mapping {
            Some(m) => m.apply(rows),
            None => rows,
        })
    })
    .await?;
    Ok(result)
}

/// The typed metric endpoints, resolved from the path and query string.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    DailyTransactions(Granularity),
    MonthlyActiveAddresses,
    ValidatorRewards(String),
    DexVolume(Granularity),
}

impl Metric {
    pub fn parse(name: &str, params: &QueryParams) -> AppResult<Self> {
        let granularity = || -> AppResult<Granularity> {
            match params.get("granularity") {
                None => Ok(Granularity::Day),
                Some(g) => Granularity::parse(g).ok_or_else(|| {
                    AppError::Validation(format!(
                        "invalid granularity {g:?}, expected day, week or month"
                    ))
                }),
            }
        };

        match name {
            "daily-transactions" => Ok(Metric::DailyTransactions(granularity()?)),
            "monthly-active-addresses" => Ok(Metric::MonthlyActiveAddresses),
            "validator-rewards" => {
                let vote_account = params
                    .get("vote_account")
                    .or_else(|| params.get("voteAccount"))
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        AppError::Validation("vote_account is required".to_string())
                    })?;
                Ok(Metric::ValidatorRewards(vote_account))
            }
            "dex-volume" => Ok(Metric::DexVolume(granularity()?)),
            other => Err(AppError::NotFound(format!("unknown metric: {other}"))),
        }
    }

    fn cache_key(&self) -> String {
        match self {
            Metric::DailyTransactions(g) => format!("metric:daily-transactions:{}", g.as_param()),
            Metric::MonthlyActiveAddresses => "metric:monthly-active-addresses".to_string(),
            Metric::ValidatorRewards(v) => format!("metric:validator-rewards:{v}"),
            Metric::DexVolume(g) => format!("metric:dex-volume:{}", g.as_param()),
        }
    }
}

fn to_json<T: Serialize>(records: Vec<T>) -> Result<Value, FetchError> {
    serde_json::to_value(records).map_err(|e| FetchError::Row(e.to_string()))
}

/// GET /api/metrics/{name} - Typed metric series. Degrades to an empty list
/// when the analytics API fails and nothing is cached.
pub async fn metric(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<QueryParams>,
) -> AppResult<Json<Cached<Value>>> {
    let metric = Metric::parse(&name, &params)?;
    let key = metric.cache_key();
    let client = &state.topledger;

    let fetched = fetch_cached(&state.metrics_cache, &key, || async move {
        match metric {
            Metric::DailyTransactions(g) => to_json(metrics::daily_transactions(client, g).await?),
            Metric::MonthlyActiveAddresses => {
                to_json(metrics::monthly_active_addresses(client).await?)
            }
            Metric::ValidatorRewards(v) => to_json(metrics::validator_rewards(client, &v).await?),
            Metric::DexVolume(g) => to_json(metrics::dex_volume(client, g).await?),
        }
    })
    .await;

    match fetched {
        Ok(cached) => Ok(Json(cached)),
        Err(e) => {
            tracing::warn!(metric = %name, error = %e, "metric fetch failed, returning empty series");
            Ok(Json(Cached {
                data: Value::Array(Vec::new()),
                cached: false,
                stale: false,
                timestamp: now_ms(),
            }))
        }
    }
}
