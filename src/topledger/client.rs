use crate::config::{QueryRef, TopLedgerConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Filter parameters forwarded to a parameterized query. Ordered so that
/// request bodies and cache keys are stable.
pub type QueryParams = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("analytics request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("analytics API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed analytics response: {0}")]
    Envelope(String),

    #[error("unexpected row shape: {0}")]
    Row(String),

    #[error("unknown analytics query: {0}")]
    UnknownQuery(String),
}

#[derive(Deserialize)]
struct Envelope {
    query_result: Option<QueryResult>,
    job: Option<Value>,
}

#[derive(Deserialize)]
struct QueryResult {
    data: Option<QueryData>,
}

#[derive(Deserialize)]
struct QueryData {
    rows: Option<Vec<Value>>,
}

/// Extract `query_result.data.rows` from a raw response body.
pub fn parse_envelope(body: &[u8]) -> Result<Vec<Value>, FetchError> {
    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| FetchError::Envelope(e.to_string()))?;

    let Some(result) = envelope.query_result else {
        // Parameterized queries answer with a job handle while still executing.
        if let Some(job) = envelope.job {
            return Err(FetchError::Envelope(format!(
                "query still executing (job {})",
                job.get("id").unwrap_or(&Value::Null)
            )));
        }
        return Err(FetchError::Envelope("missing query_result".to_string()));
    };

    result
        .data
        .and_then(|d| d.rows)
        .ok_or_else(|| FetchError::Envelope("missing query_result.data.rows".to_string()))
}

/// HTTP client for the TopLedger (Redash-style) query API.
pub struct TopLedgerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    queries: HashMap<String, QueryRef>,
}

impl TopLedgerClient {
    pub fn new(config: &TopLedgerConfig) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            queries: config.queries.clone(),
        })
    }

    /// Resolve a named query to its results endpoint and API key.
    pub fn query_endpoint(&self, name: &str) -> Result<(String, String), FetchError> {
        let query = self
            .queries
            .get(name)
            .ok_or_else(|| FetchError::UnknownQuery(name.to_string()))?;
        let url = format!("{}/api/queries/{}/results", self.base_url, query.id);
        let key = query.api_key.clone().unwrap_or_else(|| self.api_key.clone());
        Ok((url, key))
    }

    /// Run a named query from `topledger.queries`.
    pub async fn fetch_query(
        &self,
        name: &str,
        params: &QueryParams,
    ) -> Result<Vec<Value>, FetchError> {
        let (url, key) = self.query_endpoint(name)?;
        if params.is_empty() {
            self.fetch_rows(&format!("{url}.json"), &key, params).await
        } else {
            self.fetch_rows(&url, &key, params).await
        }
    }

    /// Single attempt against an arbitrary results endpoint. Without params this
    /// is a GET of cached results; with params it POSTs them as query parameters.
    pub async fn fetch_rows(
        &self,
        endpoint: &str,
        api_key: &str,
        params: &QueryParams,
    ) -> Result<Vec<Value>, FetchError> {
        let mut request = if params.is_empty() {
            self.http.get(endpoint)
        } else {
            self.http
                .post(endpoint)
                .json(&json!({ "parameters": params, "max_age": 0 }))
        };
        if !api_key.is_empty() {
            request = request.query(&[("api_key", api_key)]);
        }

        let started = std::time::Instant::now();
        let resp = request.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let rows = parse_envelope(&body)?;
        tracing::debug!(
            endpoint = %redact_endpoint(endpoint),
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analytics query fetched"
        );
        Ok(rows)
    }
}

/// Strip the query string so API keys embedded in configured endpoints never
/// reach the logs.
fn redact_endpoint(endpoint: &str) -> &str {
    endpoint.split('?').next().unwrap_or(endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_envelope_rows() {
        let body = br#"{"query_result":{"data":{"rows":[{"date":"2024-01-01","tps":1200}]}}}"#;
        let rows = parse_envelope(body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["tps"], 1200);
    }

    #[test]
    fn test_parse_envelope_missing_rows() {
        let body = br#"{"query_result":{"data":{}}}"#;
        let err = parse_envelope(body).unwrap_err();
        assert!(err.to_string().contains("rows"));
    }

    #[test]
    fn test_parse_envelope_pending_job() {
        let body = br#"{"job":{"id":"abc","status":1}}"#;
        let err = parse_envelope(body).unwrap_err();
        assert!(err.to_string().contains("still executing"));
    }

    #[test]
    fn test_parse_envelope_not_json() {
        assert!(matches!(
            parse_envelope(b"<html>502</html>"),
            Err(FetchError::Envelope(_))
        ));
    }

    #[test]
    fn test_query_endpoint_uses_override_key() {
        let mut config = TopLedgerConfig {
            base_url: "https://tl.example/tl/".to_string(),
            api_key: "default-key".to_string(),
            ..Default::default()
        };
        config.queries.insert(
            "dex_volume".to_string(),
            QueryRef {
                id: 42,
                api_key: Some("dex-key".to_string()),
            },
        );
        config.queries.insert(
            "active_addresses".to_string(),
            QueryRef {
                id: 7,
                api_key: None,
            },
        );
        let client = TopLedgerClient::new(&config).unwrap();

        let (url, key) = client.query_endpoint("dex_volume").unwrap();
        assert_eq!(url, "https://tl.example/tl/api/queries/42/results");
        assert_eq!(key, "dex-key");

        let (_, key) = client.query_endpoint("active_addresses").unwrap();
        assert_eq!(key, "default-key");

        assert!(matches!(
            client.query_endpoint("nope"),
            Err(FetchError::UnknownQuery(_))
        ));
    }

    #[test]
    fn test_redact_endpoint() {
        assert_eq!(
            redact_endpoint("https://x/api/queries/1/results.json?api_key=secret"),
            "https://x/api/queries/1/results.json"
        );
    }
}
