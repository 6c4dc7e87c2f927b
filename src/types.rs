use crate::updater::UpdaterStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("static regex"));

/// Ids and slugs end up in object keys and file names, so they are limited
/// to a conservative character set.
pub fn is_valid_id(id: &str) -> bool {
    ID_RE.is_match(id)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Trimmed, non-empty value of an optional string field.
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub storage_ok: bool,
    pub db_ok: bool,
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub data_entries: u64,
    pub metric_entries: u64,
    pub chart_config_entries: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub storage_backend: &'static str,
    pub storage_ok: bool,
    pub db_ok: bool,
    pub cache: CacheStats,
    pub auto_update: UpdaterStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    pub base_url: String,
    pub ga_tracking_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_id() {
        assert!(is_valid_id("solana-tps_2024"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("a/b"));
        assert!(!is_valid_id("../etc"));
        assert!(!is_valid_id(&"x".repeat(129)));
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(&Some("  hi ".into())), Some("hi"));
        assert_eq!(non_empty(&Some("   ".into())), None);
        assert_eq!(non_empty(&None), None);
    }
}
