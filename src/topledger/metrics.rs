//! Typed adapters over named analytics queries. Each adapter runs one query,
//! maps the raw rows into a record type and sorts them oldest first.

use super::client::{FetchError, QueryParams, TopLedgerClient};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
}

impl Granularity {
    /// Parameter value expected by the remote queries.
    pub fn as_param(&self) -> &'static str {
        match self {
            Granularity::Day => "Day",
            Granularity::Week => "Week",
            Granularity::Month => "Month",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "day" | "daily" => Some(Granularity::Day),
            "week" | "weekly" => Some(Granularity::Week),
            "month" | "monthly" => Some(Granularity::Month),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionVolume {
    #[serde(alias = "block_date", alias = "day")]
    pub date: String,
    #[serde(alias = "total_txns", deserialize_with = "lenient_f64")]
    pub total_txns: f64,
    #[serde(alias = "vote_txns", deserialize_with = "lenient_f64")]
    pub vote_txns: f64,
    #[serde(alias = "non_vote_txns", deserialize_with = "lenient_f64")]
    pub non_vote_txns: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAddresses {
    #[serde(alias = "block_month")]
    pub month: String,
    #[serde(alias = "active_addresses", deserialize_with = "lenient_f64")]
    pub active_addresses: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorRewards {
    #[serde(deserialize_with = "lenient_f64")]
    pub epoch: f64,
    #[serde(alias = "block_date")]
    pub date: String,
    #[serde(alias = "vote_account")]
    pub vote_account: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub rewards: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DexVolume {
    #[serde(alias = "block_date")]
    pub date: String,
    #[serde(alias = "dex_name", alias = "project")]
    pub dex: String,
    #[serde(alias = "volume_usd", alias = "volume", deserialize_with = "lenient_f64")]
    pub volume_usd: f64,
}

/// Accept numbers, numeric strings and null (as zero). The analytics API
/// returns decimals as strings for some warehouse column types.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom("number out of range")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| de::Error::custom(format!("not a number: {s:?}"))),
        Value::Null => Ok(0.0),
        other => Err(de::Error::custom(format!("expected number, got {other}"))),
    }
}

/// Map raw rows into `T`. One bad row fails the whole batch so a schema change
/// upstream surfaces immediately instead of as a partially empty chart.
pub fn map_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, FetchError> {
    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            serde_json::from_value(row).map_err(|e| FetchError::Row(format!("row {i}: {e}")))
        })
        .collect()
}

pub async fn daily_transactions(
    client: &TopLedgerClient,
    granularity: Granularity,
) -> Result<Vec<TransactionVolume>, FetchError> {
    let mut params = QueryParams::new();
    params.insert("Time Granularity".into(), granularity.as_param().into());
    let rows = client.fetch_query("daily_transactions", &params).await?;
    let mut records: Vec<TransactionVolume> = map_rows(rows)?;
    records.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(records)
}

pub async fn monthly_active_addresses(
    client: &TopLedgerClient,
) -> Result<Vec<ActiveAddresses>, FetchError> {
    let rows = client
        .fetch_query("monthly_active_addresses", &QueryParams::new())
        .await?;
    let mut records: Vec<ActiveAddresses> = map_rows(rows)?;
    records.sort_by(|a, b| a.month.cmp(&b.month));
    Ok(records)
}

pub async fn validator_rewards(
    client: &TopLedgerClient,
    vote_account: &str,
) -> Result<Vec<ValidatorRewards>, FetchError> {
    let mut params = QueryParams::new();
    params.insert("vote_account".into(), vote_account.into());
    let rows = client.fetch_query("validator_rewards", &params).await?;
    let mut records: Vec<ValidatorRewards> = map_rows(rows)?;
    records.sort_by(|a, b| a.date.cmp(&b.date));
    Ok(records)
}

pub async fn dex_volume(
    client: &TopLedgerClient,
    granularity: Granularity,
) -> Result<Vec<DexVolume>, FetchError> {
    let mut params = QueryParams::new();
    params.insert("Time Granularity".into(), granularity.as_param().into());
    let rows = client.fetch_query("dex_volume", &params).await?;
    let mut records: Vec<DexVolume> = map_rows(rows)?;
    records.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.dex.cmp(&b.dex)));
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_rows_accepts_snake_case_and_string_numbers() {
        let rows = vec![json!({
            "block_date": "2024-03-01",
            "total_txns": "120000000",
            "vote_txns": 90000000,
            "non_vote_txns": null,
        })];
        let records: Vec<TransactionVolume> = map_rows(rows).unwrap();
        assert_eq!(records[0].date, "2024-03-01");
        assert_eq!(records[0].total_txns, 120_000_000.0);
        assert_eq!(records[0].vote_txns, 90_000_000.0);
        assert_eq!(records[0].non_vote_txns, 0.0);
    }

    #[test]
    fn test_map_rows_reports_bad_row_index() {
        let rows = vec![
            json!({"month": "2024-01", "active_addresses": 10}),
            json!({"month": "2024-02", "active_addresses": "lots"}),
        ];
        let err = map_rows::<ActiveAddresses>(rows).unwrap_err();
        assert!(err.to_string().contains("row 1"), "{err}");
    }

    #[test]
    fn test_granularity_parse() {
        assert_eq!(Granularity::parse("Weekly"), Some(Granularity::Week));
        assert_eq!(Granularity::parse("day"), Some(Granularity::Day));
        assert_eq!(Granularity::parse("hour"), None);
        assert_eq!(Granularity::Month.as_param(), "Month");
    }
}
