use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

pub const CHART_TYPES: &[&str] = &[
    "bar",
    "stacked-bar",
    "line",
    "area",
    "stacked-area",
    "pie",
    "combined",
    "dual-axis",
];

/// How raw query rows map onto chart axes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataMapping {
    #[serde(default)]
    pub x_axis: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub y_axis: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) if s.is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}

impl DataMapping {
    /// Project rows onto the mapped fields and sort them by the x axis.
    /// Rows without an x value are dropped. An empty mapping passes rows
    /// through untouched.
    pub fn apply(&self, rows: Vec<Value>) -> Vec<Value> {
        if self.x_axis.is_empty() {
            return rows;
        }

        let mut projected: Vec<Value> = rows
            .into_iter()
            .filter_map(|row| {
                let obj = row.as_object()?;
                let x = obj.get(&self.x_axis).filter(|v| !v.is_null())?;
                let mut out = serde_json::Map::new();
                out.insert(self.x_axis.clone(), x.clone());
                for field in self.y_axis.iter().chain(self.group_by.iter()) {
                    if let Some(v) = obj.get(field) {
                        out.insert(field.clone(), v.clone());
                    }
                }
                Some(Value::Object(out))
            })
            .collect();

        let x = self.x_axis.as_str();
        projected.sort_by(|a, b| compare_values(&a[x], &b[x]));
        projected
    }
}

/// Numbers compare numerically, everything else by its string form. ISO
/// dates and `YYYY-MM` months sort chronologically as strings.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => value_str(a).cmp(&value_str(b)),
    }
}

fn value_str(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub page: String,
    pub chart_type: String,
    #[serde(default)]
    pub api_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub data_mapping: DataMapping,
    pub created_at: String,
    pub updated_at: String,
}

/// Body of chart create/update requests. Every field is optional so updates
/// can be partial; creation checks the required ones.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInput {
    pub id: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub page: Option<String>,
    pub chart_type: Option<String>,
    pub api_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub data_mapping: Option<DataMapping>,
}

impl ChartInput {
    /// Names of required fields that are missing or blank.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if crate::types::non_empty(&self.title).is_none() {
            missing.push("title");
        }
        if crate::types::non_empty(&self.page).is_none() {
            missing.push("page");
        }
        if crate::types::non_empty(&self.chart_type).is_none() {
            missing.push("chartType");
        }
        missing
    }
}
