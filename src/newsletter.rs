use crate::config::NewsletterConfig;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex")
});

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL_RE.is_match(email)
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
    pub success: bool,
    pub already_subscribed: bool,
}

/// Contact signup against the Brevo contacts API.
pub struct NewsletterClient {
    http: reqwest::Client,
    config: NewsletterConfig,
}

impl NewsletterClient {
    pub fn new(config: NewsletterConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, config })
    }

    /// Add `email` to the configured list. Existing contacts are updated and
    /// reported as already subscribed.
    pub async fn subscribe(&self, email: &str) -> AppResult<bool> {
        if self.config.brevo_api_key.is_empty() {
            return Err(AppError::Internal("newsletter is not configured".to_string()));
        }

        let mut body = json!({ "email": email, "updateEnabled": true });
        if let Some(list_id) = self.config.list_id {
            body["listIds"] = json!([list_id]);
        }

        let resp = self
            .http
            .post(&self.config.api_url)
            .header("api-key", &self.config.brevo_api_key)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("newsletter request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            // Brevo answers 201 for new contacts and 204 for updated ones.
            return Ok(status.as_u16() == 204);
        }

        let text = resp.text().await.unwrap_or_default();
        if status.as_u16() == 400 && text.contains("duplicate_parameter") {
            return Ok(true);
        }
        tracing::error!(status = status.as_u16(), body = %text.chars().take(200).collect::<String>(), "newsletter signup rejected");
        Err(AppError::Internal(format!(
            "newsletter signup failed with status {status}"
        )))
    }
}

/// POST /api/newsletter
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    LoggedJson(req): LoggedJson<SubscribeRequest>,
) -> AppResult<Json<SubscribeResponse>> {
    let email = req.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::Validation("a valid email is required".to_string()));
    }
    let already_subscribed = state.newsletter.subscribe(&email).await?;
    tracing::info!(already_subscribed, "newsletter signup");
    Ok(Json(SubscribeResponse {
        success: true,
        already_subscribed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_email() {
        assert!(is_valid_email("dev@solana.com"));
        assert!(is_valid_email("a.b+tag@sub.example.io"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.com"));
        assert!(!is_valid_email(""));
    }

    #[tokio::test]
    async fn test_unconfigured_subscribe_fails() {
        let client = NewsletterClient::new(NewsletterConfig::default()).unwrap();
        assert!(matches!(
            client.subscribe("dev@solana.com").await,
            Err(AppError::Internal(_))
        ));
    }
}
