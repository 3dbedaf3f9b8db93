//! Webhook strategy
//!
//! POSTs the silence event to a configured URL. Non-2xx responses are
//! retried with exponential backoff; the outcome is always `skip`, with the
//! HTTP failure recorded but non-fatal.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::Result;

use super::{params_error, Action, Decision, SilenceContext, Strategy, StrategyKind};

/// Retries after the initial attempt.
const MAX_RETRIES: u32 = 3;

/// Backoff before retry `attempt` (0-based): 250ms, 1s, 4s.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(250 * 4u64.pow(attempt))
}

#[derive(Debug, Deserialize)]
struct WebhookParams {
    url: String,
    #[serde(default)]
    headers: Option<serde_json::Value>,
}

pub struct WebhookStrategy {
    url: String,
    headers: HashMap<String, String>,
    http: reqwest::Client,
}

impl WebhookStrategy {
    pub fn from_params(params: &serde_json::Value, http: reqwest::Client) -> Result<Self> {
        let params: WebhookParams = serde_json::from_value(params.clone())
            .map_err(|e| params_error(format!("webhook params: {}", e)))?;

        let headers = match params.headers {
            None | Some(serde_json::Value::Null) => HashMap::new(),
            Some(serde_json::Value::Object(map)) => {
                let mut headers = HashMap::new();
                for (key, value) in map {
                    let value = value
                        .as_str()
                        .ok_or_else(|| {
                            params_error(format!("webhook header {} must be a string", key))
                        })?
                        .to_string();
                    headers.insert(key, value);
                }
                headers
            }
            Some(_) => {
                return Err(params_error("webhook headers must be a JSON object"));
            }
        };

        Ok(Self {
            url: params.url,
            headers,
            http,
        })
    }
}

#[async_trait]
impl Strategy for WebhookStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Webhook
    }

    fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| params_error(format!("webhook url: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(params_error("webhook url must be http or https"));
        }
        Ok(())
    }

    async fn decide(&self, ctx: &SilenceContext) -> Result<Decision> {
        self.validate()?;

        let body = json!({
            "container_id": ctx.container_id,
            "session_id": ctx.session_id,
            "silence_duration": ctx.silence.as_secs(),
            "last_output": ctx.snippet,
        });

        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            let mut request = self.http.post(&self.url).json(&body);
            for (key, value) in &self.headers {
                request = request.header(key, value);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Webhook delivered for session {}", ctx.session_id);
                    return Ok(Decision::ok(Action::Skip));
                }
                Ok(response) => {
                    last_error = format!("webhook returned {}", response.status());
                    warn!(
                        "Webhook attempt {} for session {}: {}",
                        attempt + 1,
                        ctx.session_id,
                        last_error
                    );
                }
                Err(e) => {
                    last_error = if e.is_timeout() {
                        "webhook timed out".to_string()
                    } else {
                        "webhook request failed".to_string()
                    };
                    warn!(
                        "Webhook attempt {} for session {}: {}",
                        attempt + 1,
                        ctx.session_id,
                        e
                    );
                }
            }
        }

        Ok(Decision {
            action: Action::Skip,
            ai_response: None,
            success: false,
            error: Some(last_error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(params: serde_json::Value) -> Result<WebhookStrategy> {
        WebhookStrategy::from_params(&params, reqwest::Client::new())
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(0), Duration::from_millis(250));
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_validate_url() {
        let ok = strategy(serde_json::json!({"url": "https://hooks.example.com/x"})).unwrap();
        assert!(ok.validate().is_ok());

        let bad_scheme = strategy(serde_json::json!({"url": "ftp://example.com"})).unwrap();
        assert!(bad_scheme.validate().is_err());

        let not_a_url = strategy(serde_json::json!({"url": "nope"})).unwrap();
        assert!(not_a_url.validate().is_err());
    }

    #[test]
    fn test_headers_must_be_string_map() {
        assert!(strategy(serde_json::json!({
            "url": "https://example.com",
            "headers": {"X-Auth": "token"}
        }))
        .is_ok());

        assert!(strategy(serde_json::json!({
            "url": "https://example.com",
            "headers": {"X-Auth": 42}
        }))
        .is_err());

        assert!(strategy(serde_json::json!({
            "url": "https://example.com",
            "headers": ["not", "a", "map"]
        }))
        .is_err());
    }

    #[test]
    fn test_missing_url_rejected() {
        assert!(strategy(serde_json::json!({})).is_err());
    }
}
