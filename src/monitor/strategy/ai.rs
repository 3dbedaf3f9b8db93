//! AI strategy
//!
//! Sends the context snippet to an OpenAI-compatible chat-completion
//! endpoint and expects a strict JSON decision back. Malformed responses,
//! timeouts, and unknown action names all fall back to the configured
//! default action.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::error::Result;

use super::{params_error, Action, Decision, SilenceContext, Strategy, StrategyKind};

const DEFAULT_SYSTEM_PROMPT: &str = "You supervise an unattended development terminal. \
Given recent terminal output and a silence duration, respond with strict JSON only: \
{\"action\": \"inject\"|\"skip\"|\"notify\"|\"complete\", \"command\": \"...\", \"reason\": \"...\"}. \
Use \"inject\" with a shell command to unblock progress, \"skip\" to wait, \
\"notify\" to alert the operator, \"complete\" when the work looks finished.";

fn default_temperature() -> f64 {
    1.0
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_fallback() -> String {
    "skip".to_string()
}

#[derive(Debug, Deserialize)]
struct AiParams {
    endpoint: String,
    api_key: String,
    model: String,
    #[serde(default = "default_temperature")]
    temperature: f64,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default = "default_fallback")]
    fallback_action: String,
    #[serde(default)]
    fallback_command: Option<String>,
}

/// The strict response shape the model must produce.
#[derive(Debug, Deserialize)]
struct AiDecision {
    action: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    reason: Option<String>,
}

pub struct AiStrategy {
    params: AiParams,
    http: reqwest::Client,
}

impl AiStrategy {
    pub fn from_params(params: &serde_json::Value, http: reqwest::Client) -> Result<Self> {
        let params: AiParams = serde_json::from_value(params.clone())
            .map_err(|e| params_error(format!("ai params: {}", e)))?;
        Ok(Self { params, http })
    }

    fn fallback(&self, ai_response: Option<String>, error: String) -> Decision {
        let action = match self.params.fallback_action.as_str() {
            "inject" => match &self.params.fallback_command {
                Some(command) => Action::Inject(format!("{}\n", command)),
                None => Action::Skip,
            },
            "notify" => Action::Notify("ai_fallback".to_string()),
            "complete" => Action::Complete,
            _ => Action::Skip,
        };

        Decision {
            action,
            ai_response,
            success: false,
            error: Some(error),
        }
    }

    fn parse_content(&self, content: &str) -> Option<Action> {
        let decision: AiDecision = serde_json::from_str(content.trim()).ok()?;
        match decision.action.as_str() {
            "inject" => {
                let command = decision.command?;
                Some(Action::Inject(format!("{}\n", command)))
            }
            "skip" => Some(Action::Skip),
            "notify" => Some(Action::Notify(
                decision.command.unwrap_or_else(|| "ai_notify".to_string()),
            )),
            "complete" => Some(Action::Complete),
            _ => None,
        }
    }
}

#[async_trait]
impl Strategy for AiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Ai
    }

    fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.params.endpoint)
            .map_err(|e| params_error(format!("ai endpoint: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(params_error("ai endpoint must be http or https"));
        }
        if self.params.model.trim().is_empty() {
            return Err(params_error("ai model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.params.temperature) {
            return Err(params_error("ai temperature must be within [0, 2]"));
        }
        if self.params.timeout_ms == 0 {
            return Err(params_error("ai timeout must be positive"));
        }
        if !matches!(
            self.params.fallback_action.as_str(),
            "inject" | "skip" | "notify" | "complete"
        ) {
            return Err(params_error("ai fallback action is unknown"));
        }
        Ok(())
    }

    async fn decide(&self, ctx: &SilenceContext) -> Result<Decision> {
        self.validate()?;

        let system_prompt = self
            .params
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let user_prompt = format!(
            "The terminal has been silent for {} seconds. Recent output:\n\n{}",
            ctx.silence.as_secs(),
            ctx.snippet
        );

        let body = json!({
            "model": self.params.model,
            "temperature": self.params.temperature,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let response = self
            .http
            .post(&self.params.endpoint)
            .bearer_auth(&self.params.api_key)
            .timeout(Duration::from_millis(self.params.timeout_ms))
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(
                    "AI endpoint returned {} for session {}",
                    response.status(),
                    ctx.session_id
                );
                return Ok(self.fallback(
                    None,
                    format!("ai endpoint returned {}", response.status()),
                ));
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    "ai call timed out".to_string()
                } else {
                    "ai call failed".to_string()
                };
                warn!("AI call failed for session {}: {}", ctx.session_id, e);
                return Ok(self.fallback(None, error));
            }
        };

        let payload: serde_json::Value = match response.json().await {
            Ok(payload) => payload,
            Err(_) => return Ok(self.fallback(None, "ai response was not JSON".to_string())),
        };

        let Some(content) = payload["choices"][0]["message"]["content"].as_str() else {
            return Ok(self.fallback(
                Some(payload.to_string()),
                "ai response missing message content".to_string(),
            ));
        };
        let content = content.to_string();

        match self.parse_content(&content) {
            Some(action) => Ok(Decision {
                action,
                ai_response: Some(content),
                success: true,
                error: None,
            }),
            None => Ok(self.fallback(
                Some(content),
                "ai decision was malformed or named an unknown action".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(overrides: serde_json::Value) -> AiStrategy {
        let mut params = serde_json::json!({
            "endpoint": "https://api.example.com/v1/chat/completions",
            "api_key": "sk-test",
            "model": "gpt-4o-mini",
        });
        if let (Some(base), Some(extra)) = (params.as_object_mut(), overrides.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        AiStrategy::from_params(&params, reqwest::Client::new()).unwrap()
    }

    #[test]
    fn test_validate_bounds() {
        assert!(strategy(serde_json::json!({})).validate().is_ok());
        assert!(strategy(serde_json::json!({"temperature": 2.0}))
            .validate()
            .is_ok());
        assert!(strategy(serde_json::json!({"temperature": 2.1}))
            .validate()
            .is_err());
        assert!(strategy(serde_json::json!({"temperature": -0.1}))
            .validate()
            .is_err());
        assert!(strategy(serde_json::json!({"timeout_ms": 0}))
            .validate()
            .is_err());
        assert!(strategy(serde_json::json!({"fallback_action": "explode"}))
            .validate()
            .is_err());
    }

    #[test]
    fn test_parse_strict_decisions() {
        let s = strategy(serde_json::json!({}));

        assert_eq!(
            s.parse_content(r#"{"action": "inject", "command": "ls"}"#),
            Some(Action::Inject("ls\n".to_string()))
        );
        assert_eq!(s.parse_content(r#"{"action": "skip"}"#), Some(Action::Skip));
        assert_eq!(
            s.parse_content(r#"{"action": "complete", "reason": "build done"}"#),
            Some(Action::Complete)
        );

        // inject without a command is malformed
        assert_eq!(s.parse_content(r#"{"action": "inject"}"#), None);
        // unknown action maps to fallback
        assert_eq!(s.parse_content(r#"{"action": "reboot"}"#), None);
        // non-JSON content is malformed
        assert_eq!(s.parse_content("I think you should run ls"), None);
    }

    #[test]
    fn test_fallback_actions() {
        let s = strategy(serde_json::json!({
            "fallback_action": "inject",
            "fallback_command": "echo fallback"
        }));
        let decision = s.fallback(None, "timeout".into());
        assert_eq!(
            decision.action,
            Action::Inject("echo fallback\n".to_string())
        );
        assert!(!decision.success);

        let s = strategy(serde_json::json!({"fallback_action": "skip"}));
        assert_eq!(s.fallback(None, "x".into()).action, Action::Skip);
    }
}
