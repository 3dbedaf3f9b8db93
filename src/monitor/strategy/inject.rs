//! Command injection strategy
//!
//! Expands a command template and injects it into the PTY with a trailing
//! newline. Placeholders: {container_id}, {session_id}, {timestamp},
//! {silence_duration}, {docker_id}.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;

use super::{
    expand_placeholders, params_error, Action, Decision, SilenceContext, Strategy, StrategyKind,
};

#[derive(Debug, Deserialize)]
struct InjectionParams {
    template: String,
}

pub struct InjectionStrategy {
    template: String,
}

impl InjectionStrategy {
    pub fn from_params(params: &serde_json::Value) -> Result<Self> {
        let params: InjectionParams = serde_json::from_value(params.clone())
            .map_err(|e| params_error(format!("injection params: {}", e)))?;
        Ok(Self {
            template: params.template,
        })
    }
}

#[async_trait]
impl Strategy for InjectionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Injection
    }

    fn validate(&self) -> Result<()> {
        if self.template.trim().is_empty() {
            return Err(params_error("injection template must not be empty"));
        }
        Ok(())
    }

    async fn decide(&self, ctx: &SilenceContext) -> Result<Decision> {
        self.validate()?;
        let command = format!("{}\n", expand_placeholders(&self.template, ctx));
        Ok(Decision::ok(Action::Inject(command)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_context;
    use super::*;

    #[tokio::test]
    async fn test_expansion_and_newline() {
        let strategy = InjectionStrategy::from_params(&serde_json::json!({
            "template": "echo silence {silence_duration}"
        }))
        .unwrap();

        let decision = strategy.decide(&test_context()).await.unwrap();
        match decision.action {
            Action::Inject(command) => assert_eq!(command, "echo silence 5\n"),
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_empty_template_rejected() {
        let strategy =
            InjectionStrategy::from_params(&serde_json::json!({"template": "   "})).unwrap();
        assert!(strategy.validate().is_err());

        assert!(InjectionStrategy::from_params(&serde_json::json!({})).is_err());
    }
}
