//! Silence strategies
//!
//! Each strategy implements one contract: `validate` its configuration
//! (checked on config write and again at dispatch time) and `decide` an
//! action from a silence context. New strategies extend [`StrategyKind`]
//! and the build table.

mod ai;
mod inject;
mod queue;
mod webhook;

pub use ai::AiStrategy;
pub use inject::InjectionStrategy;
pub use queue::QueueStrategy;
pub use webhook::WebhookStrategy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::database::Database;
use crate::error::{ApiError, InvalidInputKind, Result};

/// The four built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Webhook,
    Injection,
    Queue,
    Ai,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Webhook => "webhook",
            StrategyKind::Injection => "injection",
            StrategyKind::Queue => "queue",
            StrategyKind::Ai => "ai",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "webhook" => Some(StrategyKind::Webhook),
            "injection" => Some(StrategyKind::Injection),
            "queue" => Some(StrategyKind::Queue),
            "ai" => Some(StrategyKind::Ai),
            _ => None,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a strategy asks the monitoring session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write the command into the PTY
    Inject(String),
    /// Do nothing; re-arm the timer
    Skip,
    /// Broadcast a message to observers; re-arm the timer
    Notify(String),
    /// Mark the current task completed; stay dormant until output
    Complete,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Inject(_) => "inject",
            Action::Skip => "skip",
            Action::Notify(_) => "notify",
            Action::Complete => "complete",
        }
    }

    /// Whether the timer re-arms immediately after this action.
    pub fn rearms_immediately(&self) -> bool {
        matches!(self, Action::Skip | Action::Notify(_))
    }
}

/// Everything a strategy sees when deciding.
#[derive(Debug, Clone)]
pub struct SilenceContext {
    pub container_id: String,
    pub session_id: String,
    pub docker_id: String,
    pub silence: Duration,
    /// Lossy snapshot of the context ring at fire time
    pub snippet: String,
}

/// Outcome of one decide() call, carried into the automation log.
#[derive(Debug, Clone)]
pub struct Decision {
    pub action: Action,
    pub ai_response: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl Decision {
    pub fn ok(action: Action) -> Self {
        Self {
            action,
            ai_response: None,
            success: true,
            error: None,
        }
    }
}

/// Common strategy contract.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Check the configuration this strategy was built from.
    fn validate(&self) -> Result<()>;

    /// Decide an action for a silence event. Infrastructure failures are
    /// reported inside the [`Decision`], not as `Err`; `Err` is reserved for
    /// cancellation and internal faults.
    async fn decide(&self, ctx: &SilenceContext) -> Result<Decision>;
}

/// Shared dependencies handed to strategy constructors.
#[derive(Clone)]
pub struct StrategyDeps {
    pub db: Arc<Database>,
    pub http: reqwest::Client,
}

/// Build the strategy named by `kind` from its JSON params. The dispatch
/// table new strategies register in.
pub fn build_strategy(
    kind: StrategyKind,
    params: &serde_json::Value,
    deps: &StrategyDeps,
) -> Result<Box<dyn Strategy>> {
    let strategy: Box<dyn Strategy> = match kind {
        StrategyKind::Webhook => Box::new(WebhookStrategy::from_params(params, deps.http.clone())?),
        StrategyKind::Injection => Box::new(InjectionStrategy::from_params(params)?),
        StrategyKind::Queue => Box::new(QueueStrategy::from_params(params, deps.db.clone())?),
        StrategyKind::Ai => Box::new(AiStrategy::from_params(params, deps.http.clone())?),
    };
    Ok(strategy)
}

/// Validate params for a strategy kind without keeping the instance.
pub fn validate_params(
    kind: StrategyKind,
    params: &serde_json::Value,
    deps: &StrategyDeps,
) -> Result<()> {
    build_strategy(kind, params, deps)?.validate()
}

pub(crate) fn params_error(message: impl Into<String>) -> ApiError {
    ApiError::invalid(InvalidInputKind::Other, message)
}

/// Expand the placeholder vocabulary shared by the injection and queue
/// strategies.
pub(crate) fn expand_placeholders(template: &str, ctx: &SilenceContext) -> String {
    template
        .replace("{container_id}", &ctx.container_id)
        .replace("{session_id}", &ctx.session_id)
        .replace("{docker_id}", &ctx.docker_id)
        .replace("{timestamp}", &chrono::Utc::now().to_rfc3339())
        .replace("{silence_duration}", &ctx.silence.as_secs().to_string())
}

#[cfg(test)]
pub(crate) fn test_context() -> SilenceContext {
    SilenceContext {
        container_id: "c1".into(),
        session_id: "s1".into(),
        docker_id: "d0ck3r".into(),
        silence: Duration::from_secs(5),
        snippet: "$ cargo build\n   Compiling drydock".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            StrategyKind::Webhook,
            StrategyKind::Injection,
            StrategyKind::Queue,
            StrategyKind::Ai,
        ] {
            assert_eq!(StrategyKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(StrategyKind::parse("bogus"), None);
    }

    #[test]
    fn test_expand_placeholders() {
        let ctx = test_context();
        let expanded = expand_placeholders(
            "id={container_id} session={session_id} silence={silence_duration} docker={docker_id}",
            &ctx,
        );
        assert_eq!(expanded, "id=c1 session=s1 silence=5 docker=d0ck3r");
    }

    #[test]
    fn test_rearm_semantics() {
        assert!(Action::Skip.rearms_immediately());
        assert!(Action::Notify("m".into()).rearms_immediately());
        assert!(!Action::Inject("x".into()).rearms_immediately());
        assert!(!Action::Complete.rearms_immediately());
    }
}
