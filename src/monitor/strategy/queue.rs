//! Task queue strategy
//!
//! Consumes the container's task queue one silence at a time: the previous
//! in-progress task is completed, the lowest-order pending task moves to
//! in-progress, and its text is expanded into the prompt template. An empty
//! queue produces a `queue_empty` notification.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::database::{Database, TaskStatus};
use crate::error::{ApiError, Result};

use super::{
    expand_placeholders, params_error, Action, Decision, SilenceContext, Strategy, StrategyKind,
};

fn default_prompt_template() -> String {
    "{task}".to_string()
}

#[derive(Debug, Deserialize)]
struct QueueParams {
    #[serde(default = "default_prompt_template")]
    prompt_template: String,
}

pub struct QueueStrategy {
    prompt_template: String,
    db: Arc<Database>,
}

impl QueueStrategy {
    pub fn from_params(params: &serde_json::Value, db: Arc<Database>) -> Result<Self> {
        let params: QueueParams = serde_json::from_value(params.clone())
            .map_err(|e| params_error(format!("queue params: {}", e)))?;
        Ok(Self {
            prompt_template: params.prompt_template,
            db,
        })
    }
}

#[async_trait]
impl Strategy for QueueStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Queue
    }

    fn validate(&self) -> Result<()> {
        if self.prompt_template.trim().is_empty() {
            return Err(params_error("queue prompt template must not be empty"));
        }
        if !self.prompt_template.contains("{task}") {
            return Err(params_error("queue prompt template must contain {task}"));
        }
        Ok(())
    }

    async fn decide(&self, ctx: &SilenceContext) -> Result<Decision> {
        self.validate()?;

        let conn = self.db.conn().await;

        // Complete whatever was in flight before taking the next task.
        if let Some(current) = self
            .db
            .tasks
            .current(&conn, &ctx.container_id)
            .map_err(internal)?
        {
            debug!("Queue strategy completing task {}", current.id);
            self.db
                .tasks
                .transition(&conn, &current.id, TaskStatus::Completed)
                .map_err(internal)?;
        }

        let Some(next) = self
            .db
            .tasks
            .next_pending(&conn, &ctx.container_id)
            .map_err(internal)?
        else {
            return Ok(Decision::ok(Action::Notify("queue_empty".to_string())));
        };

        self.db
            .tasks
            .transition(&conn, &next.id, TaskStatus::InProgress)
            .map_err(internal)?;
        drop(conn);

        let prompt = expand_placeholders(
            &self.prompt_template.replace("{task}", &next.text),
            ctx,
        );
        Ok(Decision::ok(Action::Inject(format!("{}\n", prompt))))
    }
}

fn internal(e: crate::database::DatabaseError) -> ApiError {
    ApiError::Internal(format!("task queue: {}", e))
}

#[cfg(test)]
mod tests {
    use super::super::test_context;
    use super::*;

    async fn setup() -> (Arc<Database>, QueueStrategy) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let strategy = QueueStrategy::from_params(
            &serde_json::json!({"prompt_template": "do: {task}"}),
            db.clone(),
        )
        .unwrap();
        (db, strategy)
    }

    #[tokio::test]
    async fn test_drains_in_order_then_notifies_empty() {
        let (db, strategy) = setup().await;
        {
            let conn = db.conn().await;
            for (i, text) in ["a", "b", "c"].iter().enumerate() {
                db.tasks
                    .add(&conn, "c1", &format!("t{}", i), text)
                    .unwrap();
            }
        }

        let ctx = test_context();

        for expected in ["do: a\n", "do: b\n", "do: c\n"] {
            let decision = strategy.decide(&ctx).await.unwrap();
            match decision.action {
                Action::Inject(command) => assert_eq!(command, expected),
                other => panic!("unexpected action: {:?}", other),
            }
        }

        // Fourth silence: queue is drained
        let decision = strategy.decide(&ctx).await.unwrap();
        assert_eq!(decision.action, Action::Notify("queue_empty".to_string()));

        // All three ended completed
        let conn = db.conn().await;
        let tasks = db.tasks.list(&conn, "c1").unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_completes_previous_before_next() {
        let (db, strategy) = setup().await;
        {
            let conn = db.conn().await;
            db.tasks.add(&conn, "c1", "t0", "first").unwrap();
            db.tasks.add(&conn, "c1", "t1", "second").unwrap();
        }

        let ctx = test_context();
        strategy.decide(&ctx).await.unwrap();

        {
            let conn = db.conn().await;
            let t0 = db.tasks.get(&conn, "t0").unwrap().unwrap();
            assert_eq!(t0.status, TaskStatus::InProgress);
        }

        strategy.decide(&ctx).await.unwrap();

        let conn = db.conn().await;
        let t0 = db.tasks.get(&conn, "t0").unwrap().unwrap();
        let t1 = db.tasks.get(&conn, "t1").unwrap().unwrap();
        assert_eq!(t0.status, TaskStatus::Completed);
        assert_eq!(t1.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_template_validation() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let missing_task = QueueStrategy::from_params(
            &serde_json::json!({"prompt_template": "no placeholder"}),
            db,
        )
        .unwrap();
        assert!(missing_task.validate().is_err());
    }
}
