//! LeafExecutor port (C8). The scheduler calls this when a job cannot or
//! should not decompose further. The in-tree `EchoLeafExecutor` keeps the
//! scheduler independently testable without a real task-execution engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use job_common::SafeDisplay;
use serde_json::Value;
use uuid::Uuid;

const SUMMARY_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct LeafContext {
    pub job_id: Uuid,
    pub depth: u32,
    pub ancestor_ids: Vec<Uuid>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LeafResult {
    pub summary: String,
    pub details: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
#[error("leaf execution failed: {message}")]
pub struct LeafExecutorError {
    pub message: String,
}

impl SafeDisplay for LeafExecutorError {
    fn to_safe_string(&self) -> String {
        self.to_string()
    }
}

#[async_trait]
pub trait LeafExecutor: Send + Sync {
    async fn execute(&self, request: &str, context: LeafContext) -> Result<LeafResult, LeafExecutorError>;
}

/// Echoes the request back, truncated to the summary limit. Production
/// deployments wire in a real executor; this one exists so the scheduler
/// has something to call in tests and in a bare bootstrap.
#[derive(Debug, Clone, Default)]
pub struct EchoLeafExecutor;

#[async_trait]
impl LeafExecutor for EchoLeafExecutor {
    async fn execute(&self, request: &str, context: LeafContext) -> Result<LeafResult, LeafExecutorError> {
        if Utc::now() > context.deadline {
            return Err(LeafExecutorError {
                message: "timeout".to_string(),
            });
        }
        let summary = if request.chars().count() > SUMMARY_LIMIT {
            request.chars().take(SUMMARY_LIMIT).collect()
        } else {
            request.to_string()
        };
        Ok(LeafResult {
            summary,
            details: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    fn context() -> LeafContext {
        LeafContext {
            job_id: Uuid::new_v4(),
            depth: 0,
            ancestor_ids: vec![],
            deadline: Utc::now() + chrono::Duration::seconds(60),
        }
    }

    #[tokio::test]
    async fn echoes_short_request_verbatim() {
        let executor = EchoLeafExecutor;
        let result = executor.execute("do the thing", context()).await.unwrap();
        assert_eq!(result.summary, "do the thing");
    }

    #[tokio::test]
    async fn truncates_long_request_to_summary_limit() {
        let executor = EchoLeafExecutor;
        let request = "x".repeat(500);
        let result = executor.execute(&request, context()).await.unwrap();
        assert_eq!(result.summary.chars().count(), SUMMARY_LIMIT);
    }

    #[tokio::test]
    async fn rejects_requests_past_their_deadline() {
        let executor = EchoLeafExecutor;
        let mut ctx = context();
        ctx.deadline = Utc::now() - chrono::Duration::seconds(1);
        assert!(executor.execute("late", ctx).await.is_err());
    }
}
