//! Typed state graphs for Jobs and Workers (C3). Pure validation lives here;
//! the actual read-modify-write-plus-audit-row transaction lives in `store`.

use job_common::SafeDisplay;
use poem_openapi::Enum;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Enum, Type,
)]
#[oai(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Enum, Type,
)]
#[oai(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Terminated,
}

impl WorkerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("illegal transition for {entity_id}: {from} -> {to}")]
pub struct StateTransitionError {
    pub entity_id: String,
    pub from: String,
    pub to: String,
}

impl SafeDisplay for StateTransitionError {
    fn to_safe_string(&self) -> String {
        self.to_string()
    }
}

pub fn can_transition_job(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Submitted, Pending)
            | (Pending, Running)
            | (Pending, Cancelled)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
    )
}

pub fn can_transition_worker(from: WorkerStatus, to: WorkerStatus) -> bool {
    use WorkerStatus::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Idle, Running)
            | (Running, Idle)
            | (Running, Paused)
            | (Paused, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (_, Terminated)
    )
}

pub fn validate_job_transition(
    entity_id: &str,
    from: JobStatus,
    to: JobStatus,
) -> Result<(), StateTransitionError> {
    if can_transition_job(from, to) {
        Ok(())
    } else {
        Err(StateTransitionError {
            entity_id: entity_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

pub fn validate_worker_transition(
    entity_id: &str,
    from: WorkerStatus,
    to: WorkerStatus,
) -> Result<(), StateTransitionError> {
    if can_transition_worker(from, to) {
        Ok(())
    } else {
        Err(StateTransitionError {
            entity_id: entity_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn job_graph_allows_the_documented_path() {
        assert!(can_transition_job(JobStatus::Submitted, JobStatus::Pending));
        assert!(can_transition_job(JobStatus::Pending, JobStatus::Running));
        assert!(can_transition_job(JobStatus::Running, JobStatus::Completed));
        assert!(can_transition_job(JobStatus::Pending, JobStatus::Cancelled));
        assert!(can_transition_job(JobStatus::Running, JobStatus::Cancelled));
    }

    #[test]
    fn job_graph_has_no_egress_from_terminal_states() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for to in [
                JobStatus::Submitted,
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!can_transition_job(terminal, to));
            }
        }
    }

    #[test]
    fn job_graph_rejects_skipping_pending() {
        assert!(!can_transition_job(JobStatus::Submitted, JobStatus::Running));
    }

    #[test]
    fn worker_graph_allows_pause_resume() {
        assert!(can_transition_worker(WorkerStatus::Running, WorkerStatus::Paused));
        assert!(can_transition_worker(WorkerStatus::Paused, WorkerStatus::Running));
    }

    #[test]
    fn worker_graph_allows_terminate_from_any_non_terminal_state() {
        assert!(can_transition_worker(WorkerStatus::Idle, WorkerStatus::Terminated));
        assert!(can_transition_worker(WorkerStatus::Paused, WorkerStatus::Terminated));
    }
}
