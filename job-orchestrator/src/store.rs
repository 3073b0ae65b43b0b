//! JobStore (C4): the transactional facade the scheduler and API talk to.
//! Every write that must be atomic with its audit-log row opens its own
//! transaction here rather than leaving that discipline to the caller.

use crate::model::{Job, StateTransitionRow};
use crate::repo;
use crate::repo::job::JobFilter;
use crate::state_machine::{validate_job_transition, validate_worker_transition, JobStatus, WorkerStatus};
use job_common::retry::with_retry;
use job_common::SafeDisplay;
use sqlx::PgPool;
use uuid::Uuid;

const JOB_TRANSITIONS_TABLE: &str = "job_state_transitions";
const WORKER_TRANSITIONS_TABLE: &str = "worker_state_transitions";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(Uuid),
    #[error(transparent)]
    Transition(#[from] crate::state_machine::StateTransitionError),
    #[error("idempotency key already used with a different request body")]
    IdempotencyConflict,
    #[error("storage error")]
    Storage(#[from] sqlx::Error),
}

impl SafeDisplay for StoreError {
    fn to_safe_string(&self) -> String {
        match self {
            StoreError::JobNotFound(id) => format!("job {id} not found"),
            StoreError::Transition(e) => e.to_safe_string(),
            StoreError::IdempotencyConflict => self.to_string(),
            StoreError::Storage(_) => "internal storage error".to_string(),
        }
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
    )
}

#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_job(
        &self,
        id: Uuid,
        parent_job_id: Option<Uuid>,
        depth: i32,
        task_description: &str,
        worker_count: i32,
    ) -> Result<Job, StoreError> {
        with_retry(
            || async {
                let mut tx = self.pool.begin().await?;
                let job = repo::job::insert(
                    &mut *tx,
                    id,
                    parent_job_id,
                    depth,
                    task_description,
                    worker_count,
                )
                .await?;
                repo::transition::append(
                    &mut *tx,
                    JOB_TRANSITIONS_TABLE,
                    job.id,
                    "submitted",
                    "pending",
                    None,
                )
                .await?;
                let job = repo::job::update_status(&mut *tx, job.id, JobStatus::Pending, None, None).await?;
                tx.commit().await?;
                Ok(job)
            },
            is_transient,
        )
        .await
        .map_err(StoreError::from)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job, StoreError> {
        repo::job::find_by_id(&self.pool, id)
            .await?
            .ok_or(StoreError::JobNotFound(id))
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>, StoreError> {
        Ok(repo::job::list(&self.pool, &filter).await?)
    }

    /// Validates and applies a Job status transition, appending the matching
    /// audit row in the same transaction. Row-locks the job first so two
    /// concurrent transition attempts on the same job serialize.
    pub async fn transition_job(
        &self,
        id: Uuid,
        to: JobStatus,
        reason: Option<&str>,
        output: Option<&serde_json::Value>,
    ) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = repo::job::find_by_id_for_update(&mut *tx, id)
            .await?
            .ok_or(StoreError::JobNotFound(id))?;

        validate_job_transition(&id.to_string(), current.status, to)?;

        repo::transition::append(
            &mut *tx,
            JOB_TRANSITIONS_TABLE,
            id,
            &current.status.to_string(),
            &to.to_string(),
            reason,
        )
        .await?;
        let job = repo::job::update_status(&mut *tx, id, to, reason, output).await?;
        tx.commit().await?;
        Ok(job)
    }

    pub async fn create_worker(&self, id: Uuid, workspace_id: &str) -> Result<(), StoreError> {
        repo::worker::insert(&self.pool, id, workspace_id).await?;
        Ok(())
    }

    pub async fn transition_worker(
        &self,
        id: Uuid,
        to: WorkerStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = repo::worker::find_by_id_for_update(&mut *tx, id)
            .await?
            .ok_or_else(|| StoreError::JobNotFound(id))?;

        validate_worker_transition(&id.to_string(), current.status, to)?;

        repo::transition::append(
            &mut *tx,
            WORKER_TRANSITIONS_TABLE,
            id,
            &current.status.to_string(),
            &to.to_string(),
            reason,
        )
        .await?;
        repo::worker::update_status(&mut *tx, id, to).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn record_allocation(&self, job_id: Uuid, depth: i32, granted: i32) -> Result<(), StoreError> {
        Ok(repo::allocation::upsert(&self.pool, job_id, depth, granted).await?)
    }

    pub async fn clear_allocation(&self, job_id: Uuid, depth: i32) -> Result<bool, StoreError> {
        Ok(repo::allocation::delete(&self.pool, job_id, depth).await?)
    }

    pub async fn clear_all_allocations(&self, job_id: Uuid) -> Result<u64, StoreError> {
        Ok(repo::allocation::delete_all_for_job(&self.pool, job_id).await?)
    }

    /// Returns `(is_fresh, snapshot)`. `is_fresh = false` with a snapshot means
    /// the caller should replay it verbatim; `Err(IdempotencyConflict)` means
    /// the same key was reused with a different request body.
    pub async fn claim_idempotency_key(
        &self,
        key: &str,
        fingerprint: &str,
    ) -> Result<(bool, Option<serde_json::Value>), StoreError> {
        if let Some(existing) = repo::idempotency::find(&self.pool, key).await? {
            return if existing.fingerprint == fingerprint {
                Ok((false, Some(existing.response_snapshot)))
            } else {
                Err(StoreError::IdempotencyConflict)
            };
        }
        Ok((true, None))
    }

    pub async fn store_idempotent_response(
        &self,
        key: &str,
        fingerprint: &str,
        response: &serde_json::Value,
    ) -> Result<(), StoreError> {
        Ok(repo::idempotency::insert(&self.pool, key, fingerprint, response).await?)
    }

    /// Run once at startup: any job left non-terminal by a previous process
    /// is marked failed, per the restart non-goal in §1.
    pub async fn fail_non_terminal_jobs_on_restart(&self) -> Result<u64, StoreError> {
        Ok(repo::job::mark_non_terminal_as_restarted(&self.pool).await?)
    }

    /// Newest-first audit trail for a Job's recorded transitions.
    pub async fn job_history(&self, id: Uuid, limit: i64) -> Result<Vec<StateTransitionRow>, StoreError> {
        Ok(repo::transition::history(&self.pool, JOB_TRANSITIONS_TABLE, id, limit).await?)
    }

    /// Newest-first audit trail for a Worker's recorded transitions.
    pub async fn worker_history(&self, id: Uuid, limit: i64) -> Result<Vec<StateTransitionRow>, StoreError> {
        Ok(repo::transition::history(&self.pool, WORKER_TRANSITIONS_TABLE, id, limit).await?)
    }
}
