use crate::model::Job;
use crate::state_machine::JobStatus;
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

pub struct JobFilter {
    pub depth: Option<i32>,
    pub status: Option<JobStatus>,
    pub parent_job_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn insert<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
    parent_job_id: Option<Uuid>,
    depth: i32,
    task_description: &str,
    worker_count: i32,
) -> Result<Job, sqlx::Error> {
    sqlx::query_as::<_, Job>(
        "INSERT INTO jobs (id, parent_job_id, depth, task_description, worker_count, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, 'submitted', now(), now())
         RETURNING id, parent_job_id, depth, task_description, worker_count, status, created_at, updated_at, started_at, completed_at, error, output",
    )
    .bind(id)
    .bind(parent_job_id)
    .bind(depth)
    .bind(task_description)
    .bind(worker_count)
    .fetch_one(executor)
    .await
}

pub async fn find_by_id<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(
        "SELECT id, parent_job_id, depth, task_description, worker_count, status, created_at, updated_at, started_at, completed_at, error, output
         FROM jobs WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Locks the row for update within the caller's transaction, so concurrent
/// transitions against the same job serialize instead of racing.
pub async fn find_by_id_for_update<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>(
        "SELECT id, parent_job_id, depth, task_description, worker_count, status, created_at, updated_at, started_at, completed_at, error, output
         FROM jobs WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub async fn list<'e>(executor: impl PgExecutor<'e>, filter: &JobFilter) -> Result<Vec<Job>, sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT id, parent_job_id, depth, task_description, worker_count, status, created_at, updated_at, started_at, completed_at, error, output FROM jobs WHERE 1=1",
    );

    if let Some(depth) = filter.depth {
        builder.push(" AND depth = ").push_bind(depth);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status);
    }
    if let Some(parent_job_id) = filter.parent_job_id {
        builder.push(" AND parent_job_id = ").push_bind(parent_job_id);
    }

    builder.push(" ORDER BY created_at DESC LIMIT ");
    builder.push_bind(filter.limit);
    builder.push(" OFFSET ");
    builder.push_bind(filter.offset);

    builder.build_query_as::<Job>().fetch_all(executor).await
}

/// Updates status plus the side-effect timestamps (`started_at`/`completed_at`)
/// and, for failures, the carried error reason. Does not touch the audit log;
/// callers append the matching `StateTransition` row in the same transaction.
pub async fn update_status<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
    status: JobStatus,
    error: Option<&str>,
    output: Option<&serde_json::Value>,
) -> Result<Job, sqlx::Error> {
    sqlx::query_as::<_, Job>(
        "UPDATE jobs SET
            status = $2,
            updated_at = now(),
            started_at = CASE WHEN $2 = 'running' AND started_at IS NULL THEN now() ELSE started_at END,
            completed_at = CASE WHEN $2 IN ('completed', 'failed', 'cancelled') THEN now() ELSE completed_at END,
            error = COALESCE($3, error),
            output = COALESCE($4, output)
         WHERE id = $1
         RETURNING id, parent_job_id, depth, task_description, worker_count, status, created_at, updated_at, started_at, completed_at, error, output",
    )
    .bind(id)
    .bind(status)
    .bind(error)
    .bind(output)
    .fetch_one(executor)
    .await
}

pub async fn mark_non_terminal_as_restarted<'e>(executor: impl PgExecutor<'e>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE jobs SET status = 'failed', error = 'restart', updated_at = now(), completed_at = now()
         WHERE status NOT IN ('completed', 'failed', 'cancelled')",
    )
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
