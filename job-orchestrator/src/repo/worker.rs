use crate::model::Worker;
use crate::state_machine::WorkerStatus;
use sqlx::PgExecutor;
use uuid::Uuid;

pub async fn insert<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
    workspace_id: &str,
) -> Result<Worker, sqlx::Error> {
    sqlx::query_as::<_, Worker>(
        "INSERT INTO workers (id, workspace_id, status, created_at, updated_at)
         VALUES ($1, $2, 'idle', now(), now())
         RETURNING id, workspace_id, status, created_at, updated_at",
    )
    .bind(id)
    .bind(workspace_id)
    .fetch_one(executor)
    .await
}

pub async fn find_by_id_for_update<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Option<Worker>, sqlx::Error> {
    sqlx::query_as::<_, Worker>(
        "SELECT id, workspace_id, status, created_at, updated_at FROM workers WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub async fn update_status<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
    status: WorkerStatus,
) -> Result<Worker, sqlx::Error> {
    sqlx::query_as::<_, Worker>(
        "UPDATE workers SET status = $2, updated_at = now() WHERE id = $1
         RETURNING id, workspace_id, status, created_at, updated_at",
    )
    .bind(id)
    .bind(status)
    .fetch_one(executor)
    .await
}
