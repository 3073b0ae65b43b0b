use crate::model::ResourceAllocationRow;
use sqlx::PgExecutor;
use uuid::Uuid;

pub async fn upsert<'e>(
    executor: impl PgExecutor<'e>,
    job_id: Uuid,
    depth: i32,
    granted_workers: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO resource_allocations (job_id, depth, granted_workers)
         VALUES ($1, $2, $3)
         ON CONFLICT (job_id, depth) DO UPDATE SET granted_workers = EXCLUDED.granted_workers",
    )
    .bind(job_id)
    .bind(depth)
    .bind(granted_workers)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn delete<'e>(executor: impl PgExecutor<'e>, job_id: Uuid, depth: i32) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM resource_allocations WHERE job_id = $1 AND depth = $2")
        .bind(job_id)
        .bind(depth)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete_all_for_job<'e>(executor: impl PgExecutor<'e>, job_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM resource_allocations WHERE job_id = $1")
        .bind(job_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn find_for_job<'e>(
    executor: impl PgExecutor<'e>,
    job_id: Uuid,
) -> Result<Vec<ResourceAllocationRow>, sqlx::Error> {
    sqlx::query_as::<_, ResourceAllocationRow>(
        "SELECT job_id, depth, granted_workers FROM resource_allocations WHERE job_id = $1",
    )
    .bind(job_id)
    .fetch_all(executor)
    .await
}
