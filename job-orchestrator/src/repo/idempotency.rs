use sqlx::PgExecutor;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub key: String,
    pub fingerprint: String,
    pub response_snapshot: serde_json::Value,
}

pub async fn find<'e>(
    executor: impl PgExecutor<'e>,
    key: &str,
) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
    sqlx::query_as::<_, IdempotencyRecord>(
        "SELECT key, fingerprint, response_snapshot FROM idempotency_keys WHERE key = $1",
    )
    .bind(key)
    .fetch_optional(executor)
    .await
}

pub async fn insert<'e>(
    executor: impl PgExecutor<'e>,
    key: &str,
    fingerprint: &str,
    response_snapshot: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO idempotency_keys (key, fingerprint, response_snapshot, first_seen_at)
         VALUES ($1, $2, $3, now())",
    )
    .bind(key)
    .bind(fingerprint)
    .bind(response_snapshot)
    .execute(executor)
    .await?;
    Ok(())
}
