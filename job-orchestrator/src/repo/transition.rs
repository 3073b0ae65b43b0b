use crate::model::StateTransitionRow;
use sqlx::PgExecutor;
use uuid::Uuid;

pub async fn append<'e>(
    executor: impl PgExecutor<'e>,
    table: &str,
    entity_id: Uuid,
    from_state: &str,
    to_state: &str,
    reason: Option<&str>,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "INSERT INTO {table} (entity_id, from_state, to_state, reason, at) VALUES ($1, $2, $3, $4, now())"
    );
    sqlx::query(&sql)
        .bind(entity_id)
        .bind(from_state)
        .bind(to_state)
        .bind(reason)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn history<'e>(
    executor: impl PgExecutor<'e>,
    table: &str,
    entity_id: Uuid,
    limit: i64,
) -> Result<Vec<StateTransitionRow>, sqlx::Error> {
    let sql = format!(
        "SELECT entity_id, from_state, to_state, reason, at FROM {table}
         WHERE entity_id = $1 ORDER BY at DESC LIMIT $2"
    );
    sqlx::query_as::<_, StateTransitionRow>(&sql)
        .bind(entity_id)
        .bind(limit)
        .fetch_all(executor)
        .await
}
