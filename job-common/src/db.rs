use crate::SafeDisplay;
use include_dir::Dir;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::fmt::Write;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_connections: u32,
    pub schema: Option<String>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "job_orchestrator".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            max_connections: 10,
            schema: None,
        }
    }
}

impl SafeDisplay for DbConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "host: {}", self.host);
        let _ = writeln!(&mut result, "port: {}", self.port);
        let _ = writeln!(&mut result, "database: {}", self.database);
        let _ = writeln!(&mut result, "username: {}", self.username);
        let _ = writeln!(&mut result, "password: ****");
        let _ = writeln!(&mut result, "max_connections: {}", self.max_connections);
        result
    }
}

impl DbConfig {
    fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(&self.password);
        if let Some(schema) = &self.schema {
            options = options.options([("search_path", schema.as_str())]);
        }
        options
    }
}

/// Connects a pool and, before returning it, runs embedded migrations against
/// the target database so the process never serves traffic against a schema
/// it hasn't verified.
pub async fn configured_pool(
    config: &DbConfig,
    migrations: &'static Dir<'static>,
) -> Result<PgPool, anyhow::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(config.connect_options())
        .await?;
    migrate(&pool, migrations).await?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool, migrations: &'static Dir<'static>) -> Result<(), anyhow::Error> {
    let mut files: Vec<_> = migrations
        .files()
        .filter(|f| f.path().extension().is_some_and(|ext| ext == "sql"))
        .collect();
    files.sort_by_key(|f| f.path().to_path_buf());

    let mut tx = pool.begin().await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS job_orchestrator_schema_history (
            version TEXT PRIMARY KEY,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(&mut *tx)
    .await?;

    for file in files {
        let version = file.path().to_string_lossy().to_string();
        let already_applied: Option<(String,)> = sqlx::query_as(
            "SELECT version FROM job_orchestrator_schema_history WHERE version = $1",
        )
        .bind(&version)
        .fetch_optional(&mut *tx)
        .await?;

        if already_applied.is_some() {
            continue;
        }

        let sql = file.contents_utf8().ok_or_else(|| {
            anyhow::anyhow!("migration {version} is not valid UTF-8")
        })?;
        tracing::info!(version = %version, "applying migration");
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO job_orchestrator_schema_history (version) VALUES ($1)")
            .bind(&version)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}
