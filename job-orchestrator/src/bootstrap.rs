//! Config & bootstrap (C9): wires C1-C8 into a runnable set of services.
//! `server.rs` is the only caller; kept separate so integration tests can
//! build the same `Services` without going through `main`.

use crate::auth::AuthService;
use crate::config::JobOrchestratorConfig;
use crate::leaf_executor::{EchoLeafExecutor, LeafExecutor};
use crate::metrics::Metrics;
use crate::resource_manager::ResourceManager;
use crate::scheduler::Scheduler;
use crate::store::JobStore;
use include_dir::{include_dir, Dir};
use job_common::auth::TokenVerifier;
use sqlx::PgPool;
use std::sync::Arc;

static MIGRATIONS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/migrations");

#[derive(Clone)]
pub struct Services {
    pub config: JobOrchestratorConfig,
    pub pool: PgPool,
    pub store: JobStore,
    pub scheduler: Arc<Scheduler>,
    pub resources: Arc<ResourceManager>,
    pub auth: Arc<AuthService>,
    pub metrics: Arc<Metrics>,
}

impl Services {
    pub async fn new(config: &JobOrchestratorConfig) -> anyhow::Result<Self> {
        let pool = job_common::db::configured_pool(&config.db, &MIGRATIONS).await?;
        let store = JobStore::new(pool.clone());

        let restarted = store.fail_non_terminal_jobs_on_restart().await?;
        if restarted > 0 {
            tracing::warn!(count = restarted, "marked leftover non-terminal jobs failed on restart");
        }

        let resources = Arc::new(ResourceManager::new(config.recursion.workers_by_depth.clone()));
        let leaf_executor: Arc<dyn LeafExecutor> = Arc::new(EchoLeafExecutor);
        let metrics = Arc::new(Metrics::new());
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            resources.clone(),
            leaf_executor,
            config.recursion.max_depth,
            config.recursion.workers_by_depth.clone(),
            metrics.clone(),
        ));
        let auth = Arc::new(AuthService::new(
            config.auth.jwt_secret.clone(),
            config.auth.token_ttl_minutes,
        ));

        Ok(Self {
            config: config.clone(),
            pool,
            store,
            scheduler,
            resources,
            auth,
            metrics,
        })
    }

    pub fn token_verifier(&self) -> Arc<dyn TokenVerifier> {
        self.auth.clone()
    }
}
