use job_common::auth::scopes;
use job_common::db::DbConfig;
use job_orchestrator::bootstrap::Services;
use job_orchestrator::config::JobOrchestratorConfig;
use job_orchestrator::http;
use job_orchestrator::leaf_executor::EchoLeafExecutor;
use job_orchestrator::model::Job;
use job_orchestrator::resource_manager::ResourceManager;
use job_orchestrator::scheduler::Scheduler;
use job_orchestrator::state_machine::JobStatus;
use poem::test::TestClient;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_r::{test, test_dep};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

test_r::enable!();

struct PostgresDb {
    _container: ContainerAsync<Postgres>,
    config: JobOrchestratorConfig,
}

impl PostgresDb {
    async fn new() -> Self {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .expect("failed to start postgres container");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("failed to map postgres port");

        let db = DbConfig {
            host: "localhost".to_string(),
            port,
            database: "postgres".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            max_connections: 10,
            schema: None,
        };

        let mut config = JobOrchestratorConfig::default();
        config.db = db;

        Self {
            _container: container,
            config,
        }
    }
}

#[test_dep]
async fn postgres_db() -> PostgresDb {
    PostgresDb::new().await
}

/// A dedicated container, separate from `postgres_db`, so the restart test
/// can freely mark non-terminal jobs failed without racing jobs other tests
/// have in flight against the shared fixture.
struct RestartPostgresDb(PostgresDb);

#[test_dep]
async fn restart_postgres_db() -> RestartPostgresDb {
    RestartPostgresDb(PostgresDb::new().await)
}

#[test_dep]
async fn services(db: &PostgresDb) -> Services {
    with_retry(|| Services::new(&db.config)).await
}

async fn with_retry<F, Fut, T>(mut f: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    let start = Instant::now();
    loop {
        match f().await {
            Ok(value) => return value,
            Err(err) => {
                if start.elapsed() > Duration::from_secs(30) {
                    panic!("giving up connecting to postgres: {err}");
                }
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
        }
    }
}

async fn wait_for_terminal(services: &Services, job_id: Uuid) -> Job {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let job = services
            .scheduler
            .status(job_id)
            .await
            .expect("job should exist");
        if job.status.is_terminal() {
            return job;
        }
        if Instant::now() > deadline {
            panic!("job {job_id} did not reach a terminal state in time (status: {:?})", job.status);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn all_scopes() -> Vec<String> {
    vec![
        scopes::JOBS_READ.to_string(),
        scopes::JOBS_WRITE.to_string(),
        scopes::RESOURCES_READ.to_string(),
        scopes::RESOURCES_WRITE.to_string(),
        scopes::SUPERVISOR_READ.to_string(),
        scopes::SUPERVISOR_WRITE.to_string(),
    ]
}

fn bearer_token(services: &Services, scope_list: Vec<String>) -> String {
    services
        .auth
        .issue_token("test-user", &scope_list)
        .expect("token should be issued")
}

// S1: a leaf job (no bulleted/numbered/task-prefixed lines) echoes its
// description back as the output summary and completes.
#[test]
async fn leaf_job_completes_with_echoed_summary(services: &Services) {
    let job = services
        .scheduler
        .submit("Write a haiku about the sea".to_string(), 0, None, 1)
        .await
        .expect("submit should succeed");

    let completed = wait_for_terminal(services, job.id).await;
    assert_eq!(completed.status, JobStatus::Completed);
    assert!(completed.started_at.is_some());
    assert!(completed.completed_at.unwrap() >= completed.started_at.unwrap());

    let output = completed.output.expect("completed leaf job has output");
    assert_eq!(
        output["summary"],
        json!("Write a haiku about the sea")
    );
}

// S2: a bulleted description decomposes into one child job per bullet, all
// of which complete, and the parent completes once its children do.
#[test]
async fn decomposed_job_spawns_one_child_per_bullet(services: &Services) {
    let job = services
        .scheduler
        .submit(
            "- Research the topic\n- Draft the outline\n- Write the summary".to_string(),
            0,
            None,
            1,
        )
        .await
        .expect("submit should succeed");

    let completed = wait_for_terminal(services, job.id).await;
    assert_eq!(completed.status, JobStatus::Completed);

    let tree = services
        .scheduler
        .tree(job.id)
        .await
        .expect("tree should be fetchable");
    assert_eq!(tree.children.len(), 3);
    for child in &tree.children {
        assert_eq!(child.depth, 1);
        assert_eq!(child.status, JobStatus::Completed);
    }
}

// S3: cancelling a composed job propagates to its in-flight children and the
// whole subtree ends up in a terminal state with no leaked resource usage.
#[test]
async fn cancelling_root_leaves_no_resource_usage_behind(services: &Services) {
    let job = services
        .scheduler
        .submit(
            "- Slow task A\n- Slow task B\n- Slow task C".to_string(),
            0,
            None,
            1,
        )
        .await
        .expect("submit should succeed");

    services
        .scheduler
        .cancel(job.id)
        .await
        .expect("cancel should not error");

    let root = wait_for_terminal(services, job.id).await;
    assert!(root.status.is_terminal());

    let tree = services
        .scheduler
        .tree(job.id)
        .await
        .expect("tree should be fetchable");
    for child in &tree.children {
        assert!(services.scheduler.status(child.job_id).await.unwrap().status.is_terminal());
    }

    for usage in services.resources.usage() {
        assert_eq!(usage.used, 0, "depth {} leaked allocation", usage.depth);
    }
}

// S4 (B1): a job submitted at the configured max depth is rejected before
// any resources are touched.
#[test]
async fn submitting_beyond_max_depth_is_rejected(services: &Services) {
    let resources = Arc::new(ResourceManager::new(
        [(0, 2), (1, 2)].into_iter().collect(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        services.store.clone(),
        resources,
        Arc::new(EchoLeafExecutor),
        1,
        [(0, 2), (1, 2)].into_iter().collect(),
        services.metrics.clone(),
    ));

    let err = scheduler
        .submit("Task: should never run".to_string(), 1, None, 1)
        .await
        .expect_err("depth 1 is already at max_depth=1, should be rejected");

    assert!(matches!(
        err,
        job_orchestrator::scheduler::SchedulerError::DepthExceeded(1, 1)
    ));
}

// S5 (B2): once a depth's worker quota is exhausted, further allocation
// requests at that depth are rejected without granting partial capacity
// silently above the quota.
#[test]
async fn allocation_is_rejected_once_quota_is_exhausted(services: &Services) {
    let resources = ResourceManager::new([(3, 2)].into_iter().collect());
    let first = resources
        .allocate(&Uuid::new_v4().to_string(), 3, 2)
        .expect("first allocation should fit exactly within quota");
    assert_eq!(first.granted, 2);

    let second = resources.allocate(&Uuid::new_v4().to_string(), 3, 1);
    assert!(second.is_err(), "quota is fully used, further allocation must fail");
}

// S6 / scope enforcement: requests without a bearer token are rejected, and
// requests whose token lacks the required scope get a precise 403 body.
#[test]
async fn http_surface_enforces_auth_and_scopes(services: &Services) {
    let app = http::combined_routes(services);
    let client = TestClient::new(app);

    let resp = client.get("/api/jobs/").send().await;
    resp.assert_status(poem::http::StatusCode::UNAUTHORIZED);

    let read_only = bearer_token(services, vec![scopes::JOBS_READ.to_string()]);
    let resp = client
        .post("/api/jobs/submit")
        .header("Authorization", format!("Bearer {read_only}"))
        .body_json(&json!({"taskDescription": "Write a poem", "workerCount": 1, "depth": 0}))
        .send()
        .await;
    resp.assert_status(poem::http::StatusCode::FORBIDDEN);
    let body = resp.0.into_body().into_bytes().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], json!("missing scope: jobs:write"));
}

// The submitted worker_count is persisted on the Job, not silently pinned to 1.
#[test]
async fn submitted_worker_count_is_persisted_on_the_job(services: &Services) {
    let app = http::combined_routes(services);
    let client = TestClient::new(app);
    let token = bearer_token(services, all_scopes());

    let resp = client
        .post("/api/jobs/submit")
        .header("Authorization", format!("Bearer {token}"))
        .body_json(&json!({"taskDescription": "Plain prose", "workerCount": 4, "depth": 0}))
        .send()
        .await;
    resp.assert_status(poem::http::StatusCode::CREATED);
    let body = resp.0.into_body().into_bytes().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["workerCount"], json!(4));
}

// R2 / idempotency: replaying a submit with the same Idempotency-Key and
// body returns the original job instead of creating a second one; replaying
// with a different body conflicts.
#[test]
async fn idempotency_key_replay_returns_same_job_and_conflicts_on_mismatch(services: &Services) {
    let app = http::combined_routes(services);
    let client = TestClient::new(app);
    let token = bearer_token(services, all_scopes());

    let submit_body = json!({"taskDescription": "Summarize the report", "workerCount": 1, "depth": 0});

    let first = client
        .post("/api/jobs/submit")
        .header("Authorization", format!("Bearer {token}"))
        .header("Idempotency-Key", "replay-key-1")
        .body_json(&submit_body)
        .send()
        .await;
    first.assert_status(poem::http::StatusCode::CREATED);
    let first_body = first.0.into_body().into_bytes().await.unwrap();
    let first_json: serde_json::Value = serde_json::from_slice(&first_body).unwrap();
    let first_id = first_json["id"].as_str().unwrap().to_string();

    let replay = client
        .post("/api/jobs/submit")
        .header("Authorization", format!("Bearer {token}"))
        .header("Idempotency-Key", "replay-key-1")
        .body_json(&submit_body)
        .send()
        .await;
    replay.assert_status(poem::http::StatusCode::CREATED);
    let replay_body = replay.0.into_body().into_bytes().await.unwrap();
    let replay_json: serde_json::Value = serde_json::from_slice(&replay_body).unwrap();
    assert_eq!(replay_json["id"].as_str().unwrap(), first_id);

    let mismatched = client
        .post("/api/jobs/submit")
        .header("Authorization", format!("Bearer {token}"))
        .header("Idempotency-Key", "replay-key-1")
        .body_json(&json!({"taskDescription": "A different task entirely", "workerCount": 1, "depth": 0}))
        .send()
        .await;
    mismatched.assert_status(poem::http::StatusCode::CONFLICT);
}

// B4: cancelling a job that has already reached a terminal state is
// reported as a 400, not silently accepted.
#[test]
async fn cancelling_a_completed_job_is_rejected(services: &Services) {
    let app = http::combined_routes(services);
    let client = TestClient::new(app);
    let token = bearer_token(services, all_scopes());

    let job = services
        .scheduler
        .submit("Plain prose with no sub-tasks".to_string(), 0, None, 1)
        .await
        .expect("submit should succeed");
    wait_for_terminal(services, job.id).await;

    let resp = client
        .post(format!("/api/jobs/{}/cancel", job.id))
        .header("Authorization", format!("Bearer {token}"))
        .send()
        .await;
    resp.assert_status(poem::http::StatusCode::BAD_REQUEST);
}

// Exercises the resources surface end to end: quotas, allocate, usage,
// release, and the hierarchy/supervisor endpoints that require
// supervisor scopes.
#[test]
async fn resource_and_hierarchy_endpoints_round_trip(services: &Services) {
    let app = http::combined_routes(services);
    let client = TestClient::new(app);
    let token = bearer_token(services, all_scopes());
    let job_id = Uuid::new_v4().to_string();

    let resp = client
        .get("/api/resources/quotas")
        .header("Authorization", format!("Bearer {token}"))
        .send()
        .await;
    resp.assert_status_is_ok();

    let resp = client
        .post("/api/resources/allocate")
        .header("Authorization", format!("Bearer {token}"))
        .body_json(&json!({"jobId": job_id, "depth": 0, "workerCount": 1}))
        .send()
        .await;
    resp.assert_status(poem::http::StatusCode::CREATED);

    let resp = client
        .get("/api/resources/usage")
        .header("Authorization", format!("Bearer {token}"))
        .send()
        .await;
    resp.assert_status_is_ok();

    let resp = client
        .post("/api/resources/release")
        .header("Authorization", format!("Bearer {token}"))
        .body_json(&json!({"jobId": job_id, "depth": 0}))
        .send()
        .await;
    resp.assert_status_is_ok();

    let resp = client
        .get("/api/v1/recursion/stats")
        .header("Authorization", format!("Bearer {token}"))
        .send()
        .await;
    resp.assert_status_is_ok();

    let resp = client
        .get("/api/v1/recursion/hierarchy")
        .header("Authorization", format!("Bearer {token}"))
        .send()
        .await;
    resp.assert_status_is_ok();

    let resp = client
        .post("/api/v1/recursion/validate")
        .header("Authorization", format!("Bearer {token}"))
        .body_json(&json!({"currentDepth": 0, "maxDepth": 3}))
        .send()
        .await;
    resp.assert_status_is_ok();
}

// Health endpoint requires no auth and reports the database as reachable.
#[test]
async fn healthcheck_reports_ok_without_auth(services: &Services) {
    let app = http::combined_routes(services);
    let client = TestClient::new(app);

    let resp = client.get("/health").send().await;
    resp.assert_status_is_ok();
}

// Password hashing round-trips through the auth service used by the HTTP
// layer's token issuance, independent of any HTTP concerns.
#[test]
async fn password_hash_round_trips(services: &Services) {
    let hash = services
        .auth
        .hash_password("correct horse battery staple")
        .expect("hashing should succeed");
    assert!(services
        .auth
        .verify_password("correct horse battery staple", &hash)
        .expect("verification should not error"));
    assert!(!services
        .auth
        .verify_password("wrong password", &hash)
        .expect("verification should not error"));
}

// Restart recovery: jobs left non-terminal by a prior process are marked
// failed the next time `Services` boots against the same database.
#[test]
async fn restart_marks_leftover_non_terminal_jobs_failed(db: &RestartPostgresDb) {
    let services = with_retry(|| Services::new(&db.0.config)).await;

    let job_id = Uuid::new_v4();
    services
        .store
        .create_job(job_id, None, 0, "orphaned by a crashed process", 1)
        .await
        .expect("job should be created");

    let restarted = Services::new(&db.0.config)
        .await
        .expect("services should build again")
        .store
        .get_job(job_id)
        .await
        .expect("job should still exist after a second boot");

    assert_eq!(restarted.status, JobStatus::Failed);
    assert_eq!(restarted.error.as_deref(), Some("restart"));
}

// The audit trail recorded alongside a job's transitions is queryable
// newest-first, independent of the HTTP surface.
#[test]
async fn job_history_is_recorded_newest_first(services: &Services) {
    let job = services
        .scheduler
        .submit("Plain prose, a leaf job".to_string(), 0, None, 1)
        .await
        .expect("submit should succeed");
    wait_for_terminal(services, job.id).await;

    let history = services
        .store
        .job_history(job.id, 10)
        .await
        .expect("history should be queryable");
    assert!(history.len() >= 2, "submitted->pending and a terminal transition should both be recorded");
    assert!(history[0].at >= history[history.len() - 1].at);
}

// §4.5.4's advisory retry helper is not wired into the default aggregation
// path, but a caller that invokes it explicitly gets a fresh resubmission of
// the same task, not a mutation of the failed job in place.
#[test]
async fn handle_sub_job_failure_resubmits_a_fresh_job(services: &Services) {
    let failed = services
        .scheduler
        .submit("Plain prose, will be treated as already failed".to_string(), 1, None, 1)
        .await
        .expect("submit should succeed");
    wait_for_terminal(services, failed.id).await;

    let retried = services
        .scheduler
        .handle_sub_job_failure(&failed, 0)
        .await
        .expect("retry budget should allow a first retry");
    assert_ne!(retried.id, failed.id);
    assert_eq!(retried.task_description, failed.task_description);
    assert_eq!(retried.depth, failed.depth);

    assert!(
        services
            .scheduler
            .handle_sub_job_failure(&failed, 2)
            .await
            .is_none(),
        "retry budget is exhausted at MAX_RETRIES"
    );
}

// Worker lifecycle (C3/C4's other entity graph): creation starts a worker
// idle, a legal transition is recorded in its own audit table, and an
// illegal one is rejected rather than silently applied.
#[test]
async fn worker_transitions_are_validated_and_logged(services: &Services) {
    let worker_id = Uuid::new_v4();
    services
        .store
        .create_worker(worker_id, "workspace-1")
        .await
        .expect("worker should be created idle");

    services
        .store
        .transition_worker(worker_id, job_orchestrator::state_machine::WorkerStatus::Running, None)
        .await
        .expect("idle -> running is legal");

    let illegal = services
        .store
        .transition_worker(worker_id, job_orchestrator::state_machine::WorkerStatus::Idle, None)
        .await;
    assert!(illegal.is_ok(), "running -> idle is legal per the worker graph");

    let terminate = services
        .store
        .transition_worker(
            worker_id,
            job_orchestrator::state_machine::WorkerStatus::Completed,
            None,
        )
        .await;
    assert!(terminate.is_err(), "idle -> completed is not a documented edge");

    let history = services
        .store
        .worker_history(worker_id, 10)
        .await
        .expect("worker history should be queryable");
    assert_eq!(history.len(), 2, "idle->running and running->idle should both be logged");
}

#[test]
fn unauthenticated_scope_set_has_no_supervisor_access() {
    let empty_scopes: HashSet<String> = HashSet::new();
    let token = job_common::auth::TokenData {
        user_id: "anon".to_string(),
        scopes: empty_scopes,
    };
    assert!(job_common::auth::require_scope(&token, scopes::SUPERVISOR_READ).is_err());
}
