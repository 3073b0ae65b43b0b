//! The orchestrator core (C5). One logical task drives each in-flight job:
//! it transitions the job through the state machine, decomposes the request,
//! spawns and awaits children under a depth-scoped semaphore, and always
//! releases its resource allocation on the way out, success or not.

use crate::leaf_executor::{LeafContext, LeafExecutor, LeafExecutorError};
use crate::metrics::Metrics;
use crate::model::Job;
use crate::recursion::RecursionValidator;
use crate::repo::job::JobFilter;
use crate::resource_manager::{AllocationError, ResourceManager};
use crate::state_machine::JobStatus;
use crate::store::{JobStore, StoreError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;
use job_common::SafeDisplay;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const MAX_TASK_DESCRIPTION_LEN: usize = 4096;
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);
const CANCEL_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("task description must be between 1 and {MAX_TASK_DESCRIPTION_LEN} characters")]
    InvalidTaskDescription,
    #[error("depth {0} exceeds max depth {1}")]
    DepthExceeded(u32, u32),
    #[error("parent job {0} not found")]
    ParentNotFound(Uuid),
    #[error("parent job {0} is at depth {1}, child depth must be {2}")]
    DepthMismatch(Uuid, i32, i32),
    #[error("job {0} not found")]
    JobNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SafeDisplay for SchedulerError {
    fn to_safe_string(&self) -> String {
        match self {
            SchedulerError::Store(e) => e.to_safe_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum JobRunError {
    #[error(transparent)]
    Leaf(#[from] LeafExecutorError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SafeDisplay for JobRunError {
    fn to_safe_string(&self) -> String {
        match self {
            JobRunError::Leaf(e) => e.to_safe_string(),
            JobRunError::Allocation(e) => e.to_safe_string(),
            JobRunError::Store(e) => e.to_safe_string(),
        }
    }
}

enum JobOutcome {
    Completed(serde_json::Value),
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone)]
pub struct JobTree {
    pub job_id: Uuid,
    pub depth: i32,
    pub status: JobStatus,
    pub children: Vec<JobTree>,
}

#[derive(Default)]
struct StatsInner {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

#[derive(Default)]
struct Inner {
    /// One cancellation token per in-flight job; removed once its driving
    /// task finishes, win or lose.
    tokens: HashMap<Uuid, CancellationToken>,
}

pub struct Scheduler {
    store: JobStore,
    resources: Arc<ResourceManager>,
    validator: RecursionValidator,
    leaf_executor: Arc<dyn LeafExecutor>,
    max_depth: u32,
    workers_by_depth: HashMap<u32, u32>,
    inner: Mutex<Inner>,
    stats: StatsInner,
    metrics: Arc<Metrics>,
}

impl Scheduler {
    pub fn new(
        store: JobStore,
        resources: Arc<ResourceManager>,
        leaf_executor: Arc<dyn LeafExecutor>,
        max_depth: u32,
        workers_by_depth: HashMap<u32, u32>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            resources,
            validator: RecursionValidator::new(),
            leaf_executor,
            max_depth,
            workers_by_depth,
            inner: Mutex::new(Inner::default()),
            metrics,
            stats: StatsInner::default(),
        }
    }

    /// Root entry point (§4.5.1). Used directly by the HTTP surface; the
    /// composed branch of a running job calls `spawn` for its children
    /// instead, so it can hand down ancestor ids and a child cancellation
    /// token rather than starting a fresh subtree.
    pub async fn submit(
        self: &Arc<Self>,
        task_description: String,
        depth: u32,
        parent_job_id: Option<Uuid>,
        worker_count: u32,
    ) -> Result<Job, SchedulerError> {
        let cancel = CancellationToken::new();
        let (job, _handle) = self
            .spawn(task_description, depth, parent_job_id, worker_count, Vec::new(), cancel)
            .await?;
        Ok(job)
    }

    async fn spawn(
        self: &Arc<Self>,
        task_description: String,
        depth: u32,
        parent_job_id: Option<Uuid>,
        worker_count: u32,
        ancestor_ids: Vec<Uuid>,
        cancel: CancellationToken,
    ) -> Result<(Job, JoinHandle<()>), SchedulerError> {
        let len = task_description.chars().count();
        if len == 0 || len > MAX_TASK_DESCRIPTION_LEN {
            return Err(SchedulerError::InvalidTaskDescription);
        }

        let timeout_secs = match parent_job_id {
            Some(parent_id) => {
                let parent = self
                    .store
                    .get_job(parent_id)
                    .await
                    .map_err(|_| SchedulerError::ParentNotFound(parent_id))?;
                if parent.depth + 1 != depth as i32 {
                    return Err(SchedulerError::DepthMismatch(
                        parent_id,
                        parent.depth,
                        depth as i32,
                    ));
                }
                let validation = self.validator.validate_depth(
                    parent.depth as i64,
                    self.max_depth as i64,
                    &self.workers_by_depth,
                );
                if !validation.is_valid {
                    return Err(SchedulerError::DepthExceeded(depth, self.max_depth));
                }
                validation.adjusted_timeout_secs
            }
            None => {
                if depth > self.max_depth {
                    return Err(SchedulerError::DepthExceeded(depth, self.max_depth));
                }
                self.validator
                    .validate_depth(depth as i64, self.max_depth as i64, &self.workers_by_depth)
                    .adjusted_timeout_secs
            }
        };

        let job_id = Uuid::new_v4();
        let ancestor_strings: Vec<String> = ancestor_ids.iter().map(Uuid::to_string).collect();
        if self
            .validator
            .detect_circular_reference(&ancestor_strings, &job_id.to_string())
        {
            return Err(SchedulerError::DepthExceeded(depth, self.max_depth));
        }

        let job = self
            .store
            .create_job(job_id, parent_job_id, depth as i32, &task_description, worker_count as i32)
            .await?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        {
            let mut inner = self.inner.lock().unwrap();
            inner.tokens.insert(job_id, cancel.clone());
        }

        let scheduler = self.clone();
        let drive_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            scheduler
                .drive(
                    job_id,
                    depth,
                    task_description,
                    ancestor_ids,
                    drive_cancel,
                    timeout_secs.max(1),
                )
                .await;
        });

        Ok((job, handle))
    }

    /// The per-job coroutine (§4.5.2-4.5.3): runs the body, races it against
    /// the depth's wall-clock budget, then records exactly one terminal
    /// transition and releases every resource the job (or its leaf) held.
    async fn drive(
        self: Arc<Self>,
        job_id: Uuid,
        depth: u32,
        task_description: String,
        ancestor_ids: Vec<Uuid>,
        cancel: CancellationToken,
        timeout_secs: u64,
    ) {
        let deadline = Utc::now() + ChronoDuration::seconds(timeout_secs as i64);
        let sleep = tokio::time::sleep(Duration::from_secs(timeout_secs));
        tokio::pin!(sleep);
        let body = self
            .clone()
            .run_job(job_id, depth, task_description, ancestor_ids, cancel.clone(), deadline);
        tokio::pin!(body);

        let (outcome, timed_out) = tokio::select! {
            biased;
            res = &mut body => (res, false),
            _ = &mut sleep => {
                cancel.cancel();
                (body.await, true)
            }
        };

        self.resources.cleanup(&job_id.to_string());
        let active_jobs = {
            let mut inner = self.inner.lock().unwrap();
            inner.tokens.remove(&job_id);
            inner.tokens.len() as i64
        };
        self.metrics.refresh_gauges(active_jobs, &self.resources.usage());

        let transition_result = match outcome {
            Ok(JobOutcome::Completed(output)) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_job_outcome("completed");
                self.store
                    .transition_job(job_id, JobStatus::Completed, None, Some(&output))
                    .await
            }
            Ok(JobOutcome::Cancelled) if timed_out => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_job_outcome("timeout");
                self.store
                    .transition_job(job_id, JobStatus::Failed, Some("timeout"), None)
                    .await
            }
            Ok(JobOutcome::Cancelled) => {
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_job_outcome("cancelled");
                self.store
                    .transition_job(job_id, JobStatus::Cancelled, Some("cancelled"), None)
                    .await
            }
            Err(err) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_job_outcome("failed");
                self.store
                    .transition_job(job_id, JobStatus::Failed, Some(&err.to_safe_string()), None)
                    .await
            }
        };

        if let Err(err) = transition_result {
            tracing::warn!(
                job_id = %job_id,
                error = %err.to_safe_string(),
                "could not record terminal transition (job likely already terminal)"
            );
        }
    }

    async fn run_job(
        self: Arc<Self>,
        job_id: Uuid,
        depth: u32,
        task_description: String,
        ancestor_ids: Vec<Uuid>,
        cancel: CancellationToken,
        deadline: DateTime<Utc>,
    ) -> Result<JobOutcome, JobRunError> {
        if cancel.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }
        self.store
            .transition_job(job_id, JobStatus::Running, None, None)
            .await?;

        let sub_tasks = decompose(&task_description);
        let validation = self.validator.validate_depth(
            depth as i64,
            self.max_depth as i64,
            &self.workers_by_depth,
        );
        let allow_children = validation.is_valid;

        if sub_tasks.is_empty() || !allow_children {
            return self
                .run_leaf(job_id, depth, &task_description, ancestor_ids, cancel, deadline)
                .await;
        }

        self.run_composed(
            job_id,
            depth,
            sub_tasks,
            ancestor_ids,
            cancel,
            validation.max_workers,
        )
        .await
    }

    async fn run_leaf(
        &self,
        job_id: Uuid,
        depth: u32,
        task_description: &str,
        ancestor_ids: Vec<Uuid>,
        cancel: CancellationToken,
        deadline: DateTime<Utc>,
    ) -> Result<JobOutcome, JobRunError> {
        let scope = self.resources.resource_scope(&job_id.to_string(), depth, 1)?;
        let context = LeafContext {
            job_id,
            depth,
            ancestor_ids,
            deadline,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                drop(scope);
                return Ok(JobOutcome::Cancelled);
            }
            res = self.leaf_executor.execute(task_description, context) => res?,
        };
        drop(scope);

        Ok(JobOutcome::Completed(json!({
            "summary": result.summary,
            "details": result.details,
        })))
    }

    async fn run_composed(
        self: Arc<Self>,
        job_id: Uuid,
        depth: u32,
        sub_tasks: Vec<String>,
        ancestor_ids: Vec<Uuid>,
        cancel: CancellationToken,
        child_cap: u32,
    ) -> Result<JobOutcome, JobRunError> {
        let semaphore = Arc::new(Semaphore::new(child_cap.max(1) as usize));
        let mut child_ids = Vec::with_capacity(sub_tasks.len());
        let mut waiters = Vec::with_capacity(sub_tasks.len());
        let mut interrupted = false;

        for sub_task in sub_tasks {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => { interrupted = true; break; }
                res = semaphore.clone().acquire_owned() => res.expect("semaphore is never closed"),
            };

            let mut child_ancestors = ancestor_ids.clone();
            child_ancestors.push(job_id);

            match self
                .spawn(
                    sub_task,
                    depth + 1,
                    Some(job_id),
                    1,
                    child_ancestors,
                    cancel.child_token(),
                )
                .await
            {
                Ok((child, handle)) => {
                    child_ids.push(child.id);
                    waiters.push(tokio::spawn(async move {
                        let _permit = permit;
                        let _ = handle.await;
                    }));
                }
                Err(_) => drop(permit),
            }
        }

        for waiter in waiters {
            let _ = waiter.await;
        }

        if interrupted || cancel.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }

        let mut errors = Vec::new();
        for child_id in &child_ids {
            if let Ok(child) = self.store.get_job(*child_id).await {
                if child.status == JobStatus::Failed {
                    errors.push(child.error.unwrap_or_default());
                }
            }
        }

        Ok(JobOutcome::Completed(json!({
            "children": child_ids,
            "errors": errors,
        })))
    }

    /// §4.5.3: signals cooperative cancellation and waits, bounded, for the
    /// job's own task to drive it into a terminal state. Idempotent: a
    /// cancel of an already-terminal or unknown job is a no-op.
    pub async fn cancel(self: &Arc<Self>, job_id: Uuid) -> Result<bool, SchedulerError> {
        let job = self
            .store
            .get_job(job_id)
            .await
            .map_err(|_| SchedulerError::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            return Ok(false);
        }

        let token = {
            let inner = self.inner.lock().unwrap();
            inner.tokens.get(&job_id).cloned()
        };
        let Some(token) = token else {
            return Ok(false);
        };
        token.cancel();

        let wait_until = std::time::Instant::now() + CANCEL_WAIT_TIMEOUT;
        loop {
            match self.store.get_job(job_id).await {
                Ok(job) if job.status.is_terminal() => break,
                _ if std::time::Instant::now() >= wait_until => break,
                _ => tokio::time::sleep(CANCEL_POLL_INTERVAL).await,
            }
        }

        Ok(true)
    }

    pub async fn status(&self, job_id: Uuid) -> Result<Job, SchedulerError> {
        Ok(self.store.get_job(job_id).await.map_err(|_| SchedulerError::JobNotFound(job_id))?)
    }

    pub async fn list(&self, filter: JobFilter) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.store.list_jobs(filter).await?)
    }

    /// §4.5.5. Recurses over children fetched fresh from the store, so the
    /// tree always reflects durable state rather than a possibly-stale
    /// in-memory mirror.
    pub fn tree<'a>(&'a self, job_id: Uuid) -> BoxFuture<'a, Result<JobTree, SchedulerError>> {
        Box::pin(async move {
            let job = self
                .store
                .get_job(job_id)
                .await
                .map_err(|_| SchedulerError::JobNotFound(job_id))?;
            let child_jobs = self
                .store
                .list_jobs(JobFilter {
                    depth: None,
                    status: None,
                    parent_job_id: Some(job_id),
                    limit: 500,
                    offset: 0,
                })
                .await?;

            let mut children = Vec::with_capacity(child_jobs.len());
            for child in child_jobs {
                children.push(self.tree(child.id).await?);
            }

            Ok(JobTree {
                job_id: job.id,
                depth: job.depth,
                status: job.status,
                children,
            })
        })
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
        }
    }

    pub fn active_jobs(&self) -> i64 {
        self.inner.lock().unwrap().tokens.len() as i64
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn workers_by_depth(&self) -> &HashMap<u32, u32> {
        &self.workers_by_depth
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn validator(&self) -> &RecursionValidator {
        &self.validator
    }

    /// Advisory retry policy for a failed sub-job (§4.5.4). Not called by
    /// `run_composed`, which aggregates-and-continues by default; a caller
    /// wanting retries invokes this explicitly and resubmits on `Some`.
    /// Backoff is `0.05 * 2^depth` seconds, capped at two retries.
    pub async fn handle_sub_job_failure(
        self: &Arc<Self>,
        failed_job: &Job,
        attempt: u32,
    ) -> Option<Job> {
        const MAX_RETRIES: u32 = 2;
        if attempt >= MAX_RETRIES {
            return None;
        }

        let backoff_secs = 0.05 * 2f64.powi(failed_job.depth);
        tokio::time::sleep(Duration::from_secs_f64(backoff_secs)).await;

        self.submit(
            failed_job.task_description.clone(),
            failed_job.depth as u32,
            failed_job.parent_job_id,
            failed_job.worker_count as u32,
        )
        .await
        .ok()
    }
}

/// §4.5.2 step 2: syntactic, deterministic sub-task splitting. Intentionally
/// dumb — smarter decomposition is a pluggable concern, not part of the core.
fn decompose(task_description: &str) -> Vec<String> {
    task_description
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| is_sub_task_line(line))
        .map(strip_sub_task_prefix)
        .filter(|text| !text.is_empty())
        .collect()
}

fn is_sub_task_line(line: &str) -> bool {
    if line.starts_with('-') {
        return true;
    }
    let leading_digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if leading_digits == 1 || leading_digits == 2 {
        return true;
    }
    line.to_lowercase().starts_with("task")
}

/// Strips whichever prefix made the line qualify in `is_sub_task_line`, then
/// any further `-0123456789. ` left over, matching the same precedence order.
fn strip_sub_task_prefix(line: &str) -> String {
    let rest = if line.starts_with('-') {
        line
    } else {
        let leading_digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
        if leading_digits == 1 || leading_digits == 2 {
            line
        } else if line.len() >= 4 && line[..4].eq_ignore_ascii_case("task") {
            &line[4..]
        } else {
            line
        }
    };
    rest.trim_start_matches(|c: char| "-0123456789. ".contains(c))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn decomposes_dash_bullets() {
        let input = "- Task A\n- Task B\n- Task C";
        assert_eq!(decompose(input), vec!["Task A", "Task B", "Task C"]);
    }

    #[test]
    fn decomposes_numbered_lines() {
        let input = "1. First step\n2. Second step\n10. Tenth step";
        assert_eq!(
            decompose(input),
            vec!["First step", "Second step", "Tenth step"]
        );
    }

    #[test]
    fn decomposes_task_keyword_case_insensitively() {
        let input = "TASK: do the thing\ntask: do another";
        assert_eq!(decompose(input), vec![": do the thing", ": do another"]);
    }

    #[test]
    fn plain_prose_has_no_sub_tasks() {
        let input = "Just write a haiku about the sea";
        assert!(decompose(input).is_empty());
    }

    #[test]
    fn ignores_blank_lines() {
        let input = "- A\n\n\n- B\n   \n- C";
        assert_eq!(decompose(input), vec!["A", "B", "C"]);
    }
}
