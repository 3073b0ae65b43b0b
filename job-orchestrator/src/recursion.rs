//! Pure depth-bound and timeout-growth rules for one step of recursion.
//! Nothing here touches I/O; every result is a function of its arguments.

use std::collections::HashMap;

const BASE_TIMEOUT_SECS: u64 = 300;
const TIMEOUT_GROWTH: f64 = 1.5;

pub const DEFAULT_MAX_DEPTH: u32 = 5;

pub fn default_workers_by_depth() -> HashMap<u32, u32> {
    HashMap::from([(0, 10), (1, 8), (2, 5), (3, 3), (4, 2), (5, 1)])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecursionValidationResult {
    pub is_valid: bool,
    pub error_message: Option<String>,
    pub adjusted_timeout_secs: u64,
    pub max_workers: u32,
}

impl RecursionValidationResult {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error_message: Some(message.into()),
            adjusted_timeout_secs: BASE_TIMEOUT_SECS,
            max_workers: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecursionValidator;

impl RecursionValidator {
    pub fn new() -> Self {
        Self
    }

    /// Decides whether descending from `current_depth` to `current_depth + 1`
    /// is permitted, and if so what worker cap and timeout budget apply there.
    pub fn validate_depth(
        &self,
        current_depth: i64,
        max_depth: i64,
        workers_by_depth: &HashMap<u32, u32>,
    ) -> RecursionValidationResult {
        if current_depth < 0 {
            return RecursionValidationResult::invalid("Current depth cannot be negative");
        }
        if max_depth < 0 {
            return RecursionValidationResult::invalid("Max depth cannot be negative");
        }
        if current_depth >= max_depth {
            return RecursionValidationResult::invalid(format!(
                "Max recursion depth ({max_depth}) reached"
            ));
        }

        let next_depth = (current_depth + 1) as u32;
        let max_workers = workers_by_depth.get(&next_depth).copied().unwrap_or(1);
        let adjusted_timeout_secs =
            (BASE_TIMEOUT_SECS as f64 * TIMEOUT_GROWTH.powi(next_depth as i32)) as u64;

        RecursionValidationResult {
            is_valid: true,
            error_message: None,
            adjusted_timeout_secs,
            max_workers,
        }
    }

    /// An ancestor chain carrying its own id anywhere would make the job graph
    /// a cycle rather than a tree; this is the guard against that.
    pub fn detect_circular_reference(&self, ancestor_ids: &[String], candidate_id: &str) -> bool {
        ancestor_ids.iter().any(|id| id == candidate_id)
    }
}
