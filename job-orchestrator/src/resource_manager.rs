//! Depth-scoped worker quota bookkeeping (C2). The sole mutator of `used[d]`;
//! jobs never decrement the counters directly, only through `release`/`cleanup`.

use crate::recursion::default_workers_by_depth;
use job_common::SafeDisplay;
use std::collections::HashMap;
use std::sync::Mutex;

const WARN_80: f64 = 0.8;
const WARN_90: f64 = 0.9;

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("requested worker count must be positive")]
    InvalidRequest,
    #[error("no capacity available at depth {0}")]
    NoCapacity(u32),
}

impl SafeDisplay for AllocationError {
    fn to_safe_string(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub depth: u32,
    pub requested: u32,
    pub granted: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthUsage {
    pub depth: u32,
    pub used: u32,
    pub quota: u32,
    pub warn_80: bool,
    pub warn_90: bool,
}

struct Inner {
    quota: HashMap<u32, u32>,
    used: HashMap<u32, u32>,
    by_job_depth: HashMap<(String, u32), u32>,
}

pub struct ResourceManager {
    inner: Mutex<Inner>,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new(default_workers_by_depth())
    }
}

impl ResourceManager {
    pub fn new(quota: HashMap<u32, u32>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                quota,
                used: HashMap::new(),
                by_job_depth: HashMap::new(),
            }),
        }
    }

    fn quota_at(inner: &Inner, depth: u32) -> u32 {
        inner.quota.get(&depth).copied().unwrap_or(1)
    }

    pub fn check_quota(&self, depth: u32) -> DepthUsage {
        let inner = self.inner.lock().unwrap();
        let quota = Self::quota_at(&inner, depth);
        let used = inner.used.get(&depth).copied().unwrap_or(0);
        let ratio = if quota == 0 {
            1.0
        } else {
            used as f64 / quota as f64
        };
        DepthUsage {
            depth,
            used,
            quota,
            warn_80: ratio >= WARN_80,
            warn_90: ratio >= WARN_90,
        }
    }

    /// Atomically grants up to `requested` worker slots at `depth` for `job_id`.
    /// Fails fast (no waiting) when the depth is already at quota.
    pub fn allocate(
        &self,
        job_id: &str,
        depth: u32,
        requested: u32,
    ) -> Result<Allocation, AllocationError> {
        if requested == 0 || job_id.is_empty() {
            return Err(AllocationError::InvalidRequest);
        }

        let mut inner = self.inner.lock().unwrap();
        let quota = Self::quota_at(&inner, depth);
        let used = inner.used.get(&depth).copied().unwrap_or(0);

        if used >= quota {
            return Err(AllocationError::NoCapacity(depth));
        }

        let available = quota - used;
        let granted = requested.min(available);

        *inner.used.entry(depth).or_insert(0) += granted;
        *inner
            .by_job_depth
            .entry((job_id.to_string(), depth))
            .or_insert(0) += granted;

        Ok(Allocation {
            depth,
            requested,
            granted,
        })
    }

    /// Releases the allocation held by `(job_id, depth)`, if any. Never raises.
    pub fn release(&self, job_id: &str, depth: u32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.by_job_depth.remove(&(job_id.to_string(), depth)) {
            Some(granted) => {
                let entry = inner.used.entry(depth).or_insert(0);
                *entry = entry.saturating_sub(granted);
                true
            }
            None => false,
        }
    }

    /// Releases every allocation held by `job_id` across all depths, returning
    /// the total number of worker slots freed. Called unconditionally from the
    /// scheduler's job-completion path, success or failure.
    pub fn cleanup(&self, job_id: &str) -> u32 {
        let mut inner = self.inner.lock().unwrap();
        let keys: Vec<(String, u32)> = inner
            .by_job_depth
            .keys()
            .filter(|(id, _)| id == job_id)
            .cloned()
            .collect();

        let mut total_released = 0;
        for key in keys {
            if let Some(granted) = inner.by_job_depth.remove(&key) {
                let entry = inner.used.entry(key.1).or_insert(0);
                *entry = entry.saturating_sub(granted);
                total_released += granted;
            }
        }
        total_released
    }

    pub fn usage(&self) -> Vec<DepthUsage> {
        let depths: Vec<u32> = {
            let inner = self.inner.lock().unwrap();
            let mut depths: Vec<u32> = inner.quota.keys().chain(inner.used.keys()).copied().collect();
            depths.sort_unstable();
            depths.dedup();
            depths
        };

        depths.into_iter().map(|depth| self.check_quota(depth)).collect()
    }
}

/// RAII guard releasing an allocation on drop, modeling the Python
/// implementation's `resource_scope` async context manager in terms Rust's
/// ownership system enforces unconditionally, not just on the happy path.
pub struct ResourceScope<'a> {
    manager: &'a ResourceManager,
    job_id: String,
    depth: u32,
    pub allocation: Allocation,
}

impl ResourceManager {
    pub fn resource_scope<'a>(
        &'a self,
        job_id: &str,
        depth: u32,
        requested: u32,
    ) -> Result<ResourceScope<'a>, AllocationError> {
        let allocation = self.allocate(job_id, depth, requested)?;
        Ok(ResourceScope {
            manager: self,
            job_id: job_id.to_string(),
            depth,
            allocation,
        })
    }
}

impl Drop for ResourceScope<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.job_id, self.depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_r::test;

    fn manager_with_quota(depth: u32, quota: u32) -> ResourceManager {
        ResourceManager::new(HashMap::from([(depth, quota)]))
    }

    #[test]
    fn allocate_respects_quota() {
        let rm = manager_with_quota(0, 2);
        assert_eq!(rm.allocate("j1", 0, 1).unwrap().granted, 1);
        assert_eq!(rm.allocate("j2", 0, 5).unwrap().granted, 1);
        assert!(matches!(
            rm.allocate("j3", 0, 1),
            Err(AllocationError::NoCapacity(0))
        ));
    }

    #[test]
    fn release_then_usage_restores_snapshot() {
        let rm = manager_with_quota(0, 2);
        let before = rm.usage();
        rm.allocate("j1", 0, 1).unwrap();
        assert!(rm.release("j1", 0));
        assert_eq!(rm.usage(), before);
        assert!(!rm.release("j1", 0));
    }

    #[test]
    fn cleanup_releases_all_depths_for_job() {
        let rm = ResourceManager::new(HashMap::from([(0, 5), (1, 5)]));
        rm.allocate("j1", 0, 2).unwrap();
        rm.allocate("j1", 1, 3).unwrap();
        rm.allocate("j2", 0, 1).unwrap();

        let released = rm.cleanup("j1");
        assert_eq!(released, 5);

        let usage = rm.usage();
        let depth0 = usage.iter().find(|u| u.depth == 0).unwrap();
        assert_eq!(depth0.used, 1);
    }

    #[test]
    fn resource_scope_releases_on_drop() {
        let rm = manager_with_quota(0, 1);
        {
            let _scope = rm.resource_scope("j1", 0, 1).unwrap();
            assert!(rm.allocate("j2", 0, 1).is_err());
        }
        assert!(rm.allocate("j2", 0, 1).is_ok());
    }

    #[test]
    fn invalid_request_is_rejected() {
        let rm = manager_with_quota(0, 5);
        assert!(matches!(
            rm.allocate("j1", 0, 0),
            Err(AllocationError::InvalidRequest)
        ));
        assert!(matches!(
            rm.allocate("", 0, 1),
            Err(AllocationError::InvalidRequest)
        ));
    }
}
