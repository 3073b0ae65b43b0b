use job_common::db::DbConfig;
use job_common::tracing_config::TracingConfig;
use job_common::{config::ConfigLoader, SafeDisplay};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;
use std::path::PathBuf;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobOrchestratorConfig {
    pub tracing: TracingConfig,
    pub http_port: u16,
    pub db: DbConfig,
    pub recursion: RecursionConfig,
    pub auth: AuthConfig,
    pub cors_origin_regex: String,
}

impl Default for JobOrchestratorConfig {
    fn default() -> Self {
        Self {
            tracing: TracingConfig::local_dev("job-orchestrator"),
            http_port: 8080,
            db: DbConfig::default(),
            recursion: RecursionConfig::default(),
            auth: AuthConfig::default(),
            cors_origin_regex: "http://localhost:.*".to_string(),
        }
    }
}

impl SafeDisplay for JobOrchestratorConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "tracing:");
        let _ = writeln!(&mut result, "{}", self.tracing.to_safe_string_indented());
        let _ = writeln!(&mut result, "HTTP port: {}", self.http_port);
        let _ = writeln!(&mut result, "DB:");
        let _ = writeln!(&mut result, "{}", self.db.to_safe_string_indented());
        let _ = writeln!(&mut result, "recursion:");
        let _ = writeln!(
            &mut result,
            "{}",
            self.recursion.to_safe_string_indented()
        );
        let _ = writeln!(&mut result, "auth:");
        let _ = writeln!(&mut result, "{}", self.auth.to_safe_string_indented());
        let _ = writeln!(&mut result, "CORS origin regex: {}", self.cors_origin_regex);
        result
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecursionConfig {
    pub max_depth: u32,
    pub workers_by_depth: HashMap<u32, u32>,
}

impl Default for RecursionConfig {
    fn default() -> Self {
        Self {
            max_depth: crate::recursion::DEFAULT_MAX_DEPTH,
            workers_by_depth: crate::recursion::default_workers_by_depth(),
        }
    }
}

impl SafeDisplay for RecursionConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "max depth: {}", self.max_depth);
        let mut depths: Vec<_> = self.workers_by_depth.iter().collect();
        depths.sort_by_key(|(depth, _)| **depth);
        for (depth, workers) in depths {
            let _ = writeln!(&mut result, "  depth {depth}: {workers} workers");
        }
        result
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-only-insecure-secret-change-me".to_string(),
            token_ttl_minutes: 60,
        }
    }
}

impl SafeDisplay for AuthConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "jwt secret: ****");
        let _ = writeln!(
            &mut result,
            "token ttl (minutes): {}",
            self.token_ttl_minutes
        );
        result
    }
}

pub fn make_config_loader() -> ConfigLoader<JobOrchestratorConfig> {
    ConfigLoader::new(&PathBuf::from("config/job-orchestrator.toml"))
}
