use crate::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TracingConfig {
    pub service_name: String,
    /// `pretty` for local development, `json` for anything shipped to a log pipeline.
    pub format: TracingFormat,
    pub default_level: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TracingFormat {
    Pretty,
    Json,
}

impl TracingConfig {
    pub fn local_dev(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            format: TracingFormat::Pretty,
            default_level: "info".to_string(),
        }
    }

    /// Installs the global tracing subscriber. Must be called once, before
    /// any other tracing-emitting code runs.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.default_level));

        let registry = tracing_subscriber::registry().with(filter);

        match self.format {
            TracingFormat::Pretty => {
                registry
                    .with(tracing_subscriber::fmt::layer().with_target(true))
                    .init();
            }
            TracingFormat::Json => {
                registry
                    .with(tracing_subscriber::fmt::layer().json().with_target(true))
                    .init();
            }
        }
    }
}

impl SafeDisplay for TracingConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "service name: {}", self.service_name);
        let _ = writeln!(&mut result, "format: {:?}", self.format);
        let _ = writeln!(&mut result, "default level: {}", self.default_level);
        result
    }
}

/// Distinguishes routine client errors (4xx) from genuine faults (5xx) so
/// request metrics don't alarm on expected traffic. Mirrored per error enum
/// at each API boundary.
pub trait TraceErrorKind {
    fn trace_error_kind(&self) -> &'static str;
    fn is_expected(&self) -> bool;
}
