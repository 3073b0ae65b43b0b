pub mod auth;
pub mod config;
pub mod db;
pub mod retry;
pub mod tracing_config;

#[cfg(test)]
test_r::enable!();

/// Splits an error's user-facing rendering from its full internal detail.
///
/// `Display`/`{:?}` are for logs; `to_safe_string` is what is allowed to cross
/// the HTTP boundary. Implementations must never let the safe string leak
/// secrets, file paths, SQL text, or third-party error detail.
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;

    fn to_safe_string_indented(&self) -> String {
        self.to_safe_string()
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
