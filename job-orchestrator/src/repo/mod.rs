//! Low-level persistence for each entity in the data model (C4). Every query
//! here is a runtime-built `sqlx` query (never the compile-time `query!`
//! macros), so the repo has no dependency on a live database at build time.

pub mod allocation;
pub mod idempotency;
pub mod job;
pub mod transition;
pub mod worker;
