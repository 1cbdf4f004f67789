//! Pipeline orchestration: external stages and run metrics.

mod external;
mod metrics;

#[cfg(test)]
mod pipeline_integration_tests;

pub use external::{
    ensure_executable, is_path_program, relocate_artifact, resolve_program, run_command, CollectionStage, CommandOutput,
    CountingStage, Orchestrator,
};
pub use metrics::{Metrics, MetricsSnapshot};
