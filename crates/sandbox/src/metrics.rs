//! Metric names emitted through the `metrics` facade.

/// Sandbox lifecycle metrics
pub mod sandbox {
    /// Sandboxes created and started
    pub const RUN_TOTAL: &str = "podshim_sandbox_run_total";
    /// Failed `run` calls, labelled by `stage` (see `RunSandboxError::stage`)
    pub const RUN_ERRORS_TOTAL: &str = "podshim_sandbox_run_errors_total";
    /// Name conflicts recovered during create
    pub const CONFLICT_RECOVERIES_TOTAL: &str = "podshim_sandbox_conflict_recoveries_total";
    pub const STOP_TOTAL: &str = "podshim_sandbox_stop_total";
    pub const REMOVE_TOTAL: &str = "podshim_sandbox_remove_total";
}

/// Checkpoint metrics
pub mod checkpoint {
    /// Corrupted checkpoints discarded while listing
    pub const CORRUPTED_TOTAL: &str = "podshim_checkpoint_corrupted_total";
}

pub use ::metrics::counter;
