use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Hard cap on threads in one worker pool.
pub const MAX_WORKERS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[schemars(title = "Workers", inline)]
#[serde(default)]
/// Worker pool sizing.
pub struct WorkerOptions {
    /// Maximum number of worker threads per pool.
    #[schemars(title = "Max Workers", range(min = 1, max = 8))]
    pub max_count: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self { max_count: 2 }
    }
}

impl WorkerOptions {
    /// Pool size clamped to `1..=MAX_WORKERS`.
    #[must_use]
    pub fn clamped_max_count(&self) -> usize {
        self.max_count.clamp(1, MAX_WORKERS)
    }
}
