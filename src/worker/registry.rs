//! Explicit table of task handlers run by workers.

use rustc_hash::FxHashMap;

use super::protocol::{Request, Response, TaskError, TaskKind};
use crate::volume::VolumeSurface;

/// State a worker keeps between jobs.
#[derive(Debug, Default)]
pub struct WorkerState {
    /// Triangulator over the field this worker was primed with.
    pub volume: Option<VolumeSurface>,
}

/// Handler executing one request on a worker thread.
pub type TaskHandler =
    fn(&mut WorkerState, Request) -> Result<Response, TaskError>;

/// Task handlers keyed by [`TaskKind`], shared by every worker of a pool.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    handlers: FxHashMap<TaskKind, TaskHandler>,
}

impl TaskRegistry {
    /// Registry without handlers.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    /// Registry with the built-in `molsurf` and `volsurf` handlers.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(TaskKind::MolSurf, crate::surface::molsurf_task);
        registry.register(TaskKind::VolSurf, crate::volume::volsurf_task);
        registry
    }

    /// Install `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: TaskKind, handler: TaskHandler) {
        let _ = self.handlers.insert(kind, handler);
    }

    /// Handler for `kind`.
    #[must_use]
    pub fn get(&self, kind: TaskKind) -> Option<TaskHandler> {
        self.handlers.get(&kind).copied()
    }

    /// Run `request` with its registered handler.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::UnknownTask`] when no handler is registered, or
    /// whatever the handler reports.
    pub fn run(
        &self,
        state: &mut WorkerState,
        request: Request,
    ) -> Result<Response, TaskError> {
        let kind = request.kind();
        let handler = self.get(kind).ok_or(TaskError::UnknownTask(kind))?;
        handler(state, request)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
