//! Bounded, load-balanced set of [`Worker`]s.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::protocol::Request;
use super::registry::TaskRegistry;
use super::worker::{Dispatched, OnError, OnMessage, Worker};
use crate::error::IsomeshError;
use crate::options::MAX_WORKERS;

/// Pool of at most `max_count` workers sharing one task registry.
///
/// Workers are spawned lazily. A post goes to the first idle worker, else
/// to a new worker while below the cap, else to the least loaded one.
/// Workers whose jobs fail are evicted when their completions are
/// dispatched; posts still queued on them fail with
/// [`TaskError::Disconnected`](super::TaskError::Disconnected) in the same
/// dispatch.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    max_count: usize,
    registry: Arc<TaskRegistry>,
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Empty pool; `max_count` of 0 means the default of 2, and the cap
    /// never exceeds [`MAX_WORKERS`].
    #[must_use]
    pub fn new(name: &str, max_count: usize, registry: Arc<TaskRegistry>) -> Self {
        let max_count = if max_count == 0 { 2 } else { max_count };
        Self {
            name: name.to_owned(),
            max_count: max_count.min(MAX_WORKERS),
            registry,
            workers: Vec::new(),
        }
    }

    /// Pool name, used for worker thread names.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upper bound on live workers.
    #[must_use]
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Live workers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.workers.len()
    }

    /// Live workers, oldest first.
    #[must_use]
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Pick the worker for the next post, spawning one if the pool is
    /// below its cap and no live worker is idle.
    ///
    /// # Errors
    ///
    /// Returns [`IsomeshError::ThreadSpawn`] if a new worker thread fails
    /// to spawn.
    pub fn get_next_worker(&mut self) -> Result<&mut Worker, IsomeshError> {
        let mut next = None;
        let mut min_pending = usize::MAX;
        for i in 0..self.max_count {
            let Some(worker) = self.workers.get(i) else {
                self.workers.push(Worker::new(&self.name, Arc::clone(&self.registry))?);
                next = Some(i);
                break;
            };
            if worker.pending() == 0 {
                next = Some(i);
                break;
            }
            if worker.pending() < min_pending {
                min_pending = worker.pending();
                next = Some(i);
            }
        }
        let index = next.ok_or_else(|| {
            IsomeshError::Worker(format!("pool {} has no workers", self.name))
        })?;
        Ok(&mut self.workers[index])
    }

    /// Post `request` to [`Self::get_next_worker`].
    ///
    /// # Errors
    ///
    /// Returns [`IsomeshError::ThreadSpawn`] if a needed worker fails to
    /// spawn; the callbacks are dropped uncalled in that case.
    pub fn post(
        &mut self,
        request: Request,
        on_message: OnMessage,
        on_error: OnError,
    ) -> Result<u64, IsomeshError> {
        let worker = self.get_next_worker()?;
        Ok(worker.post(request, on_message, on_error))
    }

    /// Dispatch arrived completions on the calling thread without
    /// blocking, evicting workers that reported failures.
    pub fn poll(&mut self) -> usize {
        self.dispatch_with(Worker::poll)
    }

    /// Block until every post so far has been dispatched.
    pub fn wait_all(&mut self) -> usize {
        self.dispatch_with(Worker::wait)
    }

    fn dispatch_with(&mut self, mut f: impl FnMut(&mut Worker) -> Dispatched) -> usize {
        let mut completed = 0;
        let name = &self.name;
        self.workers.retain_mut(|worker| {
            let dispatched = f(worker);
            completed += dispatched.completed;
            if dispatched.failed > 0 {
                log::warn!(
                    "{name}: evicting {} after {} failed job(s)",
                    worker.name(),
                    dispatched.failed
                );
                completed += worker.evict().completed;
                return false;
            }
            true
        });
        completed
    }

    /// Pending posts across all workers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.workers.iter().map(Worker::pending).sum()
    }

    /// Terminate and drop every worker.
    pub fn terminate(&mut self) {
        for worker in &mut self.workers {
            worker.terminate();
        }
        self.workers.clear();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Monotonic request counter for discarding superseded results.
///
/// Take a generation when posting and check it when the result arrives;
/// anything older than the latest generation is stale.
#[derive(Debug, Clone, Default)]
pub struct GenerationToken(Arc<AtomicU64>);

impl GenerationToken {
    /// Counter starting at generation 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation and return it.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Latest generation.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Whether `generation` is still the latest.
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}
