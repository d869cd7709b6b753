//! A single extraction thread with per-post completion callbacks.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

use rustc_hash::FxHashMap;
use web_time::Instant;

use super::protocol::{Request, Response, TaskError};
use super::registry::{TaskRegistry, WorkerState};
use crate::error::IsomeshError;

/// Process-wide counter naming worker threads.
static WORKER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Called with the response of a successful post.
pub type OnMessage = Box<dyn FnOnce(Response) + Send>;
/// Called when a post fails.
pub type OnError = Box<dyn FnOnce(TaskError) + Send>;

enum Envelope {
    Job { post_id: u64, request: Request },
    Shutdown,
}

struct Completion {
    post_id: u64,
    result: Result<Response, TaskError>,
}

/// Outcome of dispatching completions on the caller thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatched {
    /// Callbacks invoked.
    pub completed: usize,
    /// How many of them were error callbacks.
    pub failed: usize,
}

/// Background thread running registered tasks one at a time.
///
/// Each [`Worker::post`] gets the next post id and a pair of callbacks.
/// Callbacks run on the caller thread from [`Worker::poll`] or
/// [`Worker::wait`], never on the worker thread.
pub struct Worker {
    name: String,
    request_tx: mpsc::Sender<Envelope>,
    result_rx: mpsc::Receiver<Completion>,
    thread: Option<std::thread::JoinHandle<()>>,
    cancelled: Arc<AtomicBool>,
    pending: usize,
    post_count: u64,
    callbacks: FxHashMap<u64, (OnMessage, OnError)>,
    undelivered: VecDeque<Completion>,
}

impl Worker {
    /// Spawn a worker thread executing tasks from `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`IsomeshError::ThreadSpawn`] if the thread fails to spawn.
    pub fn new(
        name: &str,
        registry: Arc<TaskRegistry>,
    ) -> Result<Self, IsomeshError> {
        let (request_tx, request_rx) = mpsc::channel::<Envelope>();
        let (result_tx, result_rx) = mpsc::channel::<Completion>();
        let id = WORKER_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let thread_name = format!("{name}-worker-{id}");
        let cancelled = Arc::new(AtomicBool::new(false));
        let thread_cancelled = Arc::clone(&cancelled);

        let thread = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                Self::thread_loop(
                    &request_rx,
                    &result_tx,
                    &registry,
                    &thread_cancelled,
                );
            })
            .map_err(IsomeshError::ThreadSpawn)?;
        log::debug!("spawned {thread_name}");

        Ok(Self {
            name: thread_name,
            request_tx,
            result_rx,
            thread: Some(thread),
            cancelled,
            pending: 0,
            post_count: 0,
            callbacks: FxHashMap::default(),
            undelivered: VecDeque::new(),
        })
    }

    fn thread_loop(
        request_rx: &mpsc::Receiver<Envelope>,
        result_tx: &mpsc::Sender<Completion>,
        registry: &TaskRegistry,
        cancelled: &AtomicBool,
    ) {
        let mut state = WorkerState::default();
        while let Ok(envelope) = request_rx.recv() {
            // Jobs queued before a cancel are skipped, not run.
            if cancelled.load(Ordering::Acquire) {
                break;
            }
            let (post_id, request) = match envelope {
                Envelope::Shutdown => break,
                Envelope::Job { post_id, request } => (post_id, request),
            };
            let kind = request.kind();
            let start = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                registry.run(&mut state, request)
            }))
            .unwrap_or_else(|payload| {
                state = WorkerState::default();
                Err(TaskError::Panicked(panic_message(payload.as_ref())))
            });
            log::debug!("{kind} #{post_id} done in {:?}", start.elapsed());
            if result_tx.send(Completion { post_id, result }).is_err() {
                break;
            }
        }
    }

    /// Thread name of this worker.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Posts not yet dispatched.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Posts made so far; also the id the next post gets.
    #[must_use]
    pub fn post_count(&self) -> u64 {
        self.post_count
    }

    /// Send `request` to the worker thread. Exactly one of the callbacks is
    /// later invoked by [`Self::poll`] or [`Self::wait`].
    pub fn post(
        &mut self,
        request: Request,
        on_message: OnMessage,
        on_error: OnError,
    ) -> u64 {
        let post_id = self.post_count;
        let _ = self.callbacks.insert(post_id, (on_message, on_error));
        let sent = self
            .request_tx
            .send(Envelope::Job { post_id, request })
            .is_ok();
        if !sent {
            self.undelivered.push_back(Completion {
                post_id,
                result: Err(TaskError::Disconnected),
            });
        }
        self.pending += 1;
        self.post_count += 1;
        post_id
    }

    /// Dispatch every completion that has arrived, without blocking.
    pub fn poll(&mut self) -> Dispatched {
        let mut dispatched = self.drain_undelivered();
        loop {
            match self.result_rx.try_recv() {
                Ok(completion) => self.dispatch(completion, &mut dispatched),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.fail_outstanding(&mut dispatched);
                    break;
                }
            }
        }
        dispatched
    }

    /// Block until every pending post has been dispatched.
    pub fn wait(&mut self) -> Dispatched {
        let mut dispatched = self.drain_undelivered();
        while self.pending > 0 {
            if let Ok(completion) = self.result_rx.recv() {
                self.dispatch(completion, &mut dispatched);
            } else {
                self.fail_outstanding(&mut dispatched);
            }
        }
        dispatched
    }

    fn drain_undelivered(&mut self) -> Dispatched {
        let mut dispatched = Dispatched::default();
        while let Some(completion) = self.undelivered.pop_front() {
            self.dispatch(completion, &mut dispatched);
        }
        dispatched
    }

    fn dispatch(&mut self, completion: Completion, dispatched: &mut Dispatched) {
        self.pending = self.pending.saturating_sub(1);
        let Some((on_message, on_error)) =
            self.callbacks.remove(&completion.post_id)
        else {
            log::debug!("{}: no callbacks for #{}", self.name, completion.post_id);
            return;
        };
        dispatched.completed += 1;
        match completion.result {
            Ok(response) => on_message(response),
            Err(e) => {
                dispatched.failed += 1;
                on_error(e);
            }
        }
    }

    /// The thread is gone: every outstanding post fails.
    fn fail_outstanding(&mut self, dispatched: &mut Dispatched) {
        let mut ids: Vec<u64> = self.callbacks.keys().copied().collect();
        ids.sort_unstable();
        for post_id in ids {
            self.dispatch(
                Completion {
                    post_id,
                    result: Err(TaskError::Disconnected),
                },
                dispatched,
            );
        }
        self.pending = 0;
    }

    /// Stop the thread after its current job and drop outstanding
    /// callbacks. Blocks until the current job finishes.
    pub fn terminate(&mut self) {
        self.cancel();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
            log::debug!("terminated {}", self.name);
        }
        self.callbacks.clear();
        self.undelivered.clear();
        self.pending = 0;
    }

    /// Detach the thread without waiting for it and fail every
    /// outstanding post with [`TaskError::Disconnected`], so each post
    /// still gets exactly one callback. The thread exits after its
    /// current job.
    pub fn evict(&mut self) -> Dispatched {
        self.cancel();
        if self.thread.take().is_some() {
            log::debug!("detached {}", self.name);
        }
        let mut dispatched = self.drain_undelivered();
        self.fail_outstanding(&mut dispatched);
        dispatched
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let _ = self.request_tx.send(Envelope::Shutdown);
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("pending", &self.pending)
            .field("post_count", &self.post_count)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::surface::{AtomData, MolecularSurfaceParams};
    use crate::volume::VolumeSurfaceParams;
    use crate::worker::protocol::{TaskArgs, TaskKind, TaskParams};

    fn volsurf(args: TaskArgs) -> Request {
        Request {
            args,
            params: TaskParams::VolSurf(VolumeSurfaceParams::default()),
        }
    }

    #[test]
    fn unknown_task_reaches_error_callback() {
        let registry = Arc::new(TaskRegistry::empty());
        let mut worker = Worker::new("test", registry).unwrap();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let id = worker.post(
            volsurf(TaskArgs::None),
            Box::new(|_| {}),
            Box::new(move |e| sink.lock().unwrap().push(e)),
        );
        assert_eq!(id, 0);
        assert_eq!(worker.pending(), 1);
        let dispatched = worker.wait();
        assert_eq!(dispatched, Dispatched { completed: 1, failed: 1 });
        assert_eq!(worker.pending(), 0);
        assert_eq!(
            *errors.lock().unwrap(),
            vec![TaskError::UnknownTask(TaskKind::VolSurf)]
        );
    }

    #[test]
    fn unprimed_volume_request_fails() {
        let mut worker =
            Worker::new("test", Arc::new(TaskRegistry::new())).unwrap();
        let failed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&failed);
        let _ = worker.post(
            volsurf(TaskArgs::None),
            Box::new(|_| {}),
            Box::new(move |e| *sink.lock().unwrap() = Some(e)),
        );
        let _ = worker.wait();
        assert_eq!(*failed.lock().unwrap(), Some(TaskError::NotPrimed));
    }

    #[test]
    fn post_ids_increase_and_callbacks_match() {
        let mut worker =
            Worker::new("test", Arc::new(TaskRegistry::new())).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for probe in [1.0f32, 1.2, 1.4] {
            let sink = Arc::clone(&seen);
            let params = MolecularSurfaceParams {
                probe_radius: probe,
                ..MolecularSurfaceParams::default()
            };
            let _ = worker.post(
                Request {
                    args: TaskArgs::Atoms(AtomData::default()),
                    params: TaskParams::MolSurf(params),
                },
                Box::new(move |r| {
                    if let TaskParams::MolSurf(p) = r.params {
                        sink.lock().unwrap().push(p.probe_radius);
                    }
                }),
                Box::new(|_| {}),
            );
        }
        assert_eq!(worker.post_count(), 3);
        let dispatched = worker.wait();
        assert_eq!(dispatched.completed, 3);
        assert_eq!(*seen.lock().unwrap(), vec![1.0, 1.2, 1.4]);
    }

    fn slow_or_failing(
        state: &mut WorkerState,
        request: Request,
    ) -> Result<Response, TaskError> {
        match request.params {
            TaskParams::MolSurf(p) if p.probe_radius <= 0.0 => {
                Err(TaskError::InvalidArgs("zero probe".to_owned()))
            }
            _ => {
                std::thread::sleep(std::time::Duration::from_millis(500));
                crate::surface::molsurf_task(state, request)
            }
        }
    }

    fn molsurf(probe_radius: f32) -> Request {
        Request {
            args: TaskArgs::Atoms(AtomData::default()),
            params: TaskParams::MolSurf(MolecularSurfaceParams {
                probe_radius,
                ..MolecularSurfaceParams::default()
            }),
        }
    }

    #[test]
    fn evict_fails_queued_posts_without_blocking() {
        let mut registry = TaskRegistry::empty();
        registry.register(TaskKind::MolSurf, slow_or_failing);
        let mut worker = Worker::new("test", Arc::new(registry)).unwrap();
        let errors = Arc::new(Mutex::new(Vec::new()));
        for probe in [0.0, 1.4, 1.4] {
            let sink = Arc::clone(&errors);
            let _ = worker.post(
                molsurf(probe),
                Box::new(|_| {}),
                Box::new(move |e| sink.lock().unwrap().push(e)),
            );
        }
        std::thread::sleep(std::time::Duration::from_millis(50));

        let start = Instant::now();
        let mut dispatched = worker.poll();
        let evicted = worker.evict();
        assert!(start.elapsed() < std::time::Duration::from_millis(400));
        dispatched.completed += evicted.completed;
        assert_eq!(dispatched.completed, 3);
        assert_eq!(worker.pending(), 0);
        assert_eq!(
            *errors.lock().unwrap(),
            vec![
                TaskError::InvalidArgs("zero probe".to_owned()),
                TaskError::Disconnected,
                TaskError::Disconnected,
            ]
        );
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut worker =
            Worker::new("test", Arc::new(TaskRegistry::new())).unwrap();
        worker.terminate();
        worker.terminate();
        assert_eq!(worker.pending(), 0);
    }
}
