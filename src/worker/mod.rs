//! Off-thread surface extraction.
//!
//! A [`WorkerPool`] owns up to [`MAX_WORKERS`](crate::options::MAX_WORKERS)
//! [`Worker`] threads. Each worker runs the handler a [`TaskRegistry`]
//! holds for a request's [`TaskKind`]; results come back over a channel and
//! their callbacks run on the caller thread when the pool is polled.
//! A request's buffers are moved into the worker or shared read-only behind
//! an `Arc`; nothing is mutated from two threads.

mod inbox;
mod pool;
mod protocol;
mod registry;
#[allow(clippy::module_inception)]
mod worker;

pub use inbox::Inbox;
pub use pool::{GenerationToken, WorkerPool};
pub use protocol::{
    Request, Response, TaskArgs, TaskError, TaskKind, TaskParams,
};
pub use registry::{TaskHandler, TaskRegistry, WorkerState};
pub use worker::{Dispatched, OnError, OnMessage, Worker};
