//! Caller-side collection point for worker results.

use std::sync::mpsc;

use rustc_hash::FxHashMap;

use super::protocol::{Response, TaskError};
use super::worker::{OnError, OnMessage};

type Delivery = (u64, Result<Response, TaskError>);

/// Routes worker callbacks back to the owner of the request.
///
/// Each post registers a context `C` (typically the request parameters
/// and the user's callback) under a ticket. The worker callbacks only
/// forward the result; the owner later [`drains`](Self::drain) the inbox
/// and handles results, including synchronous fallbacks, with full access
/// to its own state.
#[derive(Debug)]
pub struct Inbox<C> {
    tx: mpsc::Sender<Delivery>,
    rx: mpsc::Receiver<Delivery>,
    waiting: FxHashMap<u64, C>,
    next_ticket: u64,
}

impl<C> Inbox<C> {
    /// Empty inbox.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx,
            waiting: FxHashMap::default(),
            next_ticket: 0,
        }
    }

    /// Register `context` and build the worker callbacks delivering to it.
    pub fn register(&mut self, context: C) -> (u64, OnMessage, OnError) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let _ = self.waiting.insert(ticket, context);

        let tx = self.tx.clone();
        let on_message: OnMessage = Box::new(move |response| {
            let _ = tx.send((ticket, Ok(response)));
        });
        let tx = self.tx.clone();
        let on_error: OnError = Box::new(move |e| {
            let _ = tx.send((ticket, Err(e)));
        });
        (ticket, on_message, on_error)
    }

    /// Withdraw a registration whose post never happened.
    pub fn cancel(&mut self, ticket: u64) -> Option<C> {
        self.waiting.remove(&ticket)
    }

    /// Results delivered so far, paired with their contexts, in delivery
    /// order.
    pub fn drain(&mut self) -> Vec<(C, Result<Response, TaskError>)> {
        let mut out = Vec::new();
        while let Ok((ticket, result)) = self.rx.try_recv() {
            if let Some(context) = self.waiting.remove(&ticket) {
                out.push((context, result));
            }
        }
        out
    }

    /// Registrations still waiting for a result.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.len()
    }
}

impl<C> Default for Inbox<C> {
    fn default() -> Self {
        Self::new()
    }
}
