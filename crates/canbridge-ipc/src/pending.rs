//! Bookkeeping for in-flight unary requests.
//!
//! Every unary call registers a waiter: a predicate deciding whether an
//! inbound message answers it, plus a oneshot channel for the outcome.
//! Resolution is FIFO-first-match: the oldest waiter whose predicate
//! accepts the message wins. Callers therefore must supply predicates
//! discriminating enough for their traffic (a pong is matched on its id);
//! two concurrently pending waiters with overlapping predicates resolve in
//! registration order no matter which "real" answer arrived first.

use tokio::sync::oneshot;

use crate::error::ClientError;
use crate::protocol::DaemonResponse;

pub(crate) type Predicate = Box<dyn Fn(&DaemonResponse) -> bool + Send>;
pub(crate) type WaiterOutcome = Result<DaemonResponse, ClientError>;

struct Waiter {
    token: u64,
    matches: Predicate,
    reply_tx: oneshot::Sender<WaiterOutcome>,
}

/// Ordered set of waiters for one connection.
#[derive(Default)]
pub(crate) struct PendingRequests {
    waiters: Vec<Waiter>,
    next_token: u64,
}

impl PendingRequests {
    /// Register a waiter and return the token used to remove it on timeout.
    pub fn register(
        &mut self,
        matches: Predicate,
        reply_tx: oneshot::Sender<WaiterOutcome>,
    ) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.waiters.push(Waiter {
            token,
            matches,
            reply_tx,
        });
        token
    }

    /// Remove a waiter by token. Returns false if it was already resolved
    /// or failed, so each waiter leaves the registry exactly once.
    pub fn remove(&mut self, token: u64) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|waiter| waiter.token != token);
        self.waiters.len() != before
    }

    /// Resolve the oldest waiter whose predicate accepts `response`.
    ///
    /// Returns the response back when no waiter matched, so the caller can
    /// log the drop.
    pub fn resolve(&mut self, response: DaemonResponse) -> Option<DaemonResponse> {
        let index = self
            .waiters
            .iter()
            .position(|waiter| (waiter.matches)(&response))?;
        let waiter = self.waiters.remove(index);
        // The caller may have given up while the message was in flight.
        let _ = waiter.reply_tx.send(Ok(response));
        None
    }

    /// Fail every waiter in FIFO order and clear the registry.
    pub fn fail_all(&mut self, make_err: impl Fn() -> ClientError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.reply_tx.send(Err(make_err()));
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }
}
