//! Counting join for a fan-out phase.
//!
//! Every concurrent operation takes a [`Ticket`] before it starts and
//! completes it with its result. [`Barrier::wait`] resolves once every
//! ticket is settled and reports all failures, never just one of them.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Why one operation of a phase did not produce a value.
#[derive(Debug)]
pub enum Failure<E> {
    Failed(E),
    /// The ticket was dropped without being completed, e.g. the task
    /// panicked or was cancelled
    Aborted,
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Failed(e) => write!(f, "{}", e),
            Failure::Aborted => write!(f, "operation aborted before completion"),
        }
    }
}

struct State<T, E> {
    pending: usize,
    outcomes: Vec<T>,
    failures: Vec<Failure<E>>,
}

struct Shared<T, E> {
    state: Mutex<State<T, E>>,
    notify: Notify,
}

impl<T, E> Shared<T, E> {
    fn settle(&self, result: Result<T, Failure<E>>) {
        let done = {
            let mut state = self.state.lock();
            match result {
                Ok(value) => state.outcomes.push(value),
                Err(failure) => state.failures.push(failure),
            }
            state.pending -= 1;
            state.pending == 0
        };
        if done {
            // Stores a permit if the waiter is not polling yet
            self.notify.notify_one();
        }
    }
}

pub struct Barrier<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Default for Barrier<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Barrier<T, E> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    pending: 0,
                    outcomes: Vec::new(),
                    failures: Vec::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Register one more operation.
    pub fn tick(&self) -> Ticket<T, E> {
        self.shared.state.lock().pending += 1;
        Ticket {
            shared: Some(self.shared.clone()),
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending
    }

    /// Wait until every ticket is settled. Values are returned in
    /// completion order; if anything failed, every failure is returned.
    pub async fn wait(self) -> Result<Vec<T>, Vec<Failure<E>>> {
        loop {
            {
                let mut state = self.shared.state.lock();
                if state.pending == 0 {
                    let failures = std::mem::take(&mut state.failures);
                    let outcomes = std::mem::take(&mut state.outcomes);
                    return if failures.is_empty() {
                        Ok(outcomes)
                    } else {
                        Err(failures)
                    };
                }
            }
            self.shared.notify.notified().await;
        }
    }
}

/// Obligation to report one operation's result to its barrier.
pub struct Ticket<T, E> {
    shared: Option<Arc<Shared<T, E>>>,
}

impl<T, E> Ticket<T, E> {
    pub fn complete(mut self, result: Result<T, E>) {
        if let Some(shared) = self.shared.take() {
            shared.settle(result.map_err(Failure::Failed));
        }
    }
}

impl<T, E> Drop for Ticket<T, E> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.settle(Err(Failure::Aborted));
        }
    }
}
