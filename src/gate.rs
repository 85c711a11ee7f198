use crate::{
    error::{OrchestrationError, Result},
    sync::{Arc, Condvar, Mutex, lock, unpoison},
};
#[cfg(not(feature = "loom"))]
use core::time::Duration;
use derive_more::Debug;

/// Single-fill slot bridging an asynchronous graph to one blocked caller.
///
/// Moves from empty to filled exactly once. The first `fill` wins; every later
/// one, including a completion that arrives after a waiter timed out, is a
/// no-op. Waiters park on a condition variable and are woken by the fill.
#[derive(Debug)]
pub struct CompletionGate<T> {
    #[debug(skip)]
    state: Mutex<GateState<T>>,
    #[debug(skip)]
    ready: Condvar,
}

enum GateState<T> {
    Empty,
    Filled(Result<T>),
    /// The outcome was handed to the reader, or the reader gave up.
    Closed,
}

impl<T> Default for CompletionGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompletionGate<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Empty),
            ready: Condvar::new(),
        }
    }

    /// Store the terminal outcome. Returns `false` if the gate was already
    /// filled or closed, in which case `outcome` is dropped.
    pub fn fill(&self, outcome: Result<T>) -> bool {
        let mut state = lock(&self.state);
        if !matches!(*state, GateState::Empty) {
            return false;
        }
        *state = GateState::Filled(outcome);
        drop(state);
        self.ready.notify_all();
        true
    }

    /// Whether an outcome has been stored (or already taken).
    pub fn is_filled(&self) -> bool {
        !matches!(*lock(&self.state), GateState::Empty)
    }

    /// Block until filled, then take the outcome.
    fn take(&self) -> Result<T> {
        let mut state = lock(&self.state);
        loop {
            match core::mem::replace(&mut *state, GateState::Closed) {
                GateState::Filled(outcome) => return outcome,
                GateState::Empty => {
                    *state = GateState::Empty;
                    state = unpoison(self.ready.wait(state));
                }
                GateState::Closed => return Err(OrchestrationError::Abandoned),
            }
        }
    }

    /// Like `take`, but closes the gate with `Timeout` once `timeout` elapses.
    /// A timeout too large to express as a deadline waits without one.
    #[cfg(not(feature = "loom"))]
    fn take_timeout(&self, timeout: Duration) -> Result<T> {
        let Some(deadline) = std::time::Instant::now().checked_add(timeout) else {
            return self.take();
        };
        let mut state = lock(&self.state);
        loop {
            match core::mem::replace(&mut *state, GateState::Closed) {
                GateState::Filled(outcome) => return outcome,
                GateState::Closed => return Err(OrchestrationError::Abandoned),
                GateState::Empty => {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        // Left closed: a late fill finds a non-empty gate.
                        return Err(OrchestrationError::Timeout(timeout));
                    }
                    *state = GateState::Empty;
                    state = unpoison(self.ready.wait_timeout(state, deadline - now)).0;
                }
            }
        }
    }
}

/// Writer side of a gate, held by the running graph.
///
/// If the last `Completer` is dropped while the gate is still empty, the gate
/// is filled with `OrchestrationError::Abandoned`, so a waiter never hangs on
/// a graph that lost its work.
#[derive(Debug)]
pub struct Completer<T> {
    gate: Arc<CompletionGate<T>>,
}

impl<T> Completer<T> {
    /// See `CompletionGate::fill`.
    pub fn complete(&self, outcome: Result<T>) -> bool {
        self.gate.fill(outcome)
    }

    pub fn is_completed(&self) -> bool {
        self.gate.is_filled()
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if self.gate.fill(Err(OrchestrationError::Abandoned)) {
            tracing::warn!("completer dropped before the graph produced an outcome");
        }
    }
}

/// Reader side of a gate. Consumed by waiting, so the outcome is read once.
#[must_use]
#[derive(Debug)]
pub struct AsyncHandle<T> {
    gate: Arc<CompletionGate<T>>,
}

impl<T> AsyncHandle<T> {
    /// Park the calling thread until the graph completes.
    ///
    /// # Errors
    /// The graph's terminal failure.
    pub fn wait(self) -> Result<T> {
        self.gate.take()
    }

    /// Park the calling thread for at most `timeout`.
    ///
    /// On expiry the graph keeps running; its eventual outcome is discarded.
    ///
    /// # Errors
    /// The graph's terminal failure, or `Timeout` on expiry.
    #[cfg(not(feature = "loom"))]
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        self.gate.take_timeout(timeout)
    }

    /// Whether the outcome is ready, without blocking.
    pub fn is_complete(&self) -> bool {
        self.gate.is_filled()
    }
}

/// Create a connected writer/reader pair over a fresh gate.
pub fn channel<T>() -> (Completer<T>, AsyncHandle<T>) {
    let gate = Arc::new(CompletionGate::new());
    (
        Completer {
            gate: Arc::clone(&gate),
        },
        AsyncHandle { gate },
    )
}
