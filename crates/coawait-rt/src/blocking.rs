// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Blocking promise/future pair.
//!
//! The kind of future a task cannot suspend on directly: the only way to
//! learn its outcome is to block a thread. Run it through
//! [`adapt`](crate::adapter::adapt) to await it inside a task.
//!
//! The slot lock is only held for state checks. Blocking happens on the
//! condvar, so a timed wait from one thread is never stuck behind an
//! untimed wait on another.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::error::{ChannelError, TaskError};
use crate::spawn::panic_message;

type Outcome<T> = Result<T, TaskError>;

const BROKEN_PROMISE: &str = "promise dropped without a value";

enum Inner<T> {
    Pending,
    Ready(Outcome<T>),
    Taken,
}

struct Shared<T> {
    state: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn new(inner: Inner<T>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(inner),
            ready: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a connected promise/future pair.
pub fn promise<T>() -> (Promise<T>, BlockingFuture<T>) {
    let shared = Shared::new(Inner::Pending);
    (
        Promise {
            shared: Some(shared.clone()),
        },
        BlockingFuture { shared },
    )
}

/// Run `f` on a new OS thread and return a future for its outcome.
///
/// A panic in `f` resolves the future with [`TaskError::Panicked`].
pub fn spawn_blocking<T, F>(f: F) -> BlockingFuture<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TaskError> + Send + 'static,
{
    let (promise, future) = promise();
    thread::spawn(move || {
        let outcome = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
            Ok(outcome) => outcome,
            Err(e) => Err(TaskError::Panicked(panic_message(e))),
        };
        promise.complete(outcome);
    });
    future
}

/// Producer side. Dropping it unfulfilled breaks the promise.
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Promise<T> {
    pub fn set_value(self, value: T) {
        self.complete(Ok(value));
    }

    pub fn set_error(self, error: TaskError) {
        self.complete(Err(error));
    }

    fn complete(mut self, outcome: Outcome<T>) {
        self.fulfil(outcome);
    }

    fn fulfil(&mut self, outcome: Outcome<T>) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        {
            let mut inner = shared.lock();
            if matches!(*inner, Inner::Pending) {
                *inner = Inner::Ready(outcome);
            }
        }
        shared.ready.notify_all();
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.shared.is_some() {
            tracing::debug!("promise dropped unfulfilled");
            self.fulfil(Err(TaskError::failed(BROKEN_PROMISE)));
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("fulfilled", &self.shared.is_none())
            .finish()
    }
}

/// Consumer side: readable only by blocking.
pub struct BlockingFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> BlockingFuture<T> {
    /// A future that is already resolved.
    pub fn ready(value: T) -> Self {
        Self {
            shared: Shared::new(Inner::Ready(Ok(value))),
        }
    }

    /// A future that has already failed.
    pub fn failed(error: TaskError) -> Self {
        Self {
            shared: Shared::new(Inner::Ready(Err(error))),
        }
    }

    /// Wait up to `timeout` for the outcome. Returns readiness.
    ///
    /// A zero timeout never blocks, even while another thread is inside
    /// [`wait`](Self::wait).
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let inner = self.shared.lock();
        if !matches!(*inner, Inner::Pending) || timeout.is_zero() {
            return !matches!(*inner, Inner::Pending);
        }
        let (inner, _) = self
            .shared
            .ready
            .wait_timeout_while(inner, timeout, |i| matches!(i, Inner::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        !matches!(*inner, Inner::Pending)
    }

    /// Block until the outcome is available.
    pub fn wait(&self) {
        drop(self.wait_ready());
    }

    /// Block until resolved, then take the outcome.
    ///
    /// A second call fails with `AlreadyConsumed`.
    pub fn get(&self) -> Result<T, TaskError> {
        let mut inner = self.wait_ready();
        match std::mem::replace(&mut *inner, Inner::Taken) {
            Inner::Ready(outcome) => outcome,
            Inner::Taken => Err(ChannelError::AlreadyConsumed.into()),
            Inner::Pending => unreachable!("wait_ready() leaves the future resolved"),
        }
    }

    fn wait_ready(&self) -> MutexGuard<'_, Inner<T>> {
        self.shared
            .ready
            .wait_while(self.shared.lock(), |i| matches!(i, Inner::Pending))
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for BlockingFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.lock() {
            Inner::Pending => "pending",
            Inner::Ready(_) => "ready",
            Inner::Taken => "taken",
        };
        f.debug_struct("BlockingFuture").field("state", &state).finish()
    }
}
