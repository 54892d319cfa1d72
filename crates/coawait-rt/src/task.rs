// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task representation.
//!
//! A task is a boxed future plus a state word. There is no scheduler: the
//! thread that starts a task polls it until the first suspension, and the
//! thread that wakes it polls it again. The state word keeps at most one
//! thread inside `poll` at a time.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Wake, Waker};

/// Task lifecycle states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Suspended, waiting for a continuation.
    Idle = 0,
    /// Some thread is polling the body.
    Running = 1,
    /// Woken while running; the running thread polls again.
    Notified = 2,
    /// Body finished, outcome written.
    Complete = 3,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Notified,
            _ => Self::Complete,
        }
    }
}

/// Type-erased body. The typed outcome goes through the task's channel.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_task_id() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) struct RawTask {
    id: u64,
    state: AtomicU8,
    future: Mutex<Option<BoxFuture>>,
}

impl std::fmt::Debug for RawTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawTask")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl RawTask {
    pub fn new(id: u64, future: BoxFuture) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(TaskState::Idle as u8),
            future: Mutex::new(Some(future)),
        })
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Resume the task on the calling thread.
    ///
    /// Idle tasks are polled here. A running task is flagged so its current
    /// poller goes around once more. Completed tasks ignore the call.
    pub fn resume(self: &Arc<Self>) {
        loop {
            match self.state() {
                TaskState::Idle => {
                    if self
                        .state
                        .compare_exchange(
                            TaskState::Idle as u8,
                            TaskState::Running as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        self.run();
                        return;
                    }
                }
                TaskState::Running => {
                    if self
                        .state
                        .compare_exchange(
                            TaskState::Running as u8,
                            TaskState::Notified as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return;
                    }
                }
                TaskState::Notified | TaskState::Complete => return,
            }
        }
    }

    /// Poll until the body suspends or finishes. State must be `Running`.
    fn run(self: &Arc<Self>) {
        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::trace!(task = self.id, "task running");

        loop {
            let Some(fut) = slot.as_mut() else {
                self.state
                    .store(TaskState::Complete as u8, Ordering::Release);
                return;
            };

            match fut.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {
                    *slot = None;
                    self.state
                        .store(TaskState::Complete as u8, Ordering::Release);
                    tracing::trace!(task = self.id, "task complete");
                    return;
                }
                Poll::Pending => {
                    if self
                        .state
                        .compare_exchange(
                            TaskState::Running as u8,
                            TaskState::Idle as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        tracing::trace!(task = self.id, "task suspended");
                        return;
                    }
                    // Woken during the poll.
                    self.state
                        .store(TaskState::Running as u8, Ordering::Release);
                }
            }
        }
    }
}

impl Wake for RawTask {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        tracing::trace!(task = self.id, "task resumed");
        self.resume();
    }
}
