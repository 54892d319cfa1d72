// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Starting tasks and reading their outcome.
//!
//! `spawn` runs the body on the calling thread until its first suspension.
//! Whatever the body produces ends up in the task's channel, panics
//! included.

use std::any::Any;
use std::future::{Future, IntoFuture};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::channel::{Ready, ResultChannel};
use crate::error::TaskError;
use crate::task::{next_task_id, RawTask};

/// Consumer side of a task's outcome channel.
///
/// Dropping the handle does not stop the task; the outcome is discarded.
pub struct TaskHandle<T> {
    id: u64,
    channel: Arc<ResultChannel<T>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Non-blocking: has the task written its outcome?
    pub fn is_ready(&self) -> bool {
        self.channel.try_is_ready()
    }

    /// Block the calling thread until the task finishes.
    ///
    /// Only for callers that are not tasks themselves; inside a task, `.await`
    /// the handle instead.
    pub fn consume(&self) -> Result<T, TaskError> {
        self.channel.consume()
    }

    pub fn channel(&self) -> &Arc<ResultChannel<T>> {
        &self.channel
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .finish()
    }
}

impl<T: Send + 'static> IntoFuture for TaskHandle<T> {
    type Output = Result<T, TaskError>;
    type IntoFuture = Ready<T>;

    fn into_future(self) -> Ready<T> {
        self.channel.ready()
    }
}

/// Start a task.
///
/// The body runs right away on the calling thread. When it suspends, this
/// returns; the body continues on whichever thread resumes it.
pub fn spawn<T, F>(body: F) -> TaskHandle<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T, TaskError>> + Send + 'static,
{
    let id = next_task_id();
    let channel = Arc::new(ResultChannel::new());
    let producer = channel.clone();

    let future = async move {
        let outcome = match CatchPanic::new(body).await {
            Ok(outcome) => outcome,
            Err(msg) => {
                tracing::warn!(task = id, panic = %msg, "task body panicked");
                Err(TaskError::Panicked(msg))
            }
        };
        if let Err(err) = producer.complete(outcome) {
            // Nothing else holds the producer side.
            panic!("task {id} outcome written twice: {err}");
        }
    };

    tracing::trace!(task = id, "task spawned");
    let raw = RawTask::new(id, Box::pin(future));
    raw.resume();

    TaskHandle { id, channel }
}

/// Start a task and block until it finishes.
pub fn block_on<T, F>(body: F) -> Result<T, TaskError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, TaskError>> + Send + 'static,
{
    spawn(body).consume()
}

/// Converts a panic inside `poll` into an error message.
struct CatchPanic<F> {
    inner: Pin<Box<F>>,
}

impl<F> CatchPanic<F> {
    fn new(inner: F) -> Self {
        Self {
            inner: Box::pin(inner),
        }
    }
}

impl<F: Future> Future for CatchPanic<F> {
    type Output = Result<F::Output, String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.inner.as_mut();
        match panic::catch_unwind(AssertUnwindSafe(move || inner.poll(cx))) {
            Ok(Poll::Ready(val)) => Poll::Ready(Ok(val)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(e) => Poll::Ready(Err(panic_message(e))),
        }
    }
}

pub(crate) fn panic_message(e: Box<dyn Any + Send>) -> String {
    if let Some(s) = e.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = e.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
