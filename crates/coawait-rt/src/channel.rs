// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-assignment result channel.
//!
//! One slot, one mutex. The transition out of `Empty` and the registration
//! of the continuation happen under the same lock, so a resolution can never
//! slip in between a readiness check and a registration.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::error::{ChannelError, TaskError};

/// One-shot callback run after the channel resolves.
pub type Continuation = Box<dyn FnOnce() + Send>;

enum Slot<T> {
    Empty,
    Ready(Result<T, TaskError>),
    Consumed,
}

struct State<T> {
    slot: Slot<T>,
    continuation: Option<Continuation>,
}

/// Thread-safe slot holding either a value or a [`TaskError`].
///
/// Exactly one of [`resolve`](Self::resolve) / [`fail`](Self::fail) succeeds.
/// Share it with `Arc`; it lives as long as the longest holder.
pub struct ResultChannel<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> ResultChannel<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                slot: Slot::Empty,
                continuation: None,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a value and run the registered continuation, if any.
    pub fn resolve(&self, value: T) -> Result<(), ChannelError> {
        self.complete(Ok(value))
    }

    /// Store a failure and run the registered continuation, if any.
    pub fn fail(&self, error: TaskError) -> Result<(), ChannelError> {
        self.complete(Err(error))
    }

    /// Store an outcome. Fails with `AlreadyResolved` on a non-empty slot.
    pub fn complete(&self, outcome: Result<T, TaskError>) -> Result<(), ChannelError> {
        let continuation = {
            let mut state = self.lock();
            if !matches!(state.slot, Slot::Empty) {
                return Err(ChannelError::AlreadyResolved);
            }
            state.slot = Slot::Ready(outcome);
            state.continuation.take()
        };
        self.ready.notify_all();

        // Run outside the lock: the continuation may consume this channel.
        if let Some(continuation) = continuation {
            tracing::trace!("channel resolved, running continuation");
            continuation();
        }
        Ok(())
    }

    /// Non-blocking readiness probe.
    pub fn try_is_ready(&self) -> bool {
        !matches!(self.lock().slot, Slot::Empty)
    }

    /// Register a one-shot continuation.
    ///
    /// If the channel is already resolved, `f` runs right away on the
    /// calling thread. Only one continuation may be pending at a time.
    pub fn register_on_ready<F>(&self, f: F) -> Result<(), ChannelError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        if matches!(state.slot, Slot::Empty) {
            if state.continuation.is_some() {
                return Err(ChannelError::ContinuationRegistered);
            }
            state.continuation = Some(Box::new(f));
            return Ok(());
        }
        drop(state);
        f();
        Ok(())
    }

    /// Block until resolved, then take the outcome.
    ///
    /// A second call fails with `AlreadyConsumed`.
    pub fn consume(&self) -> Result<T, TaskError> {
        let mut state = self.lock();
        while matches!(state.slot, Slot::Empty) {
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        Self::take(&mut state)
    }

    /// Take the outcome if resolved, without blocking.
    pub fn try_consume(&self) -> Option<Result<T, TaskError>> {
        let mut state = self.lock();
        if matches!(state.slot, Slot::Empty) {
            return None;
        }
        Some(Self::take(&mut state))
    }

    /// Block until resolved or until `timeout` elapses. Returns readiness.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.lock();
        if !matches!(state.slot, Slot::Empty) || timeout.is_zero() {
            return !matches!(state.slot, Slot::Empty);
        }
        let (state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| matches!(s.slot, Slot::Empty))
            .unwrap_or_else(PoisonError::into_inner);
        !matches!(state.slot, Slot::Empty)
    }

    /// Block until resolved without taking the outcome.
    pub fn wait(&self) {
        let mut state = self.lock();
        while matches!(state.slot, Slot::Empty) {
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn take(state: &mut State<T>) -> Result<T, TaskError> {
        match std::mem::replace(&mut state.slot, Slot::Consumed) {
            Slot::Ready(outcome) => outcome,
            Slot::Consumed => Err(ChannelError::AlreadyConsumed.into()),
            Slot::Empty => unreachable!("take() called on an empty slot"),
        }
    }
}

impl<T: Send + 'static> ResultChannel<T> {
    /// Future that resolves with this channel's outcome.
    ///
    /// Suspends through [`register_on_ready`](Self::register_on_ready); no
    /// thread is spawned.
    pub fn ready(self: Arc<Self>) -> Ready<T> {
        Ready {
            channel: self,
            waker: None,
        }
    }
}

impl<T> Default for ResultChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ResultChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let slot = match state.slot {
            Slot::Empty => "empty",
            Slot::Ready(Ok(_)) => "value",
            Slot::Ready(Err(_)) => "error",
            Slot::Consumed => "consumed",
        };
        f.debug_struct("ResultChannel")
            .field("slot", &slot)
            .field("continuation", &state.continuation.is_some())
            .finish()
    }
}

/// Waker slot shared between a pending future and its continuation.
///
/// Holds the waker of the most recent pending poll.
pub(crate) struct SharedWaker {
    waker: Mutex<Option<Waker>>,
}

impl SharedWaker {
    pub(crate) fn new(waker: &Waker) -> Arc<Self> {
        Arc::new(Self {
            waker: Mutex::new(Some(waker.clone())),
        })
    }

    pub(crate) fn update(&self, waker: &Waker) {
        let mut slot = self.waker.lock().unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            Some(current) if current.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }
    }

    pub(crate) fn wake(&self) {
        let waker = self
            .waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Future returned by [`ResultChannel::ready`].
pub struct Ready<T> {
    channel: Arc<ResultChannel<T>>,
    waker: Option<Arc<SharedWaker>>,
}

impl<T: Send + 'static> Future for Ready<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.channel.try_consume() {
            return Poll::Ready(outcome);
        }

        match &self.waker {
            Some(shared) => shared.update(cx.waker()),
            None => {
                let shared = SharedWaker::new(cx.waker());
                let wake = shared.clone();
                self.waker = Some(shared);
                if let Err(err) = self.channel.register_on_ready(move || wake.wake()) {
                    return Poll::Ready(Err(err.into()));
                }
            }
        }

        // Resolved while registering or while the waker was swapped.
        if let Some(outcome) = self.channel.try_consume() {
            return Poll::Ready(outcome);
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn resolve_then_consume() {
        let ch = ResultChannel::new();
        assert!(!ch.try_is_ready());
        ch.resolve(42).unwrap();
        assert!(ch.try_is_ready());
        assert_eq!(ch.consume().unwrap(), 42);
    }

    #[test]
    fn fail_then_consume() {
        let ch = ResultChannel::<i32>::new();
        ch.fail(TaskError::failed("boom")).unwrap();
        assert_eq!(ch.consume(), Err(TaskError::failed("boom")));
    }

    #[test]
    fn second_resolution_is_rejected() {
        let ch = ResultChannel::new();
        ch.resolve(1).unwrap();
        assert_eq!(ch.resolve(2), Err(ChannelError::AlreadyResolved));
        assert_eq!(
            ch.fail(TaskError::failed("late")),
            Err(ChannelError::AlreadyResolved)
        );
        assert_eq!(ch.consume().unwrap(), 1);
    }

    #[test]
    fn second_consume_fails() {
        let ch = ResultChannel::new();
        ch.resolve("once").unwrap();
        assert_eq!(ch.consume().unwrap(), "once");
        assert_eq!(
            ch.consume(),
            Err(TaskError::Channel(ChannelError::AlreadyConsumed))
        );
    }

    #[test]
    fn consume_blocks_until_resolved() {
        let ch = Arc::new(ResultChannel::new());
        let producer = ch.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.resolve(7).unwrap();
        });
        assert_eq!(ch.consume().unwrap(), 7);
        t.join().unwrap();
    }

    #[test]
    fn probe_has_no_side_effects() {
        let ch = ResultChannel::<u8>::new();
        for _ in 0..100 {
            assert!(!ch.try_is_ready());
        }
        assert!(ch.try_consume().is_none());
        ch.resolve(3).unwrap();
        assert_eq!(ch.try_consume(), Some(Ok(3)));
    }

    #[test]
    fn continuation_runs_after_resolution() {
        let ch = Arc::new(ResultChannel::new());
        let observer = ch.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        ch.register_on_ready(move || {
            tx.send(observer.try_consume()).unwrap();
        })
        .unwrap();
        assert!(rx.try_recv().is_err());
        ch.resolve(5).unwrap();
        assert_eq!(rx.recv().unwrap(), Some(Ok(5)));
    }

    #[test]
    fn late_registration_runs_immediately() {
        let ch = ResultChannel::new();
        ch.resolve(()).unwrap();
        let caller = thread::current().id();
        let (tx, rx) = std::sync::mpsc::channel();
        ch.register_on_ready(move || tx.send(thread::current().id()).unwrap())
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), caller);
    }

    #[test]
    fn only_one_continuation() {
        let ch = ResultChannel::<()>::new();
        ch.register_on_ready(|| {}).unwrap();
        assert_eq!(
            ch.register_on_ready(|| {}),
            Err(ChannelError::ContinuationRegistered)
        );
    }

    #[test]
    fn concurrent_double_resolve_has_one_winner() {
        for _ in 0..50 {
            let ch = Arc::new(ResultChannel::new());
            let barrier = Arc::new(Barrier::new(4));
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let ch = ch.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        ch.resolve(i)
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let winners = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(winners, 1);
            assert!(results
                .iter()
                .filter(|r| r.is_err())
                .all(|r| *r == Err(ChannelError::AlreadyResolved)));
        }
    }

    #[test]
    fn racing_registration_fires_exactly_once() {
        for _ in 0..200 {
            let ch = Arc::new(ResultChannel::new());
            let fired = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(2));

            let producer = {
                let ch = ch.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    ch.resolve(1).unwrap();
                })
            };

            let counter = fired.clone();
            barrier.wait();
            ch.register_on_ready(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
            producer.join().unwrap();

            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }
    }

    struct CountingWaker(AtomicUsize);

    impl std::task::Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn ready_wakes_the_latest_waker() {
        let ch = Arc::new(ResultChannel::new());
        let mut fut = Box::pin(ch.clone().ready());

        let first = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let second = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let first_waker = Waker::from(first.clone());
        let second_waker = Waker::from(second.clone());

        assert!(fut
            .as_mut()
            .poll(&mut Context::from_waker(&first_waker))
            .is_pending());
        assert!(fut
            .as_mut()
            .poll(&mut Context::from_waker(&second_waker))
            .is_pending());

        ch.resolve(4).unwrap();
        assert_eq!(first.0.load(Ordering::SeqCst), 0);
        assert_eq!(second.0.load(Ordering::SeqCst), 1);
        match fut.as_mut().poll(&mut Context::from_waker(&second_waker)) {
            Poll::Ready(outcome) => assert_eq!(outcome.unwrap(), 4),
            Poll::Pending => panic!("resolved channel still pending"),
        }
    }

    #[test]
    fn wait_timeout_reports_readiness() {
        let ch = ResultChannel::new();
        assert!(!ch.wait_timeout(Duration::ZERO));
        assert!(!ch.wait_timeout(Duration::from_millis(5)));
        ch.resolve(0u8).unwrap();
        assert!(ch.wait_timeout(Duration::ZERO));
    }
}
