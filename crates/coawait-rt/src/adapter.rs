// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Suspension adapter: await a blocking source inside a task.
//!
//! A blocking source has no continuation hook, so suspending on it costs one
//! OS thread: the waiter blocks on the source, resumes the task exactly once,
//! and exits. The resumed task keeps running on the waiter thread.
//!
//! The thread is only spawned when the readiness probe fails. Sources that
//! are already resolved take the fast path without leaving the caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use crate::blocking::BlockingFuture;
use crate::channel::{ResultChannel, SharedWaker};
use crate::config::WaiterConfig;
use crate::error::TaskError;

/// Something whose outcome can only be obtained by blocking a thread.
pub trait BlockingSource: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Wait up to `timeout`. Returns whether the outcome is available.
    /// A zero timeout must not block.
    fn wait_for(&self, timeout: Duration) -> bool;

    /// Block until the outcome is available.
    fn wait(&self);

    /// Take the outcome once it is available.
    fn take(&self) -> Result<Self::Output, TaskError>;
}

impl<T: Send + 'static> BlockingSource for BlockingFuture<T> {
    type Output = T;

    fn wait_for(&self, timeout: Duration) -> bool {
        BlockingFuture::wait_for(self, timeout)
    }

    fn wait(&self) {
        BlockingFuture::wait(self)
    }

    fn take(&self) -> Result<T, TaskError> {
        self.get()
    }
}

impl<T: Send + 'static> BlockingSource for ResultChannel<T> {
    type Output = T;

    fn wait_for(&self, timeout: Duration) -> bool {
        self.wait_timeout(timeout)
    }

    fn wait(&self) {
        ResultChannel::wait(self)
    }

    fn take(&self) -> Result<T, TaskError> {
        self.consume()
    }
}

struct Shared {
    config: WaiterConfig,
    live: AtomicUsize,
    spawned: AtomicU64,
}

/// Spawns waiter threads according to a [`WaiterConfig`].
///
/// Cheap to clone; clones share the live-waiter count.
#[derive(Clone)]
pub struct SuspensionAdapter {
    shared: Arc<Shared>,
}

impl SuspensionAdapter {
    pub fn new(config: WaiterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                live: AtomicUsize::new(0),
                spawned: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &WaiterConfig {
        &self.shared.config
    }

    /// Waiter threads currently blocked on a source.
    pub fn live_waiters(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Waiter threads spawned over the adapter's lifetime.
    pub fn spawned_waiters(&self) -> u64 {
        self.shared.spawned.load(Ordering::Acquire)
    }

    /// Zero-timeout readiness probe. Never blocks, never spawns.
    pub fn is_ready<S: BlockingSource>(&self, source: &S) -> bool {
        source.wait_for(Duration::ZERO)
    }

    /// Spawn one waiter thread that blocks on `source`, then runs
    /// `continuation` once on that thread.
    ///
    /// Fails without spawning when the configured limit is reached or the OS
    /// refuses the thread.
    pub fn on_suspend<S, F>(&self, source: Arc<S>, continuation: F) -> Result<(), TaskError>
    where
        S: BlockingSource,
        F: FnOnce() + Send + 'static,
    {
        let slot = self.reserve()?;
        let n = self.shared.spawned.fetch_add(1, Ordering::AcqRel);
        let config = &self.shared.config;

        let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name, n));
        if let Some(bytes) = config.stack_size {
            builder = builder.stack_size(bytes);
        }

        let spawned = builder.spawn(move || {
            source.wait();
            // Release before resuming: the task may suspend again from here.
            drop(slot);
            tracing::trace!(waiter = n, "waiter resuming task");
            continuation();
        });

        match spawned {
            Ok(_) => {
                tracing::trace!(waiter = n, "waiter spawned");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not spawn waiter thread");
                Err(TaskError::WaiterSpawn(err.to_string()))
            }
        }
    }

    /// Take the outcome of a source that reported ready.
    pub fn on_resume<S: BlockingSource>(&self, source: &S) -> Result<S::Output, TaskError> {
        source.take()
    }

    /// Wrap `source` in a future a task can `.await`.
    pub fn adapt<S: BlockingSource>(&self, source: S) -> Adapt<S> {
        Adapt {
            adapter: self.clone(),
            source: Arc::new(source),
            state: AdaptState::Start,
        }
    }

    fn reserve(&self) -> Result<WaiterSlot, TaskError> {
        let live = &self.shared.live;
        match self.shared.config.max_waiters {
            None => {
                live.fetch_add(1, Ordering::AcqRel);
            }
            Some(limit) => {
                live.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < limit).then_some(n + 1)
                })
                .map_err(|_| TaskError::WaiterLimit { limit })?;
            }
        }
        Ok(WaiterSlot {
            shared: self.shared.clone(),
        })
    }
}

impl Default for SuspensionAdapter {
    fn default() -> Self {
        Self::new(WaiterConfig::default())
    }
}

impl std::fmt::Debug for SuspensionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspensionAdapter")
            .field("config", &self.shared.config)
            .field("live", &self.live_waiters())
            .finish()
    }
}

/// One unit of the live-waiter count, returned on drop.
struct WaiterSlot {
    shared: Arc<Shared>,
}

impl Drop for WaiterSlot {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Await `source` with the default, unbounded adapter.
pub fn adapt<S: BlockingSource>(source: S) -> Adapt<S> {
    SuspensionAdapter::default().adapt(source)
}

enum AdaptState {
    Start,
    /// `resumed` is set by the waiter right before it wakes the task.
    Waiting {
        resumed: Arc<AtomicBool>,
        waker: Arc<SharedWaker>,
    },
    Done,
}

/// Future returned by [`SuspensionAdapter::adapt`].
///
/// Resumption goes to the waker of the most recent pending poll.
pub struct Adapt<S> {
    adapter: SuspensionAdapter,
    source: Arc<S>,
    state: AdaptState,
}

impl<S: BlockingSource> Future for Adapt<S> {
    type Output = Result<S::Output, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &self.state {
            AdaptState::Start => {
                if self.adapter.is_ready(&*self.source) {
                    tracing::debug!("blocking source ready, no waiter needed");
                    self.state = AdaptState::Done;
                    return Poll::Ready(self.adapter.on_resume(&*self.source));
                }

                let resumed = Arc::new(AtomicBool::new(false));
                let waker = SharedWaker::new(cx.waker());
                let flag = resumed.clone();
                let wake = waker.clone();
                let suspended = self.adapter.on_suspend(self.source.clone(), move || {
                    flag.store(true, Ordering::Release);
                    wake.wake();
                });

                match suspended {
                    Ok(()) => {
                        self.state = AdaptState::Waiting { resumed, waker };
                        Poll::Pending
                    }
                    Err(err) => {
                        self.state = AdaptState::Done;
                        Poll::Ready(Err(err))
                    }
                }
            }
            AdaptState::Waiting { resumed, waker } => {
                // The source is off limits until the waiter is done with it.
                if !resumed.load(Ordering::Acquire) {
                    waker.update(cx.waker());
                    // The waiter may have taken the old waker before the swap.
                    if !resumed.load(Ordering::Acquire) {
                        return Poll::Pending;
                    }
                }
                self.state = AdaptState::Done;
                Poll::Ready(self.adapter.on_resume(&*self.source))
            }
            AdaptState::Done => panic!("`Adapt` polled after completion"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::promise;
    use crate::spawn::spawn;
    use std::sync::mpsc;

    #[test]
    fn probe_never_spawns() {
        let adapter = SuspensionAdapter::default();
        let (_p, f) = promise::<i32>();
        for _ in 0..10 {
            assert!(!adapter.is_ready(&f));
        }
        assert_eq!(adapter.spawned_waiters(), 0);
        assert_eq!(adapter.live_waiters(), 0);
    }

    #[test]
    fn ready_source_takes_fast_path() {
        let adapter = SuspensionAdapter::default();
        let caller = thread::current().id();
        let task_adapter = adapter.clone();
        let h = spawn(async move {
            let v = task_adapter.adapt(BlockingFuture::ready(5)).await?;
            Ok::<_, TaskError>((v, thread::current().id()))
        });
        assert_eq!(h.consume().unwrap(), (5, caller));
        assert_eq!(adapter.spawned_waiters(), 0);
    }

    #[test]
    fn pending_source_spawns_one_waiter() {
        let adapter = SuspensionAdapter::new(WaiterConfig::default().with_thread_name("probe"));
        let (p, f) = promise();
        let task_adapter = adapter.clone();
        let h = spawn(async move {
            let v = task_adapter.adapt(f).await?;
            let name = thread::current().name().map(str::to_string);
            Ok::<_, TaskError>((v, name))
        });
        assert!(!h.is_ready());
        assert_eq!(adapter.spawned_waiters(), 1);

        p.set_value(9);
        let (v, name) = h.consume().unwrap();
        assert_eq!(v, 9);
        assert_eq!(name.as_deref(), Some("probe-0"));
        assert_eq!(adapter.spawned_waiters(), 1);
    }

    #[test]
    fn on_suspend_runs_continuation_once() {
        let adapter = SuspensionAdapter::default();
        let (p, f) = promise::<u8>();
        let source = Arc::new(f);
        let (tx, rx) = mpsc::channel();
        adapter
            .on_suspend(source.clone(), move || tx.send(()).unwrap())
            .unwrap();
        p.set_value(1);
        rx.recv().unwrap();
        // Sender dropped with the continuation: no second call.
        assert!(rx.recv().is_err());
        assert!(adapter.is_ready(&*source));
        assert_eq!(adapter.on_resume(&*source).unwrap(), 1);
    }

    #[test]
    fn limit_refuses_extra_waiters() {
        let adapter = SuspensionAdapter::new(WaiterConfig::default().with_max_waiters(1));
        let (p1, f1) = promise::<()>();
        let (_p2, f2) = promise::<()>();

        adapter.on_suspend(Arc::new(f1), || {}).unwrap();
        assert_eq!(adapter.live_waiters(), 1);
        assert_eq!(
            adapter.on_suspend(Arc::new(f2), || {}),
            Err(TaskError::WaiterLimit { limit: 1 })
        );

        p1.set_value(());
        while adapter.live_waiters() != 0 {
            thread::yield_now();
        }
    }

    #[test]
    fn limit_surfaces_at_suspension_point() {
        let adapter = SuspensionAdapter::new(WaiterConfig::default().with_max_waiters(1));
        let (p1, f1) = promise::<()>();
        adapter.on_suspend(Arc::new(f1), || {}).unwrap();

        let (_p2, f2) = promise::<()>();
        let task_adapter = adapter.clone();
        let h = spawn(async move { task_adapter.adapt(f2).await });
        assert_eq!(h.consume(), Err(TaskError::WaiterLimit { limit: 1 }));
        p1.set_value(());
    }

    struct CountingWaker(AtomicUsize);

    impl std::task::Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn waiter_wakes_the_latest_waker() {
        let (p, f) = promise::<u32>();
        let mut fut = Box::pin(adapt(f));

        let first = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let second = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let first_waker = std::task::Waker::from(first.clone());
        let second_waker = std::task::Waker::from(second.clone());

        assert!(fut
            .as_mut()
            .poll(&mut Context::from_waker(&first_waker))
            .is_pending());
        assert!(fut
            .as_mut()
            .poll(&mut Context::from_waker(&second_waker))
            .is_pending());

        p.set_value(12);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while second.0.load(Ordering::SeqCst) == 0 {
            assert!(std::time::Instant::now() < deadline, "waiter never woke");
            thread::yield_now();
        }
        assert_eq!(first.0.load(Ordering::SeqCst), 0);
        match fut.as_mut().poll(&mut Context::from_waker(&second_waker)) {
            Poll::Ready(outcome) => assert_eq!(outcome.unwrap(), 12),
            Poll::Pending => panic!("woken future still pending"),
        }
    }

    #[test]
    fn result_channel_as_source() {
        let ch = Arc::new(ResultChannel::new());
        let adapter = SuspensionAdapter::default();
        assert!(!adapter.is_ready(&*ch));
        ch.resolve("done").unwrap();
        assert!(adapter.is_ready(&*ch));
        assert_eq!(adapter.on_resume(&*ch).unwrap(), "done");
    }
}
