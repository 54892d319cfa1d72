// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Lazy generators on the same suspension protocol.
//!
//! The body is an `async` block that hands values out through a
//! [`Yielder`]. Each `yield_value(..).await` stores one value and suspends;
//! the consumer resumes the body on its own thread when it wants the next
//! one. Single-threaded, nothing blocks, no waiter threads.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

type Slot<T> = Rc<RefCell<Option<T>>>;

/// Handed to a generator body to produce values.
pub struct Yielder<T> {
    slot: Slot<T>,
}

impl<T> Yielder<T> {
    /// Produce `value` and suspend until the consumer asks for more.
    pub fn yield_value(&self, value: T) -> YieldValue<T> {
        YieldValue {
            slot: self.slot.clone(),
            value: Some(value),
        }
    }
}

/// Future returned by [`Yielder::yield_value`].
pub struct YieldValue<T> {
    slot: Slot<T>,
    value: Option<T>,
}

// `value` is moved out, never pinned.
impl<T> Unpin for YieldValue<T> {}

impl<T> Future for YieldValue<T> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        match self.value.take() {
            Some(value) => {
                *self.slot.borrow_mut() = Some(value);
                Poll::Pending
            }
            None => Poll::Ready(()),
        }
    }
}

struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}
}

/// Finite, non-restartable sequence produced by an `async` body.
pub struct Generator<T> {
    slot: Slot<T>,
    body: Option<Pin<Box<dyn Future<Output = ()>>>>,
}

impl<T: 'static> Generator<T> {
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Yielder<T>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let slot = Rc::new(RefCell::new(None));
        let yielder = Yielder { slot: slot.clone() };
        Self {
            slot,
            body: Some(Box::pin(body(yielder))),
        }
    }
}

impl<T> Generator<T> {
    /// Is another value available? Runs the body up to its next yield.
    ///
    /// Once this returns `false` it keeps returning `false`.
    pub fn has_next(&mut self) -> bool {
        if self.slot.borrow().is_some() {
            return true;
        }
        let Some(body) = self.body.as_mut() else {
            return false;
        };

        let waker = Waker::from(Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);
        let poll = body.as_mut().poll(&mut cx);
        match poll {
            Poll::Ready(()) => {
                self.body = None;
            }
            Poll::Pending => {
                if self.slot.borrow().is_none() {
                    tracing::warn!("generator body suspended without yielding, ending sequence");
                    self.body = None;
                }
            }
        }
        self.slot.borrow().is_some()
    }

    pub fn is_exhausted(&self) -> bool {
        self.body.is_none() && self.slot.borrow().is_none()
    }
}

impl<T> Iterator for Generator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.has_next() {
            self.slot.borrow_mut().take()
        } else {
            None
        }
    }
}

/// Yield the characters of `s` one at a time.
pub fn explode(s: &str) -> Generator<char> {
    let chars: Vec<char> = s.chars().collect();
    Generator::new(move |co| async move {
        for ch in chars {
            co.yield_value(ch).await;
        }
    })
}
