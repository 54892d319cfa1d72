// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coawait runtime library.
//!
//! A task is an `async` body that writes its outcome into a single-assignment
//! [`ResultChannel`]. There is no scheduler or event loop: a task runs on the
//! thread that starts it, suspends by returning, and continues on whichever
//! thread resolves what it was waiting for.
//!
//! Components:
//! - channel: the result channel and its continuation hook
//! - task/spawn: task state machine, `spawn`, `block_on`, `TaskHandle`
//! - adapter: await a blocking source by parking one waiter thread on it
//! - blocking: promise/future pair that can only be read by blocking
//! - config: waiter-thread policy
//! - generator: lazy sequences on the same suspension protocol
//!
//! ```ignore
//! use coawait_rt::{adapt, block_on, spawn_blocking};
//!
//! let result = block_on(async {
//!     let v = adapt(spawn_blocking(|| Ok(42))).await?;
//!     Ok(v)
//! });
//! assert_eq!(result.unwrap(), 42);
//! ```

pub mod adapter;
pub mod blocking;
pub mod channel;
pub mod config;
pub mod error;
pub mod generator;
pub mod spawn;
mod task;

pub use adapter::{adapt, Adapt, BlockingSource, SuspensionAdapter};
pub use blocking::{promise, spawn_blocking, BlockingFuture, Promise};
pub use channel::{Continuation, Ready, ResultChannel};
pub use config::WaiterConfig;
pub use error::{ChannelError, ConfigError, TaskError};
pub use generator::{explode, Generator, Yielder};
pub use spawn::{block_on, spawn, TaskHandle};
