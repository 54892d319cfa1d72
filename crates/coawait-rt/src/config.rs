// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Waiter-thread policy.

use std::env;

use crate::error::ConfigError;

pub const MAX_WAITERS_VAR: &str = "COAWAIT_MAX_WAITERS";
pub const STACK_SIZE_VAR: &str = "COAWAIT_WAITER_STACK_SIZE";

/// How the suspension adapter spawns waiter threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaiterConfig {
    /// Upper bound on live waiter threads. `None` spawns without limit.
    pub max_waiters: Option<usize>,
    /// Name prefix; each waiter is `<thread_name>-<n>`.
    pub thread_name: String,
    /// Stack size in bytes. `None` keeps the platform default.
    pub stack_size: Option<usize>,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            max_waiters: None,
            thread_name: "coawait-waiter".to_string(),
            stack_size: None,
        }
    }
}

impl WaiterConfig {
    /// Defaults overlaid with `COAWAIT_MAX_WAITERS` and
    /// `COAWAIT_WAITER_STACK_SIZE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(MAX_WAITERS_VAR) {
            config.max_waiters = Some(parse_positive(MAX_WAITERS_VAR, &raw)?);
        }
        if let Some(raw) = lookup(STACK_SIZE_VAR) {
            config.stack_size = Some(parse_positive(STACK_SIZE_VAR, &raw)?);
        }
        Ok(config)
    }

    pub fn with_max_waiters(mut self, limit: usize) -> Self {
        self.max_waiters = Some(limit);
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
        }),
    }
}
