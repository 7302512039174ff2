//! Per-class fixed-window rate limiting.
//!
//! The key is global by default: one budget per tool class for the whole
//! process. `DISABLE_RATE_LIMITING` turns the limiter into a pass-through,
//! and test harnesses can [`RateLimiter::reset`] the windows.

use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Tool classes with independent budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolClass {
    /// Entity/graph lookups.
    Read,
    /// Mutations.
    Write,
    /// Search pipeline calls.
    Search,
    /// Context management.
    Context,
    /// Export/import/backup/maintenance.
    System,
}

impl ToolClass {
    /// Calls allowed per minute.
    #[must_use]
    pub const fn limit_per_minute(self) -> u32 {
        match self {
            Self::Read => 1000,
            Self::Write => 100,
            Self::Search => 500,
            Self::Context => 50,
            Self::System => 20,
        }
    }

    /// Class label used in errors and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Search => "search",
            Self::Context => "context",
            Self::System => "system",
        }
    }
}

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window limiter over tool classes.
pub struct RateLimiter {
    windows: Mutex<HashMap<ToolClass, Window>>,
    disabled: bool,
}

impl RateLimiter {
    /// Creates a limiter; `disabled` makes it a pass-through.
    #[must_use]
    pub fn new(disabled: bool) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            disabled,
        }
    }

    /// Records one call; fails with [`Error::RateLimited`] when the class
    /// budget for the current window is spent.
    pub fn check(&self, class: ToolClass) -> Result<()> {
        if self.disabled {
            return Ok(());
        }
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let window = windows.entry(class).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) >= WINDOW {
            window.started = now;
            window.count = 0;
        }

        if window.count >= class.limit_per_minute() {
            let elapsed = now.duration_since(window.started);
            let retry_after_secs = WINDOW.saturating_sub(elapsed).as_secs().max(1);
            metrics::counter!("rate_limit_rejections_total", "class" => class.as_str())
                .increment(1);
            return Err(Error::RateLimited {
                tool_class: class.as_str().to_string(),
                retry_after_secs,
            });
        }

        window.count += 1;
        Ok(())
    }

    /// Clears every window. Test-harness hook.
    pub fn reset(&self) {
        self.windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_enforced_per_class() {
        let limiter = RateLimiter::new(false);
        for _ in 0..ToolClass::System.limit_per_minute() {
            limiter.check(ToolClass::System).unwrap();
        }
        let err = limiter.check(ToolClass::System).unwrap_err();
        assert_eq!(err.kind(), "rate_limited");

        // Other classes are unaffected
        limiter.check(ToolClass::Read).unwrap();
    }

    #[test]
    fn test_retry_after_is_positive() {
        let limiter = RateLimiter::new(false);
        for _ in 0..ToolClass::Context.limit_per_minute() {
            limiter.check(ToolClass::Context).unwrap();
        }
        match limiter.check(ToolClass::Context) {
            Err(Error::RateLimited {
                retry_after_secs, ..
            }) => assert!(retry_after_secs >= 1),
            other => {
                assert!(other.is_err(), "expected RateLimited, got {other:?}");
            },
        }
    }

    #[test]
    fn test_disabled_limiter_passes_everything() {
        let limiter = RateLimiter::new(true);
        for _ in 0..10_000 {
            limiter.check(ToolClass::System).unwrap();
        }
    }

    #[test]
    fn test_reset_restores_budget() {
        let limiter = RateLimiter::new(false);
        for _ in 0..ToolClass::System.limit_per_minute() {
            limiter.check(ToolClass::System).unwrap();
        }
        assert!(limiter.check(ToolClass::System).is_err());
        limiter.reset();
        limiter.check(ToolClass::System).unwrap();
    }
}
