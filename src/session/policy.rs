//! Time-based staleness policy.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::ShouldRefreshFn;
use crate::clock::{Clock, SystemClock};

/// Proactive refresh window (5 minutes / 300 seconds).
pub const DEFAULT_REFRESH_WINDOW_SECS: i64 = 300;

/// Refresh a session once its remaining lifetime drops below a window.
#[derive(Clone)]
pub struct RefreshPolicy {
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl RefreshPolicy {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { window, clock }
    }

    /// Policy with the given window, reading the wall clock.
    pub fn with_window(window: Duration) -> Self {
        Self::new(window, Arc::new(SystemClock))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// True when less than `window` remains before `expires_at`.
    #[must_use]
    pub fn should_refresh(&self, expires_at: DateTime<Utc>) -> bool {
        expires_at - self.clock.now() < self.window
    }

    /// Lifetime left before `expires_at`, clamped at zero.
    pub fn remaining(&self, expires_at: DateTime<Utc>) -> Duration {
        let remaining = expires_at - self.clock.now();
        if remaining > Duration::zero() {
            remaining
        } else {
            Duration::zero()
        }
    }

    /// Turn the policy into the manager's refresh predicate.
    pub fn into_predicate<S, F>(self, expires_at: F) -> ShouldRefreshFn<S>
    where
        F: Fn(&S) -> DateTime<Utc> + Send + Sync + 'static,
    {
        Arc::new(move |session: &S| self.should_refresh(expires_at(session)))
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::with_window(Duration::seconds(DEFAULT_REFRESH_WINDOW_SECS))
    }
}

impl std::fmt::Debug for RefreshPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshPolicy")
            .field("window_secs", &self.window.num_seconds())
            .finish()
    }
}
