//! Host lifecycle integration.
//!
//! The host application reports foreground/background transitions through
//! [`LifecycleHook`]. While backgrounded, a controller asks the host for
//! extra execution time through [`BackgroundExecution`] so a live socket is
//! not torn down mid-exchange; the request is released again on return to
//! the foreground or on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use horizon_core::prelude::*;

/// Foreground/background notifications the host delivers to a manager.
#[trait_variant::make(LifecycleHook: Send)]
pub trait LocalLifecycleHook {
    /// The host is about to be backgrounded.
    async fn on_enter_background(&self);

    /// The host is back in the foreground.
    async fn on_enter_foreground(&self);
}

/// Opaque handle for one granted background-execution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackgroundToken(pub u64);

/// Platform hook that extends process execution while backgrounded.
pub trait BackgroundExecution: Send + Sync {
    /// Request extra execution time for `label`.
    fn begin(&self, label: &str) -> BackgroundToken;

    /// Release a request obtained from [`begin`](Self::begin).
    fn end(&self, token: BackgroundToken);
}

/// Grants every request and does nothing else.
///
/// Used where the host has no background-time concept (servers, tests).
#[derive(Debug, Default)]
pub struct NoopBackgroundExecution {
    next: AtomicU64,
}

impl BackgroundExecution for NoopBackgroundExecution {
    fn begin(&self, label: &str) -> BackgroundToken {
        let token = BackgroundToken(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        trace!("Background execution granted for {} ({:?})", label, token);
        token
    }

    fn end(&self, token: BackgroundToken) {
        trace!("Background execution released ({:?})", token);
    }
}

/// Shared default hook.
pub fn noop_background() -> Arc<dyn BackgroundExecution> {
    Arc::new(NoopBackgroundExecution::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_tokens_are_distinct() {
        let hook = NoopBackgroundExecution::default();
        let a = hook.begin("chat");
        let b = hook.begin("tags");
        assert_ne!(a, b);
        hook.end(a);
        hook.end(b);
    }
}
