//! Stop-the-world capability.
//!
//! While a [`SuspendGuard`] is alive no other thread runs managed code, so
//! session state and the installed-stub set change atomically from the point
//! of view of executing code.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use minitrace_config::log_trace_debug;

/// Host capability that pauses every other mutator thread
pub trait Quiesce: Send + Sync {
    /// Block until all other threads are at a safe point and keep them there
    /// until the returned guard is dropped.
    fn suspend_all(&self, cause: &'static str) -> SuspendGuard<'_>;
}

/// Scoped stop-the-world window; threads resume on drop
#[must_use = "threads resume as soon as the guard is dropped"]
pub struct SuspendGuard<'a> {
    cause: &'static str,
    resume: Option<Box<dyn FnOnce() + 'a>>,
}

impl<'a> SuspendGuard<'a> {
    pub fn new(cause: &'static str, resume: impl FnOnce() + 'a) -> Self {
        Self {
            cause,
            resume: Some(Box::new(resume)),
        }
    }

    /// Guard with nothing to release, for hosts that run a single mutator
    pub fn noop(cause: &'static str) -> Self {
        Self {
            cause,
            resume: None,
        }
    }

    pub fn cause(&self) -> &'static str {
        self.cause
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        if let Some(resume) = self.resume.take() {
            resume();
        }
    }
}

impl std::fmt::Debug for SuspendGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspendGuard")
            .field("cause", &self.cause)
            .finish()
    }
}

/// Stop-the-world built on a readers-writer barrier.
///
/// Mutator threads hold [`BarrierQuiescer::enter_managed`] while running
/// managed code and release it at safe points. `suspend_all` takes the write
/// side, so it waits for every running mutator to reach a safe point and keeps
/// new ones out. The caller of `suspend_all` must not hold a managed guard.
#[derive(Debug, Default)]
pub struct BarrierQuiescer {
    barrier: RwLock<()>,
    suspensions: AtomicU64,
}

impl BarrierQuiescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the calling thread as running managed code
    pub fn enter_managed(&self) -> RwLockReadGuard<'_, ()> {
        self.barrier.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of completed or ongoing suspensions
    pub fn suspensions(&self) -> u64 {
        self.suspensions.load(Ordering::Relaxed)
    }
}

impl Quiesce for BarrierQuiescer {
    fn suspend_all(&self, cause: &'static str) -> SuspendGuard<'_> {
        let exclusive = self.barrier.write().unwrap_or_else(PoisonError::into_inner);
        let n = self.suspensions.fetch_add(1, Ordering::Relaxed) + 1;
        log_trace_debug!("Suspended all threads", cause = cause, suspension = n);
        SuspendGuard::new(cause, move || {
            drop(exclusive);
            log_trace_debug!("Resumed all threads", cause = cause);
        })
    }
}
