//! CPU-visible completion token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Signaled once the GPU work it stands for has completed.
///
/// Cloning yields another handle to the same fence, so the backend can keep
/// one to signal from its completion callback while the frame ring keeps
/// another to wait on.
#[derive(Clone, Debug, Default)]
pub struct Fence {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Fence {
    /// Creates an unsignaled fence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fence that is already signaled.
    #[must_use]
    pub fn signaled() -> Self {
        let fence = Self::new();
        fence.signal();
        fence
    }

    /// Marks the work as complete and wakes every waiter.
    pub fn signal(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    /// Returns whether the fence has been signaled.
    #[inline]
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Blocks until the fence is signaled or `timeout` elapses.
    ///
    /// Returns `true` if the fence was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.inner;
        let mut signaled = lock.lock();
        while !*signaled {
            if cvar.wait_until(&mut signaled, deadline).timed_out() {
                return *signaled;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_new_fence_unsignaled() {
        let fence = Fence::new();
        assert!(!fence.is_signaled());
        assert!(!fence.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_clones_share_state() {
        let fence = Fence::new();
        let other = fence.clone();
        other.signal();
        assert!(fence.is_signaled());
        assert!(fence.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn test_signal_from_other_thread() {
        let fence = Fence::new();
        let remote = fence.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            remote.signal();
        });
        assert!(fence.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
