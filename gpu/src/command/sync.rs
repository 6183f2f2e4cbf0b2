//! CPU-side completion signalling.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot completion signal shared between a command buffer and the
/// queue worker that executes it.
///
/// Waiting blocks on a condition variable; signalling wakes every waiter.
#[derive(Debug, Default)]
pub(crate) struct Fence {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl Fence {
    pub(crate) fn new_unsignaled() -> Self {
        Self::default()
    }

    /// Block until signaled. Returns immediately if already signaled.
    pub(crate) fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.condvar.wait(&mut signaled);
        }
    }

    /// Block until signaled or `timeout` elapses.
    ///
    /// Returns `true` if the fence was signaled.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self
                .condvar
                .wait_until(&mut signaled, deadline)
                .timed_out()
            {
                return *signaled;
            }
        }
        true
    }

    pub(crate) fn signal(&self) {
        *self.signaled.lock() = true;
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_fence_starts_unsignaled() {
        let fence = Fence::new_unsignaled();
        assert!(!fence.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn test_fence_signal_and_wait() {
        let fence = Arc::new(Fence::new_unsignaled());

        // Signal from another thread
        let signaller = Arc::clone(&fence);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            signaller.signal();
        });

        fence.wait();
        handle.join().unwrap();

        // Waiting again returns immediately
        fence.wait();
        assert!(fence.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn test_fence_wait_timeout() {
        let fence = Fence::new_unsignaled();

        // Nothing signals it
        assert!(!fence.wait_timeout(Duration::from_millis(10)));

        fence.signal();
        assert!(fence.wait_timeout(Duration::from_millis(10)));
    }
}
