//! Re-entrant locks for formatoption updates.
//!
//! Every formatoption slot owns one [`ReentrantLock`]. The resolver
//! acquires the locks of the selected slots for the span of an update
//! cycle and releases each one as its slot finishes; the sharing
//! protocol re-acquires a slot's lock while delegating, which is why the
//! lock must be re-entrant. Releases are tolerant: releasing a lock the
//! current thread does not hold is a no-op, so the cycle's final
//! release-all sweep cannot fail halfway.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    count: usize,
}

#[derive(Debug, Default)]
struct LockInner {
    state: Mutex<LockState>,
    available: Condvar,
}

/// A re-entrant lock with explicit acquire/release, clonable so a slot
/// and an in-flight cycle can both hold a reference.
#[derive(Debug, Clone, Default)]
pub struct ReentrantLock {
    inner: Arc<LockInner>,
}

impl ReentrantLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is held by the current thread. Re-entrant:
    /// a thread that already owns the lock only increments the count.
    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut state = self.inner.state.lock().expect("lock state poisoned");
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.count = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    state.count += 1;
                    return;
                }
                Some(_) => {
                    state = self
                        .inner
                        .available
                        .wait(state)
                        .expect("lock state poisoned");
                }
            }
        }
    }

    /// Release one acquisition by the current thread. Releasing a lock
    /// the current thread does not hold is a no-op.
    pub fn release(&self) {
        let me = thread::current().id();
        let mut state = self.inner.state.lock().expect("lock state poisoned");
        if state.owner != Some(me) {
            return;
        }
        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
            self.inner.available.notify_one();
        }
    }

    /// True if the current thread owns the lock.
    pub fn held_by_current(&self) -> bool {
        let state = self.inner.state.lock().expect("lock state poisoned");
        state.owner == Some(thread::current().id())
    }

    /// Release every acquisition held by the current thread.
    pub fn release_all(&self) {
        let me = thread::current().id();
        let mut state = self.inner.state.lock().expect("lock state poisoned");
        if state.owner == Some(me) {
            state.count = 0;
            state.owner = None;
            self.inner.available.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_reentrant_acquire() {
        let lock = ReentrantLock::new();
        lock.acquire();
        lock.acquire();
        assert!(lock.held_by_current());
        lock.release();
        assert!(lock.held_by_current());
        lock.release();
        assert!(!lock.held_by_current());
    }

    #[test]
    fn test_foreign_release_is_noop() {
        let lock = ReentrantLock::new();
        lock.release();
        assert!(!lock.held_by_current());
    }

    #[test]
    fn test_blocks_other_thread() {
        let lock = ReentrantLock::new();
        let counter = Arc::new(AtomicUsize::new(0));
        lock.acquire();
        let handle = {
            let lock = lock.clone();
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                lock.acquire();
                counter.fetch_add(1, Ordering::SeqCst);
                lock.release();
            })
        };
        // the spawned thread must wait for us
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        lock.release();
        handle.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_all_clears_nesting() {
        let lock = ReentrantLock::new();
        lock.acquire();
        lock.acquire();
        lock.release_all();
        assert!(!lock.held_by_current());
    }
}
