//! Mutex + condition variable pair used as the engine's single
//! synchronization point.

use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Guard returned by [`WaitLock::lock()`]. Dropping it unlocks.
pub(crate) type WaitGuard<'a, T> = MutexGuard<'a, T>;

/// A mutex-protected value paired with one condition variable.
///
/// All waits go through the same condvar, so a single
/// [`broadcast()`](Self::broadcast) reaches the worker blocked on an empty
/// queue as well as any thread blocked in `stop()`.
pub(crate) struct WaitLock<T> {
    mutex: Mutex<T>,
    cond: Condvar,
}

impl<T> WaitLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            mutex: Mutex::new(value),
            cond: Condvar::new(),
        }
    }

    pub fn lock(&self) -> WaitGuard<'_, T> {
        self.mutex.lock()
    }

    pub fn try_lock(&self) -> Option<WaitGuard<'_, T>> {
        self.mutex.try_lock()
    }

    /// Releases the lock, blocks until woken or `timeout` elapses, then
    /// re-acquires the lock. `None` waits indefinitely.
    ///
    /// Returns `true` if the wait timed out. Spurious wake-ups are possible;
    /// callers re-check their predicate in a loop.
    pub fn wait(&self, guard: &mut WaitGuard<'_, T>, timeout: Option<Duration>) -> bool {
        match timeout {
            None => {
                self.cond.wait(guard);
                false
            }
            Some(timeout) => self.cond.wait_for(guard, timeout).timed_out(),
        }
    }

    /// Runs `f` with the lock temporarily released.
    pub fn unlocked<F, R>(guard: &mut WaitGuard<'_, T>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        MutexGuard::unlocked(guard, f)
    }

    /// Wakes at most one waiter. The engine always has more than one
    /// potential waiter and uses [`broadcast()`](Self::broadcast).
    #[cfg(test)]
    pub fn signal(&self) {
        self.cond.notify_one();
    }

    /// Wakes every waiter.
    pub fn broadcast(&self) {
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_timed_wait_expires() {
        let lock = WaitLock::new(0u32);
        let mut guard = lock.lock();
        let start = Instant::now();
        assert!(lock.wait(&mut guard, Some(Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_broadcast_wakes_indefinite_waiter() {
        let lock = Arc::new(WaitLock::new(false));
        let waiter = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                let mut guard = lock.lock();
                while !*guard {
                    lock.wait(&mut guard, None);
                }
            })
        };

        std::thread::sleep(Duration::from_millis(10));
        *lock.lock() = true;
        lock.broadcast();
        waiter.join().unwrap();
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let lock = Arc::new(WaitLock::new(0u32));
        let waiter = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                let mut guard = lock.lock();
                while *guard == 0 {
                    lock.wait(&mut guard, Some(Duration::from_secs(5)));
                }
                *guard
            })
        };

        std::thread::sleep(Duration::from_millis(10));
        *lock.lock() = 7;
        lock.signal();
        assert_eq!(waiter.join().unwrap(), 7);
    }

    #[test]
    fn test_try_lock_contended() {
        let lock = WaitLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_unlocked_releases_lock() {
        let lock = WaitLock::new(1u32);
        let mut guard = lock.lock();
        let seen = WaitLock::unlocked(&mut guard, || lock.try_lock().map(|g| *g));
        assert_eq!(seen, Some(1));
        assert_eq!(*guard, 1);
    }
}
