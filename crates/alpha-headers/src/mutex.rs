//! Two-tier priority mutual exclusion.
//!
//! Header organization takes the lock at [`Priority::High`] so it is never
//! starved behind heavier block processing that takes it at
//! [`Priority::Low`]. A high-priority request is granted ahead of every
//! low-priority request that is waiting when the lock is released.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Admission class of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Granted before any waiting low-priority request.
    High,
    /// Granted only when no high-priority request is waiting.
    Low,
}

/// A non-reentrant lock with two admission classes.
pub trait PriorityLock: Send + Sync {
    /// Blocks until the lock is held at `priority`.
    fn lock(&self, priority: Priority);

    /// Releases a lock taken at `priority`.
    fn unlock(&self, priority: Priority);
}

/// Holds a [`PriorityLock`] until dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct PriorityGuard<'a> {
    lock: &'a dyn PriorityLock,
    priority: Priority,
}

impl<'a> PriorityGuard<'a> {
    /// Blocks until `lock` is held at `priority`.
    pub fn acquire(lock: &'a dyn PriorityLock, priority: Priority) -> Self {
        lock.lock(priority);
        PriorityGuard { lock, priority }
    }

    /// Admission class the lock was taken at.
    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl Drop for PriorityGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock(self.priority);
    }
}

impl std::fmt::Debug for PriorityGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityGuard")
            .field("priority", &self.priority)
            .finish()
    }
}

#[derive(Debug, Default)]
struct State {
    locked: bool,
    high_waiting: usize,
    low_waiting: usize,
}

/// [`PriorityLock`] built on a mutex and a condition variable.
#[derive(Debug, Default)]
pub struct PrioritizedMutex {
    state: Mutex<State>,
    released: Condvar,
}

impl PrioritizedMutex {
    /// Creates an unlocked mutex.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests currently waiting at `priority`.
    pub fn waiting(&self, priority: Priority) -> usize {
        let state = self.state();
        match priority {
            Priority::High => state.high_waiting,
            Priority::Low => state.low_waiting,
        }
    }

    /// Returns true if the lock is held.
    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, state: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.released
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl PriorityLock for PrioritizedMutex {
    fn lock(&self, priority: Priority) {
        let mut state = self.state();
        match priority {
            Priority::High => {
                state.high_waiting = state.high_waiting.saturating_add(1);
                while state.locked {
                    state = self.wait(state);
                }
                state.high_waiting = state.high_waiting.saturating_sub(1);
            }
            Priority::Low => {
                state.low_waiting = state.low_waiting.saturating_add(1);
                while state.locked || state.high_waiting > 0 {
                    state = self.wait(state);
                }
                state.low_waiting = state.low_waiting.saturating_sub(1);
            }
        }
        state.locked = true;
    }

    fn unlock(&self, _priority: Priority) {
        self.state().locked = false;
        self.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        thread,
    };

    use super::*;

    fn wait_for(mutex: &PrioritizedMutex, priority: Priority, count: usize) {
        while mutex.waiting(priority) != count {
            thread::yield_now();
        }
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let mutex = PrioritizedMutex::new();
        {
            let guard = PriorityGuard::acquire(&mutex, Priority::High);
            assert_eq!(guard.priority(), Priority::High);
            assert!(mutex.is_locked());
        }
        assert!(!mutex.is_locked());

        let _guard = PriorityGuard::acquire(&mutex, Priority::Low);
        assert!(mutex.is_locked());
    }

    #[test]
    fn test_high_priority_is_granted_before_waiting_low() {
        let mutex = PrioritizedMutex::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        thread::scope(|scope| {
            let holder = PriorityGuard::acquire(&mutex, Priority::Low);

            let low_order = Arc::clone(&order);
            let mutex_ref = &mutex;
            scope.spawn(move || {
                let _guard = PriorityGuard::acquire(mutex_ref, Priority::Low);
                low_order.lock().unwrap().push(Priority::Low);
            });
            wait_for(&mutex, Priority::Low, 1);

            let high_order = Arc::clone(&order);
            scope.spawn(move || {
                let _guard = PriorityGuard::acquire(mutex_ref, Priority::High);
                high_order.lock().unwrap().push(Priority::High);
            });
            wait_for(&mutex, Priority::High, 1);

            drop(holder);
        });

        assert_eq!(*order.lock().unwrap(), vec![Priority::High, Priority::Low]);
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_exclusive_across_threads() {
        let mutex = PrioritizedMutex::new();
        let counter = Mutex::new(0u32);

        thread::scope(|scope| {
            for index in 0..8 {
                let priority = if index % 2 == 0 { Priority::High } else { Priority::Low };
                let (mutex, counter) = (&mutex, &counter);
                scope.spawn(move || {
                    for _ in 0..100 {
                        let _guard = PriorityGuard::acquire(mutex, priority);
                        let mut value = counter.lock().unwrap();
                        *value += 1;
                    }
                });
            }
        });

        assert_eq!(*counter.lock().unwrap(), 800);
    }
}
