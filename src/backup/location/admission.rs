//! Reader/writer admission control for a single location.
//!
//! A location may serve several readers or several writers at a time, but
//! never both at once. Waiters park on a condition variable and re-check
//! every second even without a wake-up, so a missed notification only
//! costs latency. Admission among waiters is not FIFO.

use crate::backup::config::MaxThreads;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;

const RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Counters {
    readers: usize,
    writers: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Reader,
    Writer,
}

#[derive(Debug)]
pub struct AdmissionLock {
    limits: MaxThreads,
    counters: Mutex<Counters>,
    released: Condvar,
}

impl AdmissionLock {
    pub fn new(limits: MaxThreads) -> Self {
        Self {
            limits,
            counters: Mutex::new(Counters::default()),
            released: Condvar::new(),
        }
    }

    pub fn limits(&self) -> MaxThreads {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current `(readers, writers)`.
    pub fn counts(&self) -> (usize, usize) {
        let counters = self.lock();
        (counters.readers, counters.writers)
    }

    fn admissible(&self, counters: &Counters, role: Role) -> bool {
        match role {
            Role::Reader => counters.writers == 0 && counters.readers < self.limits.read(),
            Role::Writer => counters.readers == 0 && counters.writers < self.limits.write(),
        }
    }

    /// Blocks until `role` is admitted, then returns a guard that gives the
    /// slot back when dropped.
    pub fn acquire(&self, role: Role) -> AdmissionGuard<'_> {
        let mut counters = self.lock();
        while !self.admissible(&counters, role) {
            trace!("Waiting for {role:?} admission, current state {counters:?}");
            counters = match self.released.wait_timeout(counters, RETRY_INTERVAL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        match role {
            Role::Reader => counters.readers += 1,
            Role::Writer => counters.writers += 1,
        }
        AdmissionGuard { lock: self, role }
    }

    /// Gives back one `role` slot. Releasing with no holder is a no-op.
    pub fn release(&self, role: Role) {
        let mut counters = self.lock();
        let counter = match role {
            Role::Reader => &mut counters.readers,
            Role::Writer => &mut counters.writers,
        };
        *counter = counter.saturating_sub(1);
        drop(counters);
        self.released.notify_all();
    }
}

#[must_use = "the admission is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct AdmissionGuard<'a> {
    lock: &'a AdmissionLock,
    role: Role,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.role);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn limits(read: usize, write: usize) -> MaxThreads {
        MaxThreads::builder().read(read).write(write).build()
    }

    #[test]
    fn test_readers_share_up_to_limit() {
        let lock = AdmissionLock::new(limits(2, 1));
        let a = lock.acquire(Role::Reader);
        let b = lock.acquire(Role::Reader);
        assert_eq!(lock.counts(), (2, 0));
        drop(a);
        assert_eq!(lock.counts(), (1, 0));
        drop(b);
        assert_eq!(lock.counts(), (0, 0));
    }

    #[test]
    fn test_release_never_goes_negative() {
        let lock = AdmissionLock::new(limits(1, 1));
        lock.release(Role::Writer);
        lock.release(Role::Reader);
        assert_eq!(lock.counts(), (0, 0));
    }

    #[test]
    fn test_writer_waits_for_reader() {
        let lock = Arc::new(AdmissionLock::new(limits(1, 1)));
        let reader = lock.acquire(Role::Reader);
        let admitted = Arc::new(AtomicBool::new(false));

        let handle = {
            let lock = lock.clone();
            let admitted = admitted.clone();
            std::thread::spawn(move || {
                let _writer = lock.acquire(Role::Writer);
                admitted.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(100));
        assert!(!admitted.load(Ordering::SeqCst));
        let start = Instant::now();
        drop(reader);
        handle.join().unwrap();
        assert!(admitted.load(Ordering::SeqCst));
        // Woken by the release, not by the retry timeout.
        assert!(start.elapsed() < RETRY_INTERVAL);
        assert_eq!(lock.counts(), (0, 0));
    }

    #[test]
    fn test_contention_keeps_invariants() {
        let lock = Arc::new(AdmissionLock::new(limits(3, 2)));
        let violations = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for i in 0..12 {
                let lock = lock.clone();
                let violations = violations.clone();
                scope.spawn(move || {
                    let role = if i % 3 == 0 { Role::Writer } else { Role::Reader };
                    for _ in 0..5 {
                        let _guard = lock.acquire(role);
                        let (readers, writers) = lock.counts();
                        if (readers > 0 && writers > 0) || readers > 3 || writers > 2 {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        std::thread::sleep(Duration::from_millis(2));
                    }
                });
            }
        });

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(lock.counts(), (0, 0));
    }
}
