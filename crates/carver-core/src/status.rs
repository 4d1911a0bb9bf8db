//! Progress counters shared with out-of-band observers.
//!
//! The scan itself is single-threaded; a [`ScanStatus`] is the only state
//! another thread may look at while it runs. All counters are relaxed atomics
//! so readers see a recent, not necessarily consistent, snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Bytes in the file currently being scanned
    pub total: u64,
    /// Offset reached in the current file
    pub completed: u64,
    /// Files opened so far
    pub files: u64,
}

/// Scan progress shared through an `Arc`
#[derive(Debug, Default)]
pub struct ScanStatus {
    total: AtomicU64,
    completed: AtomicU64,
    files: AtomicU64,
}

impl ScanStatus {
    /// Creates zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that a new file of `total` bytes is being scanned
    pub fn begin_file(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the offset reached in the current file
    pub fn advance(&self, completed: u64) {
        self.completed.store(completed, Ordering::Relaxed);
    }

    /// Zeroes the per-file counters
    pub fn clear(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
    }

    /// Returns a copy of the counters
    pub fn snapshot(&self) -> Progress {
        Progress {
            total: self.total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters() {
        let status = ScanStatus::new();
        status.begin_file(1000);
        status.advance(250);

        assert_eq!(
            status.snapshot(),
            Progress {
                total: 1000,
                completed: 250,
                files: 1
            }
        );

        status.clear();
        assert_eq!(status.snapshot().total, 0);
        assert_eq!(status.snapshot().files, 1);
    }

    #[test]
    fn test_observed_from_another_thread() {
        let status = Arc::new(ScanStatus::new());
        status.begin_file(64);
        status.advance(32);

        let observer = Arc::clone(&status);
        let seen = thread::spawn(move || observer.snapshot()).join().unwrap();
        assert_eq!(seen.completed, 32);
    }
}
