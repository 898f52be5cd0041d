//! A 16-bit atomic reader-writer lock with randomized exponential backoff.
//!
//! The bit layout mirrors the original single-process lock this engine is
//! modeled on: a single `u16` word where the low 15 bits count concurrent
//! readers and the top bit marks an active writer. Both acquire paths spin
//! with randomized exponential backoff between `MIN_BACKOFF_DELAY` and
//! `MAX_BACKOFF_DELAY` CPU-pause units, bounded by `MAX_ATTEMPTS` retries.

use rand::Rng;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use crate::error::GraphError;

pub const LOCK_READER_MASK: u16 = 0x7fff;
pub const WRITER_LOCK_BIT: u16 = 15;
pub const WRITE_LOCK: u16 = 1 << WRITER_LOCK_BIT;
pub const READER_INCR: u16 = 1;

pub const MIN_BACKOFF_DELAY: u64 = 100; // nanoseconds-equivalent pause units
pub const MAX_BACKOFF_DELAY: u64 = 50_000;
pub const MAX_ATTEMPTS: u32 = 10;

/// A process-global (or per-store, here: per-`GraphStore`) reader-writer lock.
#[derive(Debug)]
pub struct RwLock {
    word: AtomicU16,
    max_attempts: u32,
}

fn backoff(attempt: u32) {
    let max = (MIN_BACKOFF_DELAY << attempt.min(20)).min(MAX_BACKOFF_DELAY);
    let delay = rand::thread_rng().gen_range(MIN_BACKOFF_DELAY..=max.max(MIN_BACKOFF_DELAY));
    // One unit is one spin_loop pause; for delays beyond a few thousand units
    // fall back to a short sleep so contention doesn't pin a CPU.
    if delay < 2_000 {
        for _ in 0..delay {
            std::hint::spin_loop();
        }
    } else {
        std::thread::sleep(Duration::from_nanos(delay));
    }
}

impl RwLock {
    pub fn new() -> Self {
        Self::with_max_attempts(MAX_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        RwLock { word: AtomicU16::new(0), max_attempts }
    }

    pub fn reader_count(&self) -> u16 {
        self.word.load(Ordering::Acquire) & LOCK_READER_MASK
    }

    pub fn is_write_locked(&self) -> bool {
        self.word.load(Ordering::Acquire) & WRITE_LOCK != 0
    }

    /// Acquire a read lock. Fails with `LockSaturated` if all 15 reader bits
    /// are already in use, or `LockTimeout` after `max_attempts` retries
    /// against an active writer.
    pub fn read_lock(&self) -> Result<(), GraphError> {
        for attempt in 0..self.max_attempts {
            let cur = self.word.load(Ordering::Acquire);
            if cur & WRITE_LOCK != 0 {
                backoff(attempt);
                continue;
            }
            if cur & LOCK_READER_MASK == LOCK_READER_MASK {
                return Err(GraphError::LockSaturated);
            }
            if self
                .word
                .compare_exchange_weak(cur, cur + READER_INCR, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
            backoff(attempt);
        }
        Err(GraphError::LockTimeout(self.max_attempts))
    }

    pub fn read_unlock(&self) {
        self.word.fetch_sub(READER_INCR, Ordering::AcqRel);
    }

    /// Acquire the write lock from scratch (no readers of our own held).
    pub fn write_lock(&self) -> Result<(), GraphError> {
        for attempt in 0..self.max_attempts {
            let cur = self.word.load(Ordering::Acquire);
            if cur == 0
                && self
                    .word
                    .compare_exchange_weak(0, WRITE_LOCK, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                return Ok(());
            }
            backoff(attempt);
        }
        Err(GraphError::LockTimeout(self.max_attempts))
    }

    /// Upgrade a read lock (already held by the caller) to a write lock.
    /// Succeeds only once every *other* reader has drained; our own read bit
    /// is released atomically as part of the same compare-exchange.
    pub fn upgrade_write_lock(&self) -> Result<(), GraphError> {
        for attempt in 0..self.max_attempts {
            let cur = self.word.load(Ordering::Acquire);
            if cur & LOCK_READER_MASK == READER_INCR && cur & WRITE_LOCK == 0 {
                if self
                    .word
                    .compare_exchange_weak(cur, WRITE_LOCK, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(());
                }
            }
            backoff(attempt);
        }
        Err(GraphError::LockTimeout(self.max_attempts))
    }

    pub fn write_unlock(&self) {
        self.word.fetch_and(!WRITE_LOCK, Ordering::AcqRel);
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn multiple_readers_can_coexist() {
        let lock = RwLock::new();
        lock.read_lock().unwrap();
        lock.read_lock().unwrap();
        assert_eq!(lock.reader_count(), 2);
        lock.read_unlock();
        lock.read_unlock();
        assert_eq!(lock.reader_count(), 0);
    }

    #[test]
    fn writer_excludes_readers() {
        let lock = RwLock::new();
        lock.write_lock().unwrap();
        assert!(lock.is_write_locked());
        let small = RwLock::with_max_attempts(2);
        small.write_lock().unwrap();
        assert!(small.read_lock().is_err());
        lock.write_unlock();
    }

    #[test]
    fn upgrade_succeeds_when_sole_reader() {
        let lock = RwLock::new();
        lock.read_lock().unwrap();
        lock.upgrade_write_lock().unwrap();
        assert!(lock.is_write_locked());
        lock.write_unlock();
    }

    #[test]
    fn upgrade_fails_with_other_readers_present() {
        let lock = Arc::new(RwLock::with_max_attempts(2));
        lock.read_lock().unwrap();
        lock.read_lock().unwrap();
        assert!(lock.upgrade_write_lock().is_err());
    }

    #[test]
    fn liveness_under_bounded_contention() {
        let lock = Arc::new(RwLock::with_max_attempts(MAX_ATTEMPTS));
        lock.write_lock().unwrap();
        let result = lock.write_lock();
        assert!(result.is_err());
        match result {
            Err(GraphError::LockTimeout(n)) => assert_eq!(n, MAX_ATTEMPTS),
            _ => panic!("expected LockTimeout"),
        }
    }
}
