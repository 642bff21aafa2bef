//! Fair multi-reader/single-writer lock guarding one open database
//!
//! Built from four counting semaphores. `r_sem` is the admission gate for readers: the first
//! waiting writer takes it, so readers arriving after the writer queue behind it instead of
//! starving it. `w_sem` excludes the reader group from the writer; `rc_sem` and `wc_sem` guard
//! the two counters. Guards release on drop, including during unwinding.

use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counting semaphore.
#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {

    pub fn new(count: usize) -> Self {
        return Self { count: Mutex::new(count), cond: Condvar::new() };
    }

    pub fn acquire(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }

    pub fn release(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cond.notify_one();
    }
}

#[derive(Debug)]
struct LockState {
    r_sem: Semaphore,
    w_sem: Semaphore,
    rc_sem: Semaphore,
    wc_sem: Semaphore,
    // updated only while rc_sem / wc_sem is held
    readers: AtomicUsize,
    writers: AtomicUsize,
}

impl LockState {

    fn new() -> Self {
        return Self {
            r_sem: Semaphore::new(1),
            w_sem: Semaphore::new(1),
            rc_sem: Semaphore::new(1),
            wc_sem: Semaphore::new(1),
            readers: AtomicUsize::new(0),
            writers: AtomicUsize::new(0),
        };
    }

    fn read_lock(&self) {
        self.r_sem.acquire();
        self.rc_sem.acquire();
        if self.readers.fetch_add(1, Ordering::Relaxed) == 0 {
            self.w_sem.acquire();
        }
        self.rc_sem.release();
        self.r_sem.release();
    }

    fn read_unlock(&self) {
        self.rc_sem.acquire();
        if self.readers.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.w_sem.release();
        }
        self.rc_sem.release();
    }

    fn write_lock(&self) {
        self.wc_sem.acquire();
        if self.writers.fetch_add(1, Ordering::Relaxed) == 0 {
            self.r_sem.acquire();
        }
        self.wc_sem.release();
        self.w_sem.acquire();
    }

    fn write_unlock(&self) {
        self.w_sem.release();
        self.wc_sem.acquire();
        if self.writers.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.r_sem.release();
        }
        self.wc_sem.release();
    }

    fn readers(&self) -> usize {
        self.rc_sem.acquire();
        let readers = self.readers.load(Ordering::Relaxed);
        self.rc_sem.release();
        return readers;
    }

    fn writers(&self) -> usize {
        self.wc_sem.acquire();
        let writers = self.writers.load(Ordering::Relaxed);
        self.wc_sem.release();
        return writers;
    }
}

pub struct FairRwLock<T> {
    state: LockState,
    data: UnsafeCell<T>,
}

// `data` is only reachable through guards that follow the reader/writer protocol.
unsafe impl<T: Send> Send for FairRwLock<T> {}
unsafe impl<T: Send + Sync> Sync for FairRwLock<T> {}

impl<T> FairRwLock<T> {

    pub fn new(data: T) -> Self {
        return Self { state: LockState::new(), data: UnsafeCell::new(data) };
    }

    pub fn read(&self) -> ReadGuard<'_, T> {
        self.state.read_lock();
        return ReadGuard { lock: self };
    }

    pub fn write(&self) -> WriteGuard<'_, T> {
        self.state.write_lock();
        return WriteGuard { lock: self };
    }

    /// Number of readers currently holding the lock.
    pub fn readers(&self) -> usize {
        return self.state.readers();
    }

    /// Number of writers that hold or are waiting for the lock.
    pub fn writers(&self) -> usize {
        return self.state.writers();
    }

    pub fn into_inner(self) -> T {
        return self.data.into_inner();
    }
}

pub struct ReadGuard<'a, T> {
    lock: &'a FairRwLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.read_unlock();
    }
}

pub struct WriteGuard<'a, T> {
    lock: &'a FairRwLock<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.write_unlock();
    }
}
