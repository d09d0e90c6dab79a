use crate::util;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

/// User mode SpinLock protecting a value of type `T`
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}

unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        SpinLock::new(T::default())
    }
}

impl<T> SpinLock<T> {
    pub const fn new(data: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Keep trying to lock until success, then return SpinLockGuard.
    pub fn lock(&self) -> SpinLockGuard<T> {
        while self.is_locked()
            || self
                .locked
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
        {
            util::pause();
        }
        SpinLockGuard::new(self)
    }

    /// Return true if locked.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Return the guard if lock successfully.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<T>> {
        if !self.is_locked()
            && self
                .locked
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        {
            Some(SpinLockGuard::new(self))
        } else {
            None
        }
    }

    /// Unlock if is locked, else panic.
    #[inline]
    fn unlock(&self) {
        assert!(self
            .locked
            .compare_exchange(true, false, Ordering::Release, Ordering::Relaxed)
            .is_ok());
    }
}

/// Guard of SpinLock, unlock it when dropped.
pub struct SpinLockGuard<'a, T> {
    spin_lock: &'a SpinLock<T>,
}

impl<'a, T> SpinLockGuard<'a, T> {
    fn new(spin_lock: &'a SpinLock<T>) -> Self {
        SpinLockGuard { spin_lock }
    }
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.spin_lock.data.get() }
    }
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.spin_lock.data.get() }
    }
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.spin_lock.unlock();
    }
}

#[cfg(test)]
mod test {
    use super::SpinLock;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_base() {
        let lock = SpinLock::new(0);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(lock.is_locked());
            assert!(lock.try_lock().is_none());
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.try_lock().unwrap(), 1);
    }

    #[test]
    fn test_multi_threads() {
        let lock = Arc::new(SpinLock::new(Vec::new()));
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for j in 0..1000 {
                        lock.lock().push(i * 1000 + j);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let mut v = lock.lock().clone();
        v.sort();
        assert_eq!(v, (0..8000).collect::<Vec<_>>());
    }
}
