//! Append-only table of per-thread slots indexed by dense thread id.
//!
//! Slots live in fixed-size segments chained by an atomic pointer. A missing segment is
//! appended with one CAS the first time an id beyond the current end is looked up, so
//! the table never caps the number of threads and a slot never moves once created.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

cfg_if! {
    if #[cfg(feature = "thread_segment_4096")] {
        pub const THREAD_SEGMENT_SIZE: usize = 4096;
    } else if #[cfg(feature = "thread_segment_256")] {
        pub const THREAD_SEGMENT_SIZE: usize = 256;
    } else {
        /// Number of slots allocated at once
        pub const THREAD_SEGMENT_SIZE: usize = 16;
    }
}

struct Segment<T> {
    slots: Box<[T]>,
    next: AtomicPtr<Segment<T>>,
}

impl<T: Default> Segment<T> {
    fn new_boxed() -> Box<Self> {
        Box::new(Segment {
            slots: (0..THREAD_SEGMENT_SIZE).map(|_| T::default()).collect(),
            next: AtomicPtr::new(ptr::null_mut()),
        })
    }
}

pub struct ThreadTable<T> {
    head: Box<Segment<T>>,
}

unsafe impl<T: Send + Sync> Send for ThreadTable<T> {}

unsafe impl<T: Send + Sync> Sync for ThreadTable<T> {}

impl<T: Default> Default for ThreadTable<T> {
    fn default() -> Self {
        ThreadTable::new()
    }
}

impl<T: Default> ThreadTable<T> {
    pub fn new() -> Self {
        ThreadTable {
            head: Segment::new_boxed(),
        }
    }

    /// Slot of thread `tid`, appending segments up to it when needed.
    pub fn get(&self, tid: u32) -> &T {
        let mut segment: &Segment<T> = &self.head;
        let mut idx = tid as usize;
        while idx >= THREAD_SEGMENT_SIZE {
            idx -= THREAD_SEGMENT_SIZE;
            let mut next = segment.next.load(Ordering::Acquire);
            if next.is_null() {
                let fresh = Box::into_raw(Segment::new_boxed());
                match segment.next.compare_exchange(
                    ptr::null_mut(),
                    fresh,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        debug!("append thread segment, first tid={}", tid as usize - idx);
                        next = fresh;
                    }
                    Err(curr) => {
                        drop(unsafe { Box::from_raw(fresh) });
                        next = curr;
                    }
                }
            }
            segment = unsafe { &*next };
        }
        &segment.slots[idx]
    }
}

impl<T> ThreadTable<T> {
    /// Number of segments appended so far.
    pub fn segment_count(&self) -> usize {
        let mut count = 1;
        let mut iter = self.head.next.load(Ordering::Acquire);
        while !iter.is_null() {
            count += 1;
            iter = unsafe { (*iter).next.load(Ordering::Acquire) };
        }
        count
    }
}

impl<T> Drop for ThreadTable<T> {
    fn drop(&mut self) {
        let mut iter = *self.head.next.get_mut();
        while !iter.is_null() {
            let mut segment = unsafe { Box::from_raw(iter) };
            iter = *segment.next.get_mut();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    static DROPPED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Counted;

    impl Drop for Counted {
        fn drop(&mut self) {
            DROPPED.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_grow() {
        let table = ThreadTable::<AtomicUsize>::new();
        assert_eq!(table.segment_count(), 1);
        table.get(3).store(3, Ordering::Relaxed);
        let far = (3 * THREAD_SEGMENT_SIZE + 5) as u32;
        table.get(far).store(7, Ordering::Relaxed);
        assert_eq!(table.segment_count(), 4);
        assert_eq!(table.get(3).load(Ordering::Relaxed), 3);
        assert_eq!(table.get(far).load(Ordering::Relaxed), 7);
        assert_eq!(table.get(far - 1).load(Ordering::Relaxed), 0);
        assert!(ptr::eq(table.get(far), table.get(far)));
    }

    #[test]
    fn test_concurrent_append() {
        let table = Arc::new(ThreadTable::<AtomicUsize>::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let table = table.clone();
                thread::spawn(move || {
                    for i in 0..4 * THREAD_SEGMENT_SIZE as u32 {
                        table.get(i).fetch_add(1, Ordering::Relaxed);
                    }
                    t
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(table.segment_count(), 4);
        for i in 0..4 * THREAD_SEGMENT_SIZE as u32 {
            assert_eq!(table.get(i).load(Ordering::Relaxed), 8);
        }
    }

    #[test]
    fn test_drop_slots() {
        let table = ThreadTable::<Counted>::new();
        let _ = table.get(2 * THREAD_SEGMENT_SIZE as u32);
        assert_eq!(table.segment_count(), 3);
        drop(table);
        assert_eq!(DROPPED.load(Ordering::SeqCst), 3 * THREAD_SEGMENT_SIZE);
    }
}
