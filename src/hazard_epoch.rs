//! Definition and implementations of of `HazardEpoch`
//!
use crate::error;
use crate::hazard_pointer::{ThreadStore, VersionHandle};
use crate::spin_lock::{SpinLock, SpinLockGuard};
use crate::thread_table::ThreadTable;
use crate::util;
use crate::util::WrappedAlign64Type;
use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicPtr, AtomicU64, Ordering};

pub use crate::hazard_pointer::{BaseHazardNode, HazardNodeT};

/// Default maximum of shared objects waiting to be reclaimed under one thread.
pub const DEFAULT_THREAD_WAITING_THRESHOLD: i64 = 64;
/// Default interval(microsecond) to update minimum version cache.
pub const DEFAULT_MIN_VERSION_CACHE_TIME_US: i64 = 200_000;

#[derive(Default)]
struct VersionTimestamp {
    curr_min_version: AtomicU64,
    curr_min_version_timestamp: AtomicI64,
}

/// `HazardEpoch` a practical implementation of `Hazard Pointers`, which use global incremental
/// version to identify shared object to be reclaimed. Because of [`False sharing`](https://en.wikipedia.org/wiki/False_sharing),
/// a part of the member variables, might be frequently modified by different threads, are aligned
/// to 64 bytes.
pub struct HazardEpoch {
    thread_waiting_threshold: i64,
    min_version_cache_time_us: i64,
    version: WrappedAlign64Type<AtomicU64>,
    thread_lock: WrappedAlign64Type<SpinLock<()>>,
    exiting_lock: WrappedAlign64Type<SpinLock<()>>,
    threads: ThreadTable<ThreadStore>,
    thread_list: AtomicPtr<ThreadStore>,
    thread_count: AtomicI64,
    hazard_waiting_count: WrappedAlign64Type<AtomicI64>,
    curr_min_version_info: WrappedAlign64Type<VersionTimestamp>,
}

impl Default for HazardEpoch {
    fn default() -> Self {
        HazardEpoch::new(
            DEFAULT_THREAD_WAITING_THRESHOLD,
            DEFAULT_MIN_VERSION_CACHE_TIME_US,
        )
    }
}

impl HazardEpoch {
    #[inline]
    fn curr_min_version(&self) -> u64 {
        self.curr_min_version_info
            .curr_min_version
            .load(Ordering::SeqCst)
    }

    #[inline]
    fn set_curr_min_version(&self, curr_min_version: u64) {
        self.curr_min_version_info
            .curr_min_version
            .store(curr_min_version, Ordering::SeqCst);
    }

    #[inline]
    fn curr_min_version_timestamp(&self) -> i64 {
        self.curr_min_version_info
            .curr_min_version_timestamp
            .load(Ordering::SeqCst)
    }

    #[inline]
    fn set_curr_min_version_timestamp(&self, curr_min_version_timestamp: i64) {
        self.curr_min_version_info
            .curr_min_version_timestamp
            .store(curr_min_version_timestamp, Ordering::SeqCst);
    }

    /// `thread_waiting_threshold` means the maximum of the number of shared objects to be
    /// reclaimed under one thread. `min_version_cache_time_us` means the time
    /// interval(microsecond) to update minimum version cache.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_elimination::hazard_epoch::HazardEpoch;
    ///
    /// let h = HazardEpoch::new(64, 200000);
    /// assert_eq!(h.atomic_load_hazard_waiting_count(), 0);
    /// ```
    ///
    pub fn new(thread_waiting_threshold: i64, min_version_cache_time_us: i64) -> HazardEpoch {
        debug!(
            "new hazard epoch, thread_waiting_threshold={}, min_version_cache_time_us={}",
            thread_waiting_threshold, min_version_cache_time_us
        );
        HazardEpoch {
            thread_waiting_threshold,
            min_version_cache_time_us,
            version: WrappedAlign64Type(AtomicU64::new(0)),
            thread_lock: Default::default(),
            exiting_lock: Default::default(),
            threads: ThreadTable::new(),
            thread_list: AtomicPtr::new(ptr::null_mut()),
            thread_count: AtomicI64::new(0),
            hazard_waiting_count: Default::default(),
            curr_min_version_info: Default::default(),
        }
    }

    /// Reclaim all shared objects that no thread can observe any more.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_elimination::hazard_epoch::HazardEpoch;
    /// use rs_elimination::hazard_epoch::BaseHazardNode;
    ///
    /// let h = HazardEpoch::default();
    /// let node = Box::into_raw(Box::new(BaseHazardNode::default()));
    /// unsafe { h.add_node(node).unwrap(); }
    /// h.retire();
    /// assert_eq!(h.atomic_load_hazard_waiting_count(), 0);
    /// ```
    ///
    pub fn retire(&self) {
        let ts = self.get_thread_store();
        let min_version = self.get_min_version(true);
        let retire_count = ts.retire(min_version, ts);
        self.hazard_waiting_count
            .fetch_sub(retire_count, Ordering::SeqCst);

        let mut iter = self.atomic_load_thread_list();
        while !iter.is_null() {
            let other = unsafe { &*iter };
            if !ptr::eq(other, ts) {
                let retire_count = other.retire(min_version, ts);
                self.hazard_waiting_count
                    .fetch_sub(retire_count, Ordering::SeqCst);
            }
            iter = other.next();
        }
    }

    /// Hand a retired shared object over for reclamation. `node` can be any type as long as
    /// it implements Trait `HazardNodeT`.
    ///
    /// # Safety
    ///
    /// `node` must come from `Box::into_raw`, must already be unreachable for threads that
    /// acquire after this call, and must be added only once.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_elimination::hazard_epoch::HazardEpoch;
    /// use rs_elimination::hazard_epoch::{BaseHazardNode, HazardNodeT};
    /// use std::ptr;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    ///
    /// static DROPPED: AtomicUsize = AtomicUsize::new(0);
    ///
    /// struct Node {
    ///     base: BaseHazardNode,
    ///     v: i32,
    /// }
    ///
    /// impl Drop for Node {
    ///     fn drop(&mut self) {
    ///         DROPPED.fetch_add(10, Ordering::SeqCst);
    ///     }
    /// }
    ///
    /// impl HazardNodeT for Node {
    ///     unsafe fn base_hazard_node(this: *mut Self) -> *mut BaseHazardNode {
    ///         ptr::addr_of_mut!((*this).base)
    ///     }
    /// }
    ///
    /// let h = HazardEpoch::default();
    /// let node = Box::into_raw(Box::new(Node {
    ///     base: Default::default(),
    ///     v: 2333,
    /// }));
    /// unsafe { h.add_node(node).unwrap(); }
    /// drop(h);
    /// assert_eq!(DROPPED.load(Ordering::SeqCst), 10);
    /// ```
    ///
    pub unsafe fn add_node<T>(&self, node: *mut T) -> Result<(), error::Status>
    where
        T: HazardNodeT,
    {
        if node.is_null() {
            warn!("node is null");
            return Err(error::Status::InvalidParam);
        }
        let ts = self.get_thread_store();
        ts.add_node(self.version.fetch_add(1, Ordering::SeqCst) + 1, node);
        self.hazard_waiting_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[inline]
    fn atomic_load_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Before accessing a shared object, call method `acquire` to get the `handle` of this
    /// operation, and give it back with `release` afterwards.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_elimination::hazard_epoch::HazardEpoch;
    /// use rs_elimination::error::Status;
    ///
    /// let h = HazardEpoch::default();
    /// let handle = h.acquire().unwrap();
    /// assert_eq!(h.acquire().err(), Some(Status::Busy));
    /// h.release(handle);
    /// ```
    ///
    /// Fails with `ThreadExiting` when called from a thread local destructor, use `pin`
    /// there instead.
    pub fn acquire(&self) -> Result<u64, error::Status> {
        let tid = util::get_thread_id().map_err(|ret| {
            warn!("get_thread_id fail, ret={}", ret);
            ret
        })?;
        self.acquire_in(self.thread_store(tid))
    }

    fn acquire_in(&self, ts: &ThreadStore) -> Result<u64, error::Status> {
        loop {
            let version = self.atomic_load_version();
            let version_handle = ts.acquire(version)?;
            if version != self.atomic_load_version() {
                ts.release(&version_handle);
            } else {
                return Ok(version_handle.ver_u64());
            }
        }
    }

    /// `acquire` wrapped in a guard which releases the handle when dropped.
    ///
    /// Also works while the current thread is exiting: such threads share one store and
    /// hold its lock until the guard is dropped.
    pub fn pin(&self) -> Result<HazardGuard, error::Status> {
        let (ts, exiting) = match util::get_thread_id() {
            Ok(tid) => (self.thread_store(tid), None),
            Err(error::Status::ThreadExiting) => {
                let lock = self.exiting_lock.lock();
                (self.thread_store(util::EXITING_THREAD_ID), Some(lock))
            }
            Err(ret) => return Err(ret),
        };
        let handle = self.acquire_in(ts)?;
        Ok(HazardGuard {
            hazard_epoch: self,
            handle,
            _exiting: exiting,
        })
    }

    #[inline]
    fn atomic_load_thread_count(&self) -> i64 {
        self.thread_count.load(Ordering::SeqCst)
    }

    /// After accessing a shared object, call method `release` to trigger reclaiming. Usage
    /// is the same as `acquire`.
    pub fn release(&self, handle: u64) {
        let version_handle = VersionHandle::new(handle);
        let ts = self.thread_store(version_handle.tid());
        ts.release(&version_handle);
        if self.thread_waiting_threshold < ts.get_hazard_waiting_count() {
            let min_version = self.get_min_version(false);
            let retire_count = ts.retire(min_version, ts);
            self.hazard_waiting_count
                .fetch_sub(retire_count, Ordering::SeqCst);
        } else if self.atomic_load_thread_count() * self.thread_waiting_threshold
            < self.atomic_load_hazard_waiting_count()
        {
            self.retire();
        }
    }

    /// Atomic load count of shared objects waiting to be reclaimed.
    #[inline]
    pub fn atomic_load_hazard_waiting_count(&self) -> i64 {
        self.hazard_waiting_count.load(Ordering::SeqCst)
    }

    /// Store of the current thread. Waiting lists accept nodes from any thread, so an
    /// exiting thread may use the shared store here without its lock.
    fn get_thread_store(&self) -> &ThreadStore {
        let tid = util::get_thread_id().unwrap_or(util::EXITING_THREAD_ID);
        self.thread_store(tid)
    }

    fn thread_store(&self, tid: u32) -> &ThreadStore {
        let ts = self.threads.get(tid);
        // different thread use different thread store.
        if !ts.is_enabled() {
            let _guard = self.thread_lock.lock();
            if !ts.is_enabled() {
                ts.set_next(self.atomic_load_thread_list());
                self.thread_list
                    .store(ts as *const _ as *mut _, Ordering::SeqCst);
                self.thread_count.fetch_add(1, Ordering::SeqCst);
                ts.set_enabled(tid);
            }
        }
        ts
    }

    #[inline]
    fn atomic_load_thread_list(&self) -> *mut ThreadStore {
        self.thread_list.load(Ordering::SeqCst)
    }

    fn get_min_version(&self, force_flush: bool) -> u64 {
        let cached = self.curr_min_version();
        if !force_flush
            && 0 != cached
            && self.curr_min_version_timestamp() + self.min_version_cache_time_us
                > util::get_cur_microseconds_time()
        {
            return cached;
        }
        let mut ret = self.atomic_load_version();
        let mut iter = self.atomic_load_thread_list();
        while !iter.is_null() {
            let ts = unsafe { &*iter };
            let ts_min_version = ts.version();
            if ret > ts_min_version {
                ret = ts_min_version;
            }
            iter = ts.next();
        }
        self.set_curr_min_version(ret);
        self.set_curr_min_version_timestamp(util::get_cur_microseconds_time());
        ret
    }
}

/// Releases its handle when dropped.
pub struct HazardGuard<'a> {
    hazard_epoch: &'a HazardEpoch,
    handle: u64,
    _exiting: Option<SpinLockGuard<'a, ()>>,
}

impl<'a> Drop for HazardGuard<'a> {
    fn drop(&mut self) {
        self.hazard_epoch.release(self.handle);
    }
}
