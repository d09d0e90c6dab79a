use crate::error;
use crate::util;
use crate::util::WrappedAlign64Type;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicPtr, AtomicU32, AtomicU64, Ordering};

const IDLE_VERSION: u64 = std::u64::MAX;

struct SeqVersion {
    seq: AtomicU32,
    version: AtomicU64,
}

impl Default for SeqVersion {
    fn default() -> Self {
        SeqVersion {
            seq: AtomicU32::new(0),
            version: AtomicU64::new(IDLE_VERSION),
        }
    }
}

#[derive(Copy, Clone)]
struct TidSeq {
    tid: u32,
    seq: u32,
}

#[repr(C)]
#[derive(Copy, Clone)]
union VersionHandleUnion {
    tid_seq: TidSeq,
    ver_u64: u64,
}

/// Packed `(tid, seq)` identifying one acquire/release pair of a thread.
#[derive(Copy, Clone)]
pub struct VersionHandle {
    data: VersionHandleUnion,
}

impl VersionHandle {
    pub fn ver_u64(&self) -> u64 {
        unsafe { self.data.ver_u64 }
    }

    pub fn new(uv: u64) -> VersionHandle {
        VersionHandle {
            data: VersionHandleUnion { ver_u64: uv },
        }
    }

    #[inline]
    fn set_tid(&mut self, tid: u32) {
        unsafe {
            self.data.tid_seq.tid = tid;
        }
    }

    #[inline]
    pub fn tid(&self) -> u32 {
        unsafe { self.data.tid_seq.tid }
    }

    #[inline]
    fn seq(&self) -> u32 {
        unsafe { self.data.tid_seq.seq }
    }

    #[inline]
    fn set_seq(&mut self, seq: u32) {
        unsafe {
            self.data.tid_seq.seq = seq;
        }
    }
}

/// Implemented by every object handed to `HazardEpoch::add_node`. The object embeds a
/// `BaseHazardNode` and must have been allocated with `Box`.
pub trait HazardNodeT {
    /// Address of the embedded `BaseHazardNode`.
    ///
    /// # Safety
    ///
    /// `this` must point to a live object.
    unsafe fn base_hazard_node(this: *mut Self) -> *mut BaseHazardNode;
}

/// Intrusive header linking a retired object into a waiting list.
pub struct BaseHazardNode {
    owner: *mut (),
    reclaim: Option<unsafe fn(*mut ())>,
    next: *mut BaseHazardNode,
    version: u64,
}

impl Default for BaseHazardNode {
    fn default() -> Self {
        BaseHazardNode {
            owner: ptr::null_mut(),
            reclaim: None,
            next: ptr::null_mut(),
            version: IDLE_VERSION,
        }
    }
}

impl HazardNodeT for BaseHazardNode {
    unsafe fn base_hazard_node(this: *mut Self) -> *mut BaseHazardNode {
        this
    }
}

unsafe fn reclaim_boxed<T>(owner: *mut ()) {
    drop(Box::from_raw(owner as *mut T));
}

impl BaseHazardNode {
    #[inline]
    fn next(&self) -> *mut BaseHazardNode {
        self.next
    }

    #[inline]
    fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    #[inline]
    fn set_next(&mut self, next: *mut BaseHazardNode) {
        assert_ne!(next, self as *mut _);
        self.next = next;
    }

    #[inline]
    fn set_owner<T>(&mut self, owner: *mut T) {
        self.owner = owner as *mut ();
        self.reclaim = Some(reclaim_boxed::<T>);
    }
}

/// Per thread slot of a `HazardEpoch`. Version and sequence are written only by the owning
/// thread; the waiting list may be drained by any thread.
pub struct ThreadStore {
    enabled: AtomicBool,
    tid: AtomicU32,
    last_retire_version: AtomicU64,
    curr_seq_version: WrappedAlign64Type<SeqVersion>,
    hazard_waiting_list: WrappedAlign64Type<AtomicPtr<BaseHazardNode>>,
    hazard_waiting_count: WrappedAlign64Type<AtomicI64>,
    next: WrappedAlign64Type<AtomicPtr<ThreadStore>>,
}

impl Default for ThreadStore {
    fn default() -> Self {
        ThreadStore::new()
    }
}

impl ThreadStore {
    fn new() -> ThreadStore {
        ThreadStore {
            enabled: AtomicBool::new(false),
            tid: AtomicU32::new(0),
            last_retire_version: AtomicU64::new(0),
            curr_seq_version: Default::default(),
            hazard_waiting_list: WrappedAlign64Type(AtomicPtr::new(ptr::null_mut())),
            hazard_waiting_count: Default::default(),
            next: WrappedAlign64Type(AtomicPtr::new(ptr::null_mut())),
        }
    }

    pub fn set_enabled(&self, tid: u32) {
        self.tid.store(tid, Ordering::SeqCst);
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn tid(&self) -> u32 {
        self.tid.load(Ordering::Relaxed)
    }

    pub fn set_next(&self, next: *mut ThreadStore) {
        self.next.store(next, Ordering::SeqCst);
    }

    pub fn next(&self) -> *mut ThreadStore {
        self.next.load(Ordering::SeqCst)
    }

    #[inline]
    fn curr_seq(&self) -> u32 {
        self.curr_seq_version.seq.load(Ordering::Relaxed)
    }

    #[inline]
    fn inc_curr_seq(&self) {
        self.curr_seq_version.seq.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn curr_version(&self) -> u64 {
        self.curr_seq_version.version.load(Ordering::SeqCst)
    }

    #[inline]
    fn set_curr_version(&self, version: u64) {
        self.curr_seq_version.version.store(version, Ordering::SeqCst);
    }

    /// The shared store of exiting threads is owned by whoever holds its lock.
    fn assert_owner(&self) {
        debug_assert_eq!(
            util::get_thread_id().unwrap_or(util::EXITING_THREAD_ID),
            self.tid()
        );
    }

    /// Publish `version` as the oldest version the current thread may still observe.
    pub fn acquire(&self, version: u64) -> Result<VersionHandle, error::Status> {
        self.assert_owner();
        if IDLE_VERSION != self.curr_version() {
            warn!(
                "current thread has already assigned a version handle, seq={}",
                self.curr_seq()
            );
            return Err(error::Status::Busy);
        }
        self.set_curr_version(version);
        let mut handle = VersionHandle::new(0);
        handle.set_tid(self.tid());
        handle.set_seq(self.curr_seq());
        Ok(handle)
    }

    pub fn release(&self, handle: &VersionHandle) {
        self.assert_owner();
        if self.tid() == handle.tid() && self.curr_seq() != handle.seq() {
            warn!("invalid handle seq={}, tid={}", handle.seq(), handle.tid());
        } else {
            self.set_curr_version(IDLE_VERSION);
            self.inc_curr_seq();
        }
    }

    /// Queue `node` to be reclaimed once no thread holds a version older than `version`.
    ///
    /// # Safety
    ///
    /// `node` must come from `Box::into_raw`, be unreachable for threads that acquire a
    /// version after this call, and must not be added twice.
    pub unsafe fn add_node<T>(&self, version: u64, node: *mut T)
    where
        T: HazardNodeT,
    {
        self.assert_owner();
        let base = T::base_hazard_node(node);
        (*base).set_owner(node);
        (*base).set_version(version);
        self.inner_add_nodes(base, base, 1);
        // a retire racing with this insert may have recorded a version not older than ours
        self.last_retire_version.store(0, Ordering::SeqCst);
    }

    pub fn get_hazard_waiting_count(&self) -> i64 {
        self.hazard_waiting_count.load(Ordering::SeqCst)
    }

    /// Free every queued node with a version not newer than `version` and move the others
    /// to `node_receiver`, which must belong to the current thread. Returns the number of
    /// nodes freed.
    pub fn retire(&self, version: u64, node_receiver: &ThreadStore) -> i64 {
        node_receiver.assert_owner();
        if self.last_retire_version.swap(version, Ordering::SeqCst) == version {
            return 0;
        }
        let curr = self.hazard_waiting_list.swap(ptr::null_mut(), Ordering::SeqCst);
        let mut list_retire = ptr::null_mut();
        let mut move_count = 0i64;
        let mut retire_count = 0i64;
        let mut pseudo_head = BaseHazardNode::default();
        pseudo_head.next = curr;
        let mut iter = &mut pseudo_head as *mut BaseHazardNode;
        unsafe {
            while !(*iter).next().is_null() {
                let candidate = (*iter).next();
                if (*candidate).version() <= version {
                    retire_count += 1;
                    (*iter).set_next((*candidate).next());
                    (*candidate).next = list_retire;
                    list_retire = candidate;
                } else {
                    move_count += 1;
                    iter = candidate;
                }
            }
            let move_list_head = pseudo_head.next();
            if !move_list_head.is_null() {
                node_receiver.inner_add_nodes(move_list_head, iter, move_count);
            }
            self.hazard_waiting_count
                .fetch_sub(move_count + retire_count, Ordering::SeqCst);
            while !list_retire.is_null() {
                let node_retire = list_retire;
                list_retire = (*list_retire).next();
                Self::retire_hazard_node(node_retire);
            }
        }
        retire_count
    }

    unsafe fn retire_hazard_node(node_retire: *mut BaseHazardNode) {
        match (*node_retire).reclaim {
            Some(reclaim) => reclaim((*node_retire).owner),
            None => warn!("hazard node without owner, version={}", (*node_retire).version),
        }
    }

    pub fn version(&self) -> u64 {
        self.curr_version()
    }

    unsafe fn inner_add_nodes(
        &self,
        head: *mut BaseHazardNode,
        tail: *mut BaseHazardNode,
        count: i64,
    ) {
        if 0 < count {
            let mut old = self.hazard_waiting_list.load(Ordering::SeqCst);
            (*tail).next = old;
            while let Err(curr) = self.hazard_waiting_list.compare_exchange(
                old,
                head,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                old = curr;
                (*tail).next = old;
            }
            self.hazard_waiting_count.fetch_add(count, Ordering::SeqCst);
        }
    }

    fn destroy(&mut self) {
        let mut node_retire = *self.hazard_waiting_list.get_mut();
        *self.hazard_waiting_list.get_mut() = ptr::null_mut();
        while !node_retire.is_null() {
            unsafe {
                let next = (*node_retire).next();
                Self::retire_hazard_node(node_retire);
                node_retire = next;
            }
        }
        *self.hazard_waiting_count.get_mut() = 0;
    }
}

impl Drop for ThreadStore {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_version_handle() {
        let mut handle = VersionHandle::new(0);
        handle.set_tid(70_000);
        handle.set_seq(42);
        let copied = VersionHandle::new(handle.ver_u64());
        assert_eq!(copied.tid(), 70_000);
        assert_eq!(copied.seq(), 42);
    }

    #[test]
    fn test_thread_store() {
        let ts = ThreadStore::default();
        ts.set_enabled(util::get_thread_id().unwrap());
        let handle = ts.acquire(5).unwrap();
        assert_eq!(ts.version(), 5);
        assert!(ts.acquire(6).is_err());
        ts.release(&handle);
        assert_eq!(ts.version(), IDLE_VERSION);

        for version in 1..=4u64 {
            let node = Box::into_raw(Box::new(BaseHazardNode::default()));
            unsafe { ts.add_node(version, node) };
        }
        assert_eq!(ts.get_hazard_waiting_count(), 4);
        assert_eq!(ts.retire(2, &ts), 2);
        assert_eq!(ts.get_hazard_waiting_count(), 2);
        assert_eq!(ts.retire(2, &ts), 0);
        assert_eq!(ts.retire(4, &ts), 2);
        assert_eq!(ts.get_hazard_waiting_count(), 0);
    }
}
