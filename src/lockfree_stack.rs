//! Treiber stack on top of `HazardEpoch`. Used on its own or as the shared core of
//! `EliminationBackoffStack`.

use crate::hazard_epoch::{HazardEpoch, HazardGuard};
use crate::hazard_pointer::{BaseHazardNode, HazardNodeT};
use crate::util;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr;
#[cfg(test)]
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{AtomicPtr, Ordering};

type LIFONodePtr<T> = *mut LIFONode<T>;

pub(crate) struct LIFONode<T> {
    value: ManuallyDrop<T>,
    base: BaseHazardNode,
    next: LIFONodePtr<T>,
}

impl<T> HazardNodeT for LIFONode<T> {
    unsafe fn base_hazard_node(this: *mut Self) -> *mut BaseHazardNode {
        ptr::addr_of_mut!((*this).base)
    }
}

impl<T> LIFONode<T> {
    pub(crate) fn new_boxed(value: T) -> Box<Self> {
        Box::new(LIFONode {
            value: ManuallyDrop::new(value),
            base: BaseHazardNode::default(),
            next: ptr::null_mut(),
        })
    }

    /// Take the value back out of a node that was never published.
    pub(crate) fn into_value(self: Box<Self>) -> T {
        let mut node = self;
        unsafe { ManuallyDrop::take(&mut node.value) }
    }

    fn next(&self) -> LIFONodePtr<T> {
        self.next
    }

    fn set_next(&mut self, next: LIFONodePtr<T>) {
        self.next = next;
    }
}

/// Outcome of a single pop attempt.
pub(crate) enum TryPop<T> {
    Popped(T),
    Empty,
    Contended,
}

pub struct LockFreeStack<T> {
    hazard_epoch: HazardEpoch,
    top: util::WrappedAlign64Type<AtomicPtr<LIFONode<T>>>,
    #[cfg(test)]
    contended: AtomicBool,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send> Send for LockFreeStack<T> {}

unsafe impl<T: Send> Sync for LockFreeStack<T> {}

impl<T> Default for LockFreeStack<T> {
    fn default() -> Self {
        LockFreeStack::with_hazard_epoch(HazardEpoch::default())
    }
}

impl<T> LockFreeStack<T> {
    #[inline]
    fn atomic_load_top(&self) -> LIFONodePtr<T> {
        self.top.load(Ordering::Acquire)
    }

    pub fn new(thread_waiting_threshold: i64, min_version_cache_time_us: i64) -> Self {
        LockFreeStack::with_hazard_epoch(HazardEpoch::new(
            thread_waiting_threshold,
            min_version_cache_time_us,
        ))
    }

    fn with_hazard_epoch(hazard_epoch: HazardEpoch) -> Self {
        LockFreeStack {
            hazard_epoch,
            top: util::WrappedAlign64Type(AtomicPtr::new(ptr::null_mut())),
            #[cfg(test)]
            contended: AtomicBool::new(false),
            _marker: PhantomData,
        }
    }

    pub fn push(&self, v: T) {
        let mut node = LIFONode::new_boxed(v);
        while let Err(back) = self.try_push(node) {
            node = back;
            util::pause();
        }
    }

    pub fn pop(&self) -> Option<T> {
        loop {
            match self.try_pop() {
                TryPop::Popped(v) => return Some(v),
                TryPop::Empty => return None,
                TryPop::Contended => util::pause(),
            }
        }
    }

    /// Best effort, a concurrent push or pop may change it right after.
    pub fn is_empty(&self) -> bool {
        self.atomic_load_top().is_null()
    }

    /// One CAS of `top` from the observed top to `node`. Gives the node back on contention.
    /// Pushing never dereferences the observed top, so it needs no hazard handle.
    pub(crate) fn try_push(&self, node: Box<LIFONode<T>>) -> Result<(), Box<LIFONode<T>>> {
        if self.forced_contention() {
            return Err(node);
        }
        let old = self.top.load(Ordering::Relaxed);
        let node = Box::into_raw(node);
        unsafe { (*node).set_next(old) };
        match self
            .top
            .compare_exchange(old, node, Ordering::Release, Ordering::Relaxed)
        {
            Ok(_) => Ok(()),
            Err(_) => Err(unsafe { Box::from_raw(node) }),
        }
    }

    /// One CAS of `top` from the observed top to its successor.
    pub(crate) fn try_pop(&self) -> TryPop<T> {
        if self.forced_contention() {
            return TryPop::Contended;
        }
        let _guard = self.pin();
        let cur = self.atomic_load_top();
        if cur.is_null() {
            return TryPop::Empty;
        }
        let next = unsafe { (*cur).next() };
        if self
            .top
            .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return TryPop::Contended;
        }
        let ret = unsafe { ManuallyDrop::into_inner(ptr::read(&(*cur).value)) };
        if let Err(status) = unsafe { self.hazard_epoch.add_node(cur) } {
            warn!("leak popped node, add_node fail, ret={}", status);
        }
        TryPop::Popped(ret)
    }

    #[cfg(not(test))]
    #[inline]
    fn forced_contention(&self) -> bool {
        false
    }

    #[cfg(test)]
    fn forced_contention(&self) -> bool {
        self.contended.load(Ordering::Relaxed)
    }

    /// Make every `try_push` and `try_pop` fail as if another thread won the CAS.
    #[cfg(test)]
    pub(crate) fn set_contended(&self, contended: bool) {
        self.contended.store(contended, Ordering::Relaxed);
    }

    /// A hazard handle for the current thread, also from thread local destructors.
    fn pin(&self) -> HazardGuard {
        match self.hazard_epoch.pin() {
            Ok(guard) => guard,
            // only `Busy` is left, and no caller pins while already pinned
            Err(status) => unreachable!("nested hazard handle, ret={}", status),
        }
    }

    /// Drop every value still linked from `top`.
    fn destroy(&mut self) {
        let mut head = *self.top.get_mut();
        while !head.is_null() {
            let mut node = unsafe { Box::from_raw(head) };
            head = node.next();
            unsafe { ManuallyDrop::drop(&mut node.value) };
        }
        *self.top.get_mut() = ptr::null_mut();
    }
}

impl<T> Drop for LockFreeStack<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    struct Node {
        cnt: Arc<AtomicI64>,
        v: i32,
    }

    impl Drop for Node {
        fn drop(&mut self) {
            self.cnt.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_base() {
        let stack = LockFreeStack::default();
        assert!(stack.pop().is_none());
        assert!(stack.is_empty());
        stack.push(1);
        assert!(!stack.is_empty());
        assert_eq!(stack.pop().unwrap(), 1);
        let test_num = 100;
        for i in 0..test_num {
            stack.push(i);
        }
        for i in 0..test_num {
            assert_eq!(stack.pop().unwrap(), test_num - i - 1);
        }
        assert!(stack.pop().is_none());
    }

    #[test]
    fn test_memory_leak() {
        let cnt = Arc::new(AtomicI64::new(0));
        let stack = LockFreeStack::default();
        let test_num = 100;
        for i in 0..test_num {
            stack.push(Node {
                cnt: cnt.clone(),
                v: i,
            });
        }
        assert_eq!(cnt.load(Ordering::SeqCst), 0);
        for i in 0..test_num / 2 {
            assert_eq!(stack.pop().unwrap().v, test_num - i - 1);
        }
        assert_eq!(cnt.load(Ordering::SeqCst), (test_num / 2) as i64);
        drop(stack);
        assert_eq!(cnt.load(Ordering::SeqCst), test_num as i64);
    }

    #[test]
    fn test_try_ops() {
        let stack = LockFreeStack::default();
        let node = LIFONode::new_boxed(7);
        assert!(stack.try_push(node).is_ok());
        assert_eq!(LIFONode::new_boxed(9).into_value(), 9);
        match stack.try_pop() {
            TryPop::Popped(v) => assert_eq!(v, 7),
            _ => panic!("expect popped value"),
        }
        assert!(matches!(stack.try_pop(), TryPop::Empty));

        stack.push(8);
        stack.set_contended(true);
        assert!(stack.try_push(LIFONode::new_boxed(9)).is_err());
        assert!(matches!(stack.try_pop(), TryPop::Contended));
        stack.set_contended(false);
        assert_eq!(stack.pop(), Some(8));
    }
}
