use crate::error::Status;
use crate::spin_lock::SpinLock;
use std::cell::Cell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Id shared by threads whose thread local storage is already torn down.
pub const EXITING_THREAD_ID: u32 = 0;

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(EXITING_THREAD_ID + 1);
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);
static FREE_THREAD_IDS: SpinLock<Vec<u32>> = SpinLock::new(Vec::new());

/// Dense id of a live thread plus the generation of this allocation. Ids are reused after
/// a thread exits, generations never are.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ThreadToken {
    pub id: u32,
    pub generation: u64,
}

/// Token owned by the current thread, its id is given back to the pool on exit.
struct ThreadTokenSlot {
    token: Cell<Option<ThreadToken>>,
}

impl Drop for ThreadTokenSlot {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            FREE_THREAD_IDS.lock().push(token.id);
        }
    }
}

thread_local! {
    static THREAD_TOKEN: ThreadTokenSlot = ThreadTokenSlot {
        token: Cell::new(None),
    };
}

fn alloc_thread_token() -> ThreadToken {
    let recycled = FREE_THREAD_IDS.lock().pop();
    let id = recycled.unwrap_or_else(|| NEXT_THREAD_ID.fetch_add(1, Ordering::SeqCst));
    ThreadToken {
        id,
        generation: NEXT_GENERATION.fetch_add(1, Ordering::SeqCst),
    }
}

/// Token of the current thread, allocated on first use. Fails with `ThreadExiting` once
/// the thread local storage of the current thread has been destroyed.
pub fn get_thread_token() -> Result<ThreadToken, Status> {
    THREAD_TOKEN
        .try_with(|slot| match slot.token.get() {
            Some(token) => token,
            None => {
                let token = alloc_thread_token();
                slot.token.set(Some(token));
                token
            }
        })
        .map_err(|_| Status::ThreadExiting)
}

/// Dense id of the current thread, never `EXITING_THREAD_ID`. Ids of exited threads are
/// reused, so ids stay close to the number of threads alive at once.
#[inline]
pub fn get_thread_id() -> Result<u32, Status> {
    get_thread_token().map(|token| token.id)
}

#[repr(align(64))]
pub struct WrappedAlign64Type<T>(pub T);

impl<T> Default for WrappedAlign64Type<T>
where
    T: Default,
{
    fn default() -> Self {
        WrappedAlign64Type(T::default())
    }
}

impl<T> Deref for WrappedAlign64Type<T> {
    type Target = T;

    fn deref(&self) -> &<Self as Deref>::Target {
        &self.0
    }
}

impl<T> DerefMut for WrappedAlign64Type<T> {
    fn deref_mut(&mut self) -> &mut <Self as Deref>::Target {
        &mut self.0
    }
}

pub fn get_cur_microseconds_time() -> i64 {
    let timespec = time::get_time();
    timespec.sec * 1_000_000 + timespec.nsec as i64 / 1_000
}

/// Monotonic clock in nanoseconds, used for deadlines.
#[inline]
pub fn get_cur_monotonic_nanos() -> u64 {
    time::precise_time_ns()
}

#[inline]
pub fn pause() {
    hint::spin_loop();
}
