//! Bounded-time rendezvous between one push offer and one pop marker.
//!
//! The slot is a single word: the pointer to the offer envelope with the state in its low
//! bits. Envelopes are aligned to 64 bytes, a pop marker is the null pointer.
//!
//! ```text
//!   EMPTY --(waiter CAS)--> WAITING --(joiner CAS)--> BUSY --(waiter store)--> EMPTY
//!                              |
//!                              +----(waiter timeout CAS)--> EMPTY
//! ```
//!
//! Only the waiter leaves BUSY, so the reset is a plain store. A waiter whose timeout CAS
//! fails has lost the race to a joiner and completes the exchange instead.

use crate::error::ExchangeTimeout;
use crate::util;
use crate::util::WrappedAlign64Type;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const EMPTY: usize = 0;
const WAITING: usize = 1;
const BUSY: usize = 2;
const STATE_MASK: usize = 0b11;

type OfferPtr<T> = *mut WrappedAlign64Type<T>;

#[inline]
fn compose<T>(offer: OfferPtr<T>, state: usize) -> usize {
    offer as usize | state
}

#[inline]
fn decompose<T>(word: usize) -> (OfferPtr<T>, usize) {
    ((word & !STATE_MASK) as OfferPtr<T>, word & STATE_MASK)
}

fn into_raw<T>(offer: Option<T>) -> OfferPtr<T> {
    match offer {
        Some(v) => Box::into_raw(Box::new(WrappedAlign64Type(v))),
        None => ptr::null_mut(),
    }
}

/// Caller must own `offer`.
unsafe fn from_raw<T>(offer: OfferPtr<T>) -> Option<T> {
    if offer.is_null() {
        None
    } else {
        Some(Box::from_raw(offer).0)
    }
}

pub struct Exchanger<T> {
    slot: WrappedAlign64Type<AtomicUsize>,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Send> Send for Exchanger<T> {}

unsafe impl<T: Send> Sync for Exchanger<T> {}

impl<T> Default for Exchanger<T> {
    fn default() -> Self {
        Exchanger::new()
    }
}

impl<T> Exchanger<T> {
    pub fn new() -> Self {
        Exchanger {
            slot: WrappedAlign64Type(AtomicUsize::new(EMPTY)),
            _marker: PhantomData,
        }
    }

    /// Offer a value (`Some`, from a push) or a pop marker (`None`) and wait up to `timeout`
    /// for a partner offering the other kind.
    ///
    /// On success returns the partner's offer: `None` for a push, `Some` for a pop. On
    /// timeout the caller's own offer comes back inside the error.
    pub fn exchange(
        &self,
        offer: Option<T>,
        timeout: Duration,
    ) -> Result<Option<T>, ExchangeTimeout<T>> {
        let deadline = deadline_after(timeout);
        let mine = into_raw(offer);
        loop {
            if util::get_cur_monotonic_nanos() > deadline {
                return Err(ExchangeTimeout::new(unsafe { from_raw(mine) }));
            }
            let word = self.slot.load(Ordering::Acquire);
            let (theirs, state) = decompose::<T>(word);
            match state {
                EMPTY => {
                    if self
                        .slot
                        .compare_exchange(
                            word,
                            compose(mine, WAITING),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return self.wait_for_partner(mine, deadline);
                    }
                }
                WAITING if theirs.is_null() != mine.is_null() => {
                    if self
                        .slot
                        .compare_exchange(
                            word,
                            compose(mine, BUSY),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return Ok(unsafe { from_raw(theirs) });
                    }
                }
                // BUSY, or a waiter of the same kind
                _ => util::pause(),
            }
        }
    }

    fn wait_for_partner(
        &self,
        mine: OfferPtr<T>,
        deadline: u64,
    ) -> Result<Option<T>, ExchangeTimeout<T>> {
        loop {
            let (theirs, state) = decompose::<T>(self.slot.load(Ordering::Acquire));
            if state == BUSY {
                self.slot.store(EMPTY, Ordering::Release);
                return Ok(unsafe { from_raw(theirs) });
            }
            if util::get_cur_monotonic_nanos() > deadline
                && self
                    .slot
                    .compare_exchange(
                        compose(mine, WAITING),
                        EMPTY,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                return Err(ExchangeTimeout::new(unsafe { from_raw(mine) }));
            }
            util::pause();
        }
    }
}

impl<T> Drop for Exchanger<T> {
    fn drop(&mut self) {
        // Every exchange returns only after its offers are owned again, so a dropped
        // exchanger is always empty.
        debug_assert_eq!(*self.slot.get_mut(), EMPTY);
    }
}

fn deadline_after(timeout: Duration) -> u64 {
    let nanos = timeout.as_nanos().min(u128::from(std::u64::MAX)) as u64;
    util::get_cur_monotonic_nanos().saturating_add(nanos)
}
