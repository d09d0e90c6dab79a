use crate::util::WrappedAlign64Type;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of `EliminationBackoffStack` activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EliminationStats {
    /// Pushes that linked a node into the stack.
    pub stack_pushes: u64,
    /// Pops that unlinked a node from the stack.
    pub stack_pops: u64,
    /// Pushes handed directly to a pop.
    pub eliminated_pushes: u64,
    /// Pops served directly by a push.
    pub eliminated_pops: u64,
    /// Exchanges that found no partner in time.
    pub exchange_timeouts: u64,
    pub cas_failures: u64,
}

#[derive(Default)]
pub(crate) struct StatCounters {
    stack_pushes: WrappedAlign64Type<AtomicU64>,
    stack_pops: WrappedAlign64Type<AtomicU64>,
    eliminated_pushes: WrappedAlign64Type<AtomicU64>,
    eliminated_pops: WrappedAlign64Type<AtomicU64>,
    exchange_timeouts: WrappedAlign64Type<AtomicU64>,
    cas_failures: WrappedAlign64Type<AtomicU64>,
}

#[inline]
fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StatCounters {
    pub(crate) fn stack_push(&self) {
        inc(&self.stack_pushes);
    }

    pub(crate) fn stack_pop(&self) {
        inc(&self.stack_pops);
    }

    pub(crate) fn eliminated_push(&self) {
        inc(&self.eliminated_pushes);
    }

    pub(crate) fn eliminated_pop(&self) {
        inc(&self.eliminated_pops);
    }

    pub(crate) fn exchange_timeout(&self) {
        inc(&self.exchange_timeouts);
    }

    pub(crate) fn cas_failure(&self) {
        inc(&self.cas_failures);
    }

    pub(crate) fn snapshot(&self) -> EliminationStats {
        EliminationStats {
            stack_pushes: self.stack_pushes.load(Ordering::Relaxed),
            stack_pops: self.stack_pops.load(Ordering::Relaxed),
            eliminated_pushes: self.eliminated_pushes.load(Ordering::Relaxed),
            eliminated_pops: self.eliminated_pops.load(Ordering::Relaxed),
            exchange_timeouts: self.exchange_timeouts.load(Ordering::Relaxed),
            cas_failures: self.cas_failures.load(Ordering::Relaxed),
        }
    }
}
