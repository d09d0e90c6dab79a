use crate::thread_table::ThreadTable;
use crate::util::{ThreadToken, WrappedAlign64Type};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Adaptive width of the elimination sub-range used by one thread.
///
/// Success means partners are around, so the search widens. A timeout means few partners,
/// so it narrows and fewer probes miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePolicy {
    current_range: usize,
    min_range: usize,
    max_range: usize,
}

impl RangePolicy {
    /// Bounds are normalized so that `1 <= min_range <= current_range <= max_range`.
    pub fn new(initial_range: usize, min_range: usize, max_range: usize) -> Self {
        let min_range = min_range.max(1);
        let max_range = max_range.max(min_range);
        RangePolicy {
            current_range: initial_range.max(min_range).min(max_range),
            min_range,
            max_range,
        }
    }

    /// Default bounds over `capacity` slots: start at 1, range over `[1, capacity]`.
    pub fn with_capacity(capacity: usize) -> Self {
        RangePolicy::new(1, 1, capacity)
    }

    #[inline]
    pub fn range(&self) -> usize {
        self.current_range
    }

    pub fn min_range(&self) -> usize {
        self.min_range
    }

    pub fn max_range(&self) -> usize {
        self.max_range
    }

    #[inline]
    pub fn record_success(&mut self) {
        if self.current_range < self.max_range {
            self.current_range += 1;
        }
    }

    #[inline]
    pub fn record_timeout(&mut self) {
        if self.current_range > self.min_range {
            self.current_range -= 1;
        }
    }
}

/// Range saved for one thread id, valid only for the generation that wrote it.
#[derive(Default)]
struct PolicySlot {
    generation: AtomicU64,
    range: AtomicUsize,
}

/// Current range of every live thread, for callers that do not carry their own
/// `RangePolicy`. An entry is only touched by the thread that owns the id. A thread
/// reusing the id of an exited one starts over from the template.
pub struct RangePolicyTable {
    template: RangePolicy,
    slots: ThreadTable<WrappedAlign64Type<PolicySlot>>,
}

impl RangePolicyTable {
    pub fn new(template: RangePolicy) -> Self {
        RangePolicyTable {
            template,
            slots: ThreadTable::new(),
        }
    }

    /// A fresh policy with the configured bounds.
    pub fn template(&self) -> RangePolicy {
        self.template
    }

    pub fn load(&self, token: ThreadToken) -> RangePolicy {
        let slot = self.slots.get(token.id);
        let mut policy = self.template;
        if slot.generation.load(Ordering::Relaxed) == token.generation {
            policy.current_range = slot.range.load(Ordering::Relaxed);
        }
        policy
    }

    pub fn store(&self, token: ThreadToken, policy: &RangePolicy) {
        let slot = self.slots.get(token.id);
        slot.range.store(policy.range(), Ordering::Relaxed);
        slot.generation.store(token.generation, Ordering::Relaxed);
    }
}
