//! Lock-free stack which backs off into an elimination array under contention.
//!
//! Every operation first tries one CAS on the shared top. When that CAS fails, the thread
//! visits a random exchanger instead of spinning on the top again: a push meeting a pop
//! hands its value over and both return without touching the stack. Such a pair is
//! linearized at the exchange as a push immediately followed by its pop, which no other
//! thread can tell apart because the top was never modified. An unmatched visit times out
//! and the thread goes back to the CAS loop.
//!
//! The CAS loop itself is unbounded. It is lock-free: a failing CAS means another thread's
//! CAS succeeded, so the system as a whole always makes progress.

use crate::config::StackConfig;
use crate::elimination_array::EliminationArray;
use crate::error::{EmptyStack, Status};
use crate::lockfree_stack::{LIFONode, LockFreeStack, TryPop};
use crate::range_policy::{RangePolicy, RangePolicyTable};
use crate::stats::{EliminationStats, StatCounters};
use crate::util;

pub struct EliminationBackoffStack<T> {
    stack: LockFreeStack<T>,
    elimination: EliminationArray<T>,
    policies: RangePolicyTable,
    counters: StatCounters,
    config: StackConfig,
}

impl<T> Default for EliminationBackoffStack<T> {
    fn default() -> Self {
        EliminationBackoffStack::with_valid_config(StackConfig::default())
    }
}

impl<T> EliminationBackoffStack<T> {
    /// # Examples
    ///
    /// ```
    /// use rs_elimination::config::StackConfig;
    /// use rs_elimination::elimination_backoff_stack::EliminationBackoffStack;
    /// use rs_elimination::error::EmptyStack;
    /// use std::time::Duration;
    ///
    /// let config = StackConfig::new(4, Duration::from_micros(50));
    /// let stack = EliminationBackoffStack::new(config).unwrap();
    /// stack.push(5);
    /// assert_eq!(stack.pop(), Ok(5));
    /// assert_eq!(stack.pop(), Err(EmptyStack));
    /// ```
    pub fn new(config: StackConfig) -> Result<Self, Status> {
        config.validate()?;
        Ok(EliminationBackoffStack::with_valid_config(config))
    }

    fn with_valid_config(config: StackConfig) -> Self {
        debug!(
            "new elimination backoff stack, capacity={}, timeout={:?}, range=[{}, {}], initial_range={}",
            config.capacity(),
            config.timeout(),
            config.min_range(),
            config.max_range(),
            config.initial_range()
        );
        EliminationBackoffStack {
            stack: LockFreeStack::new(
                config.thread_waiting_threshold(),
                config.min_version_cache_time_us(),
            ),
            elimination: EliminationArray::new(config.capacity(), config.timeout()),
            policies: RangePolicyTable::new(config.range_policy()),
            counters: StatCounters::default(),
            config,
        }
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// A fresh policy with the configured bounds, for `push_with` and `pop_with`.
    pub fn range_policy(&self) -> RangePolicy {
        self.policies.template()
    }

    /// Push `value` using the current thread's policy.
    pub fn push(&self, value: T) {
        self.with_thread_policy(|policy| self.push_with(policy, value))
    }

    /// Pop using the current thread's policy.
    pub fn pop(&self) -> Result<T, EmptyStack> {
        self.with_thread_policy(|policy| self.pop_with(policy))
    }

    pub fn push_with(&self, policy: &mut RangePolicy, value: T) {
        let mut node = LIFONode::new_boxed(value);
        loop {
            node = match self.stack.try_push(node) {
                Ok(()) => {
                    self.counters.stack_push();
                    return;
                }
                Err(node) => node,
            };
            self.counters.cas_failure();
            match self.elimination.visit(Some(node.into_value()), policy.range()) {
                Ok(got) => {
                    debug_assert!(got.is_none());
                    policy.record_success();
                    self.counters.eliminated_push();
                    return;
                }
                Err(timeout) => {
                    policy.record_timeout();
                    self.counters.exchange_timeout();
                    trace!("push exchange timeout, range={}", policy.range());
                    node = match timeout.into_offer() {
                        Some(value) => LIFONode::new_boxed(value),
                        None => unreachable!("push offer came back without its value"),
                    };
                }
            }
        }
    }

    /// Returns `EmptyStack` as soon as the top is observed empty, without visiting the
    /// elimination array.
    pub fn pop_with(&self, policy: &mut RangePolicy) -> Result<T, EmptyStack> {
        loop {
            match self.stack.try_pop() {
                TryPop::Popped(value) => {
                    self.counters.stack_pop();
                    return Ok(value);
                }
                TryPop::Empty => return Err(EmptyStack),
                TryPop::Contended => self.counters.cas_failure(),
            }
            match self.elimination.visit(None, policy.range()) {
                Ok(Some(value)) => {
                    policy.record_success();
                    self.counters.eliminated_pop();
                    return Ok(value);
                }
                Ok(None) => unreachable!("pop matched another pop"),
                Err(_) => {
                    policy.record_timeout();
                    self.counters.exchange_timeout();
                    trace!("pop exchange timeout, range={}", policy.range());
                }
            }
        }
    }

    /// Snapshot of the shared top only. Values in flight through an exchanger are not seen.
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn stats(&self) -> EliminationStats {
        self.counters.snapshot()
    }

    fn with_thread_policy<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut RangePolicy) -> R,
    {
        match util::get_thread_token() {
            Ok(token) => {
                let mut policy = self.policies.load(token);
                let ret = f(&mut policy);
                self.policies.store(token, &policy);
                ret
            }
            Err(_) => f(&mut self.policies.template()),
        }
    }
}
