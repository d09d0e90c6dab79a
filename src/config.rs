//! Constructor parameters of `EliminationBackoffStack`.

use crate::error::Status;
use crate::hazard_epoch::{DEFAULT_MIN_VERSION_CACHE_TIME_US, DEFAULT_THREAD_WAITING_THRESHOLD};
use crate::range_policy::RangePolicy;
use std::time::Duration;

/// Default number of exchangers in the elimination array.
pub const DEFAULT_CAPACITY: usize = 16;
/// Default time a thread waits in an exchanger for a partner.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_micros(500);

/// # Examples
///
/// ```
/// use rs_elimination::config::StackConfig;
/// use std::time::Duration;
///
/// let config = StackConfig::new(8, Duration::from_micros(100)).with_range(2, 1, 4);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.max_range(), 4);
/// assert!(StackConfig::new(0, Duration::from_micros(100)).validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StackConfig {
    capacity: usize,
    timeout: Duration,
    initial_range: usize,
    min_range: usize,
    max_range: Option<usize>,
    thread_waiting_threshold: i64,
    min_version_cache_time_us: i64,
}

impl Default for StackConfig {
    fn default() -> Self {
        StackConfig::new(DEFAULT_CAPACITY, DEFAULT_EXCHANGE_TIMEOUT)
    }
}

impl StackConfig {
    /// `capacity` exchangers, each waiting up to `timeout`. The range starts at 1 and moves
    /// within `[1, capacity]`.
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        StackConfig {
            capacity,
            timeout,
            initial_range: 1,
            min_range: 1,
            max_range: None,
            thread_waiting_threshold: DEFAULT_THREAD_WAITING_THRESHOLD,
            min_version_cache_time_us: DEFAULT_MIN_VERSION_CACHE_TIME_US,
        }
    }

    pub fn with_range(mut self, initial_range: usize, min_range: usize, max_range: usize) -> Self {
        self.initial_range = initial_range;
        self.min_range = min_range;
        self.max_range = Some(max_range);
        self
    }

    /// Tuning of node reclamation, see `HazardEpoch::new`.
    pub fn with_reclamation(
        mut self,
        thread_waiting_threshold: i64,
        min_version_cache_time_us: i64,
    ) -> Self {
        self.thread_waiting_threshold = thread_waiting_threshold;
        self.min_version_cache_time_us = min_version_cache_time_us;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn initial_range(&self) -> usize {
        self.initial_range
    }

    pub fn min_range(&self) -> usize {
        self.min_range
    }

    pub fn max_range(&self) -> usize {
        self.max_range.unwrap_or(self.capacity)
    }

    pub fn thread_waiting_threshold(&self) -> i64 {
        self.thread_waiting_threshold
    }

    pub fn min_version_cache_time_us(&self) -> i64 {
        self.min_version_cache_time_us
    }

    /// Requires `1 <= min_range <= initial_range <= max_range <= capacity`, a positive
    /// waiting threshold and a non-negative cache interval.
    pub fn validate(&self) -> Result<(), Status> {
        if self.capacity == 0 {
            warn!("invalid capacity={}", self.capacity);
            return Err(Status::InvalidParam);
        }
        let max_range = self.max_range();
        if self.min_range == 0
            || self.min_range > self.initial_range
            || self.initial_range > max_range
            || max_range > self.capacity
        {
            warn!(
                "invalid range, initial={}, min={}, max={}, capacity={}",
                self.initial_range, self.min_range, max_range, self.capacity
            );
            return Err(Status::InvalidParam);
        }
        if self.thread_waiting_threshold <= 0 || self.min_version_cache_time_us < 0 {
            warn!(
                "invalid reclamation, thread_waiting_threshold={}, min_version_cache_time_us={}",
                self.thread_waiting_threshold, self.min_version_cache_time_us
            );
            return Err(Status::InvalidParam);
        }
        Ok(())
    }

    pub fn range_policy(&self) -> RangePolicy {
        RangePolicy::new(self.initial_range, self.min_range, self.max_range())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default() {
        let config = StackConfig::default();
        assert_eq!(config.capacity(), DEFAULT_CAPACITY);
        assert_eq!(config.timeout(), DEFAULT_EXCHANGE_TIMEOUT);
        assert_eq!(config.max_range(), DEFAULT_CAPACITY);
        assert_eq!(config.validate(), Ok(()));
        let policy = config.range_policy();
        assert_eq!((policy.range(), policy.min_range(), policy.max_range()), (1, 1, 16));
    }

    #[test]
    fn test_invalid() {
        let timeout = Duration::from_micros(10);
        assert_eq!(
            StackConfig::new(0, timeout).validate(),
            Err(Status::InvalidParam)
        );
        let bad_ranges = [(0, 0, 4), (1, 2, 4), (5, 1, 4), (1, 1, 9)];
        for &(initial, min, max) in bad_ranges.iter() {
            let config = StackConfig::new(8, timeout).with_range(initial, min, max);
            assert_eq!(config.validate(), Err(Status::InvalidParam));
        }
        let config = StackConfig::new(8, timeout).with_reclamation(0, 1);
        assert_eq!(config.validate(), Err(Status::InvalidParam));
        let config = StackConfig::new(8, timeout).with_reclamation(1, -1);
        assert_eq!(config.validate(), Err(Status::InvalidParam));
    }
}
