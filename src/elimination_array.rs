use crate::error::ExchangeTimeout;
use crate::exchanger::Exchanger;
use rand::{thread_rng, Rng};
use std::time::Duration;

/// Fixed set of independent exchangers. Threads spread over the first `range` slots.
pub struct EliminationArray<T> {
    exchangers: Box<[Exchanger<T>]>,
    timeout: Duration,
}

impl<T> EliminationArray<T> {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        EliminationArray {
            exchangers: (0..capacity.max(1)).map(|_| Exchanger::new()).collect(),
            timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.exchangers.len()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Exchange `value` through a slot picked uniformly from `[0, range)`, `range` being
    /// clamped to `[1, capacity]`.
    pub fn visit(
        &self,
        value: Option<T>,
        range: usize,
    ) -> Result<Option<T>, ExchangeTimeout<T>> {
        let bound = range.max(1).min(self.capacity());
        let slot = thread_rng().gen_range(0..bound);
        self.exchangers[slot].exchange(value, self.timeout)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_base() {
        let array = EliminationArray::<i32>::new(0, Duration::from_millis(1));
        assert_eq!(array.capacity(), 1);
        assert_eq!(array.timeout(), Duration::from_millis(1));
        let ret = array.visit(Some(3), 100);
        assert_eq!(ret.unwrap_err().into_offer(), Some(3));
    }

    #[test]
    fn test_single_slot_range_pairs_up() {
        // range 1 forces both sides onto slot 0
        let array = Arc::new(EliminationArray::new(8, Duration::from_millis(5)));
        let a = array.clone();
        let pusher = thread::spawn(move || {
            let mut offer = Some(11);
            loop {
                match a.visit(offer, 1) {
                    Ok(got) => return got,
                    Err(timeout) => offer = timeout.into_offer(),
                }
            }
        });
        let popped = loop {
            if let Ok(got) = array.visit(None, 1) {
                break got;
            }
        };
        assert_eq!(popped, Some(11));
        assert_eq!(pusher.join().unwrap(), None);
    }
}
