//! Definition of error and status.

use std::error::Error;
use std::fmt;

/// Status of `HazardEpoch` and of configuration checks
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Status {
    /// Current thread has already assigned a version handle
    Busy,
    /// Invalid parameter
    InvalidParam,
    /// Thread local storage of current thread has been destroyed
    ThreadExiting,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Returned by `pop` when the stack is observably empty.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub struct EmptyStack;

impl fmt::Display for EmptyStack {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "stack is empty")
    }
}

impl Error for EmptyStack {}

/// No partner arrived before the deadline. Carries the unmatched offer back to its owner.
#[derive(PartialEq, Eq, Debug)]
pub struct ExchangeTimeout<T> {
    offer: Option<T>,
}

impl<T> ExchangeTimeout<T> {
    pub fn new(offer: Option<T>) -> Self {
        ExchangeTimeout { offer }
    }

    /// Take back the value offered to the exchange, `None` for a pop marker.
    pub fn into_offer(self) -> Option<T> {
        self.offer
    }
}

impl<T> fmt::Display for ExchangeTimeout<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "exchange timeout, offered {}",
            if self.offer.is_some() { "value" } else { "pop marker" }
        )
    }
}
