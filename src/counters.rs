//! Definition of bounded protocol counters, used for retry attempts.
//!
//! Unlike a message ID counter, these counters do not wrap. They saturate one step past their
//! maximum, which is where the state that checks them takes its fallback path.

/// Counter errors.
#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The counter already exceeds its maximum.
    #[error("counter overrun")]
    Overrun,
}

/// Counter kinds, with their default maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CounterType {
    /// Source capability advertisements (nCapsCount).
    Caps,
    /// Discover Identity attempts (nDiscoverIdentityCount).
    DiscoverIdentity,
    /// Hard resets (nHardResetCount).
    HardReset,
    /// Hard resets during a VCONN or power role swap.
    SwapHardReset,
    /// Request retransmissions by a sink.
    SelectRetry,
}

impl CounterType {
    /// The protocol default maximum for this counter.
    pub const fn default_max(self) -> u8 {
        match self {
            CounterType::Caps => 50,
            CounterType::DiscoverIdentity => 20,
            CounterType::HardReset => 2,
            CounterType::SwapHardReset => 2,
            CounterType::SelectRetry => 5,
        }
    }
}

/// A bounded counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Counter {
    value: u8,
    max_value: u8,
}

impl Counter {
    /// Create a counter with the default maximum of its type.
    pub fn new(counter_type: CounterType) -> Self {
        Self::new_with_max(counter_type.default_max())
    }

    /// Create a counter with a custom maximum.
    pub fn new_with_max(max_value: u8) -> Self {
        Self { value: 0, max_value }
    }

    /// The current value.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// The maximum value, which may still be reached without exhausting the counter.
    pub fn max_value(&self) -> u8 {
        self.max_value
    }

    /// Increment the counter by one.
    ///
    /// Fails once the counter is already exhausted; the value then stays put.
    pub fn increment(&mut self) -> Result<(), Error> {
        if self.is_exhausted() {
            return Err(Error::Overrun);
        }

        self.value += 1;
        Ok(())
    }

    /// Whether the counter exceeds its maximum.
    pub fn is_exhausted(&self) -> bool {
        self.value > self.max_value
    }

    /// Reset the counter to zero.
    pub fn reset(&mut self) {
        self.value = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{Counter, CounterType, Error};

    #[test]
    fn exhausted_one_past_max() {
        let mut counter = Counter::new_with_max(2);

        counter.increment().unwrap();
        counter.increment().unwrap();
        assert!(!counter.is_exhausted());

        counter.increment().unwrap();
        assert!(counter.is_exhausted());
        assert_eq!(counter.increment(), Err(Error::Overrun));
        assert_eq!(counter.value(), 3);

        counter.reset();
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn default_maxima() {
        assert_eq!(Counter::new(CounterType::Caps).max_value(), 50);
        assert_eq!(Counter::new(CounterType::HardReset).max_value(), 2);
        assert_eq!(Counter::new(CounterType::DiscoverIdentity).max_value(), 20);
    }
}
