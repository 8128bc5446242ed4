//! Timer types and the injected clock.
//!
//! States never sleep. They poll a [`Stopwatch`] against the duration of a [`TimerType`],
//! which keeps every wait bounded and lets tests fast-forward time.

/// A monotonic millisecond clock.
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed epoch.
    fn now_ms(&self) -> u64;

    /// Busy-wait for a number of milliseconds.
    fn delay_ms(&self, milliseconds: u64) {
        let start = self.now_ms();
        while self.now_ms().saturating_sub(start) < milliseconds {}
    }
}

/// Elapsed time since the last (re)arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stopwatch {
    armed_at_ms: u64,
}

impl Stopwatch {
    /// Create a stopwatch that is armed now.
    pub fn new<CLOCK: Clock>(clock: &CLOCK) -> Self {
        Self {
            armed_at_ms: clock.now_ms(),
        }
    }

    /// Restart the stopwatch.
    pub fn arm<CLOCK: Clock>(&mut self, clock: &CLOCK) {
        self.armed_at_ms = clock.now_ms();
    }

    /// Milliseconds since the stopwatch was armed.
    pub fn elapsed_ms<CLOCK: Clock>(&self, clock: &CLOCK) -> u64 {
        clock.now_ms().saturating_sub(self.armed_at_ms)
    }

    /// Whether the given timer has run out.
    pub fn expired<CLOCK: Clock>(&self, clock: &CLOCK, timer_type: TimerType) -> bool {
        self.elapsed_ms(clock) >= timer_type.duration_ms()
    }
}

/// Protocol timers, and the fixed settle delays of the power sequencing states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerType {
    ChunkingNotSupported,
    NoResponse,
    PSHardReset,
    PSSourceOff,
    PSSourceOn,
    PSTransition,
    SenderResponse,
    SrcRecover,
    SrcTransition,
    StartAmsMargin,
    SwapSourceStart,
    TypeCSendSourceCap,
    TypeCSinkWaitCap,
    VconnSourceOn,
    VdmSenderResponse,
    BistContMode,

    /// Polling window of the ready states, before they park.
    ReadyPoll,
    /// Received messages are ignored for this long after entering a state.
    MessageGuard,
    /// Delay before commands are honoured on a PD 2.0 contract.
    CommandDelayPd2,
    /// Delay before commands are honoured on a PD 3.0 contract.
    CommandDelayPd3,
    /// Window for VBUS detection during source startup.
    VbusDetect,
    /// Settle time after a hard reset, before the source restarts.
    SrcStartupRecover,
    /// Settle time of the VBUS source, once switched on.
    ChargerSettle,
    SinkDefaultSettle,
    SourceOffSettle,
    SinkOffSettle,
    SourceOnSettle,
    ErrorRecoverySettle,
    /// Delay before answering a structured VDM.
    VdmReplyDelay,
}

impl TimerType {
    /// The timer duration in milliseconds.
    pub const fn duration_ms(self) -> u64 {
        match self {
            TimerType::ChunkingNotSupported => 45,
            TimerType::NoResponse => 5000,
            TimerType::PSHardReset => 30,
            TimerType::PSSourceOff => 835,
            TimerType::PSSourceOn => 435,
            TimerType::PSTransition => 500,
            TimerType::SenderResponse => 26,
            TimerType::SrcRecover => 880,
            TimerType::SrcTransition => 28,
            TimerType::StartAmsMargin => 200,
            TimerType::SwapSourceStart => 20,
            TimerType::TypeCSendSourceCap => 150,
            TimerType::TypeCSinkWaitCap => 600,
            TimerType::VconnSourceOn => 100,
            TimerType::VdmSenderResponse => 27,
            TimerType::BistContMode => 45,
            TimerType::ReadyPoll => 20,
            TimerType::MessageGuard => 5,
            TimerType::CommandDelayPd2 => 5,
            TimerType::CommandDelayPd3 => 18,
            TimerType::VbusDetect => 1000,
            TimerType::SrcStartupRecover => 200,
            TimerType::ChargerSettle => 30,
            TimerType::SinkDefaultSettle => 300,
            TimerType::SourceOffSettle => 600,
            TimerType::SinkOffSettle => 50,
            TimerType::SourceOnSettle => 200,
            TimerType::ErrorRecoverySettle => 23,
            TimerType::VdmReplyDelay => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use super::{Clock, Stopwatch, TimerType};

    struct ManualClock(Cell<u64>);

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }
    }

    #[test]
    fn stopwatch_expiry() {
        let clock = ManualClock(Cell::new(100));
        let mut stopwatch = Stopwatch::new(&clock);

        clock.0.set(125);
        assert_eq!(stopwatch.elapsed_ms(&clock), 25);
        assert!(!stopwatch.expired(&clock, TimerType::SenderResponse));

        clock.0.set(126);
        assert!(stopwatch.expired(&clock, TimerType::SenderResponse));

        stopwatch.arm(&clock);
        assert_eq!(stopwatch.elapsed_ms(&clock), 0);
    }
}
