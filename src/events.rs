//! Pending events, shared between the PHY context and the policy engine.
//!
//! The PHY (or its interrupt handler) is the only writer of reset, attach and message markers.
//! The device policy manager is the only writer of commands. The policy engine is the only
//! context that clears them, and does so at defined consumption points.
use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};

const HARD_RESET: u8 = 1 << 0;
const SOFT_RESET: u8 = 1 << 1;
const UNPLUGGED: u8 = 1 << 2;
const REPLUG: u8 = 1 << 3;

/// Markers for received messages, as posted by the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
#[allow(missing_docs)]
pub enum MessageEvent {
    // Control messages.
    GotoMin,
    Accept,
    Reject,
    Ping,
    PsRdy,
    GetSourceCap,
    GetSinkCap,
    DrSwap,
    PrSwap,
    VconnSwap,
    Wait,
    NotSupported,
    GetSourceCapExtended,
    GetStatus,
    FrSwap,
    GetPpsStatus,
    GetCountryCodes,
    GetSinkCapExtended,
    GetSourceInfo,
    GetRevision,

    // Data messages.
    SourceCapabilities,
    Request,
    Bist,
    SinkCapabilities,
    BatteryStatus,
    Alert,
    GetCountryInfo,
    EnterUsb,
    SourceInfo,
    Revision,

    // Extended messages.
    SourceCapabilitiesExtended,
    Status,
    GetBatteryCap,
    GetBatteryStatus,
    BatteryCapabilities,
    GetManufacturerInfo,
    ManufacturerInfo,
    SecurityRequest,
    SecurityResponse,
    FirmwareUpdateRequest,
    FirmwareUpdateResponse,
    PpsStatus,
    CountryInfo,
    CountryCodes,
    SinkCapabilitiesExtended,

    // Vendor defined messages.
    DiscoverIdentity,
    DiscoverSvids,
    DiscoverModes,
    EnterMode,
    ExitMode,
    Attention,
    DisplayPortStatus,
    DisplayPortConfigure,
    UnstructuredVdm,

    /// A message with a reserved or unknown type.
    Reserved,
}

impl MessageEvent {
    const fn mask(self) -> (usize, u32) {
        let bit = self as u8;
        ((bit / 32) as usize, 1 << (bit % 32))
    }
}

/// Commands, posted by the device policy manager and honoured by the ready states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    /// Ask the sink for its capabilities.
    GetSinkCap,
    /// Ask the sink to reduce its consumption to the minimum.
    GotoMin,
    /// Advertise changed source capabilities.
    SourceCapChange,
    /// Request a new power level from the source.
    NewPowerSource,
    /// Ask the source for its capabilities.
    GetSourceCap,
    /// Start a power role swap.
    PrSwap,
    /// Start a data role swap.
    DrSwap,
    /// Start a VCONN swap.
    VconnSwap,
    /// Send an unstructured VDM.
    UvdmSend,
    /// Discover the partner's identity.
    DiscoverIdentity,
    /// Discover the partner's SVIDs.
    DiscoverSvids,
    /// Discover the partner's modes.
    DiscoverModes,
    /// Enter an alternate mode.
    EnterMode,
    /// Exit the entered alternate mode.
    ExitMode,
    /// Send or request a DisplayPort status update.
    DisplayPortStatus,
    /// Configure DisplayPort.
    DisplayPortConfigure,
    /// Send an attention VDM.
    Attention,
    /// Ask the partner for its status.
    GetStatus,
    /// Ask the partner for its battery capabilities.
    GetBatteryCap,
    /// Ask the partner for its battery status.
    GetBatteryStatus,
    /// Ask the partner for manufacturer information.
    GetManufacturerInfo,
    /// Ask the partner for its country codes.
    GetCountryCodes,
    /// Ask the partner for country information.
    GetCountryInfo,
    /// Ask the source for its extended capabilities.
    GetSourceCapExtended,
    /// Ask the source for its PPS status.
    GetPpsStatus,
    /// Send a security request.
    SecurityRequest,
    /// Send a firmware update request.
    FirmwareUpdateRequest,
    /// Start a fast role swap.
    FastRoleSwap,
    /// Send an alert.
    SendAlert,
}

impl Command {
    const fn mask(self) -> u32 {
        1 << (self as u8)
    }
}

/// A copy of all pending events at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingEvents {
    /// A hard reset was received.
    pub hard_reset: bool,
    /// A soft reset was received.
    pub soft_reset: bool,
    /// The port partner is detached.
    pub unplugged: bool,
    /// The port partner was attached again after a detach.
    pub replug: bool,
    messages: [u32; 2],
    commands: u32,
}

impl PendingEvents {
    /// Whether a reset or replug forces the engine to re-evaluate its state.
    pub fn needs_reevaluation(&self) -> bool {
        self.hard_reset || self.soft_reset || self.replug
    }

    /// Whether a soft or hard reset is pending.
    pub fn reset_pending(&self) -> bool {
        self.hard_reset || self.soft_reset
    }

    /// Whether the given message marker is set.
    pub fn message(&self, event: MessageEvent) -> bool {
        let (word, bit) = event.mask();
        self.messages[word] & bit != 0
    }

    /// Whether any command is pending.
    pub fn any_command(&self) -> bool {
        self.commands != 0
    }

    /// Whether the given command is pending.
    pub fn command(&self, command: Command) -> bool {
        self.commands & command.mask() != 0
    }
}

/// Flags that are consumed by the policy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    /// A received hard reset.
    HardReset,
    /// A received soft reset.
    SoftReset,
    /// A replug.
    Replug,
}

/// Lock-free set of pending events.
///
/// It can live in a `static`, such that an interrupt handler can signal events while the
/// policy engine runs.
#[derive(Debug, Default)]
pub struct EventLatch {
    flags: AtomicU8,
    messages: [AtomicU32; 2],
    commands: AtomicU32,
}

impl EventLatch {
    /// Create an empty latch.
    pub const fn new() -> Self {
        Self {
            flags: AtomicU8::new(0),
            messages: [AtomicU32::new(0), AtomicU32::new(0)],
            commands: AtomicU32::new(0),
        }
    }

    /// A hard reset was received.
    pub fn signal_hard_reset(&self) {
        self.flags.fetch_or(HARD_RESET, Ordering::Release);
    }

    /// A soft reset was received.
    pub fn signal_soft_reset(&self) {
        self.flags.fetch_or(SOFT_RESET, Ordering::Release);
    }

    /// The port partner was detached.
    pub fn signal_detach(&self) {
        self.flags.fetch_or(UNPLUGGED, Ordering::Release);
    }

    /// The port partner was attached again.
    pub fn signal_attach(&self) {
        let previous = self.flags.fetch_and(!UNPLUGGED, Ordering::AcqRel);

        if previous & UNPLUGGED != 0 {
            self.flags.fetch_or(REPLUG, Ordering::Release);
        }
    }

    /// Mark a received message.
    pub fn post_message(&self, event: MessageEvent) {
        let (word, bit) = event.mask();
        self.messages[word].fetch_or(bit, Ordering::Release);
    }

    /// Post a command.
    pub fn post_command(&self, command: Command) {
        self.commands.fetch_or(command.mask(), Ordering::Release);
    }

    /// Take a copy of all pending events.
    pub fn pending(&self) -> PendingEvents {
        let flags = self.flags.load(Ordering::Acquire);

        PendingEvents {
            hard_reset: flags & HARD_RESET != 0,
            soft_reset: flags & SOFT_RESET != 0,
            unplugged: flags & UNPLUGGED != 0,
            replug: flags & REPLUG != 0,
            messages: [
                self.messages[0].load(Ordering::Acquire),
                self.messages[1].load(Ordering::Acquire),
            ],
            commands: self.commands.load(Ordering::Acquire),
        }
    }

    /// Clear a consumed flag.
    pub fn clear(&self, flag: Flag) {
        let bit = match flag {
            Flag::HardReset => HARD_RESET,
            Flag::SoftReset => SOFT_RESET,
            Flag::Replug => REPLUG,
        };

        self.flags.fetch_and(!bit, Ordering::AcqRel);
    }

    /// Consume a message marker, returning whether it was set.
    pub fn take_message(&self, event: MessageEvent) -> bool {
        let (word, bit) = event.mask();
        self.messages[word].fetch_and(!bit, Ordering::AcqRel) & bit != 0
    }

    /// Drop all message markers.
    pub fn clear_messages(&self) {
        self.messages[0].store(0, Ordering::Release);
        self.messages[1].store(0, Ordering::Release);
    }

    /// Consume a command, returning whether it was pending.
    pub fn take_command(&self, command: Command) -> bool {
        self.commands.fetch_and(!command.mask(), Ordering::AcqRel) & command.mask() != 0
    }

    /// Drop the commands that were pending in a snapshot.
    ///
    /// Commands posted after the snapshot was taken stay pending.
    pub fn clear_commands(&self, snapshot: &PendingEvents) {
        self.commands.fetch_and(!snapshot.commands, Ordering::AcqRel);
    }
}
