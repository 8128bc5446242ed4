//! The device policy manager (DPM) takes the policy decisions of a device, and is informed about
//! status changes.
//!
//! For example, through the DPM, a source decides which requests it accepts, a sink chooses which
//! capability to request, and either side decides whether to accept role swaps.
//! All methods have defaults, such that a device only implements the decisions it cares about.
use heapless::Vec;

use crate::events::Command;
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::pdo::{FixedSupply, PowerDataObject};
use crate::protocol_layer::message::request::FixedVariableSupply;
use crate::{DataRole, PowerRole};

/// Outcome of the evaluation of a sink's request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestEvaluation {
    /// The request can be met.
    Accept,
    /// The request can never be met.
    Reject,
    /// The request can be met later.
    Wait,
}

/// An alternate mode, identified by its SVID and object position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModeTarget {
    /// Standard or vendor ID of the mode.
    pub svid: u16,
    /// Object position of the mode, starting at one.
    pub object_position: u8,
}

/// Steps of protocols whose power sequencing is left to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Deferred {
    /// A fast role swap step, as source going to sink.
    FastRoleSwapToSink(FastRoleSwapStep),
    /// A fast role swap step, as sink going to source.
    FastRoleSwapToSource(FastRoleSwapStep),
    /// A security request shall be sent.
    SecurityRequest,
    /// A security response was received.
    SecurityResponse,
    /// A firmware update request shall be sent.
    FirmwareUpdateRequest,
    /// A firmware update response was received.
    FirmwareUpdateResponse,
    /// An alert shall be sent.
    SendAlert,
}

/// Fast role swap steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum FastRoleSwapStep {
    Evaluate,
    Accept,
    TransitionToOff,
    AssertPull,
    WaitSourceOn,
    SourceOn,
}

/// Notifications from the policy engine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// The sink requested a capability that does not satisfy it.
    CapabilityMismatch,
    /// An explicit contract was established for the given object position.
    ContractEstablished(u8),
    /// The source did not respond to capability advertisements.
    SourceDisabled,
    /// Sink capabilities of the port partner were received.
    SinkCapabilities(Vec<u32, 7>),
    /// Source capabilities of the port partner were received.
    SourceCapabilities(Vec<u32, 7>),
    /// The data role changed.
    DataRoleChanged(DataRole),
    /// The power role changed.
    PowerRoleChanged(PowerRole),
    /// The VCONN source role changed.
    VconnSourceChanged(bool),
    /// A hard reset was received or sent.
    HardReset,
    /// A soft reset was received or sent.
    SoftReset,
    /// The port went through error recovery.
    ErrorRecovery,
    /// The port partner acknowledged Discover Identity.
    IdentityAcked {
        /// USB vendor ID of the partner.
        vendor_id: u16,
        /// Whether the partner supports modal operation.
        modal_supported: bool,
    },
    /// The port partner refused Discover Identity.
    IdentityNaked,
    /// The port partner reported its SVIDs.
    SvidsAcked(Vec<u16, 12>),
    /// The port partner refused Discover SVIDs.
    SvidsNaked,
    /// The port partner reported modes for an SVID.
    ModesAcked {
        /// The SVID.
        svid: u16,
        /// Mode VDOs.
        modes: Vec<u32, 6>,
    },
    /// The port partner refused Discover Modes.
    ModesNaked,
    /// An alternate mode was entered.
    ModeEntered(ModeTarget),
    /// Mode entry was refused.
    ModeEntryNaked(ModeTarget),
    /// An alternate mode was exited.
    ModeExited(ModeTarget),
    /// Mode exit was refused.
    ModeExitNaked(ModeTarget),
    /// The port partner requested attention.
    Attention {
        /// The SVID that requests attention.
        svid: u16,
        /// An optional VDO, for example a DisplayPort status.
        vdo: Option<u32>,
    },
    /// DisplayPort status from the port partner.
    DisplayPortStatusAcked(u32),
    /// DisplayPort status update was refused.
    DisplayPortStatusNaked,
    /// DisplayPort configuration was acknowledged.
    DisplayPortConfigureAcked,
    /// DisplayPort configuration was refused.
    DisplayPortConfigureNaked,
    /// An unstructured VDM was received.
    UnstructuredVdmReceived(Vec<u32, 7>),
    /// An unstructured VDM was sent.
    UnstructuredVdmSent,
    /// The port partner answered a query.
    Response(Message),
    /// The port partner did not answer a query.
    NoResponse(Command),
    /// The port partner does not support a message that was sent.
    NotSupportedReceived,
    /// An alert was received.
    Alert(u32),
    /// A protocol step is deferred to the device.
    Deferred(Deferred),
    /// The port entered BIST carrier mode.
    BistCarrierMode,
}

/// Trait for the device policy manager.
///
/// This entity takes the policy decisions and is informed about events.
pub trait DevicePolicyManager {
    /// Power data objects that are advertised as source.
    ///
    /// Defaults to a single vSafe5V object at 0.5 A.
    fn source_capabilities(&mut self) -> Vec<u32, 7> {
        let mut capabilities = Vec::new();
        let _ = capabilities.push(FixedSupply::new_dual_role_5v().0);
        capabilities
    }

    /// Power data objects that are reported as sink.
    ///
    /// Defaults to a single vSafe5V object at 0.5 A.
    fn sink_capabilities(&mut self) -> Vec<u32, 7> {
        self.source_capabilities()
    }

    /// Evaluate a request from the sink against the advertised capabilities.
    ///
    /// Defaults to accepting fixed supply requests that stay within the advertised current.
    fn evaluate_request(&mut self, request: FixedVariableSupply, source_capabilities: &[u32]) -> RequestEvaluation {
        let position = usize::from(request.object_position());
        let Some(raw) = position.checked_sub(1).and_then(|index| source_capabilities.get(index)) else {
            return RequestEvaluation::Reject;
        };

        match PowerDataObject::from(*raw) {
            PowerDataObject::FixedSupply(supply)
                if request.raw_operating_current() <= supply.raw_max_current() =>
            {
                RequestEvaluation::Accept
            }
            _ => RequestEvaluation::Reject,
        }
    }

    /// Choose a capability among the source's capabilities.
    ///
    /// Returns `None` if none is acceptable. Defaults to the vSafe5V object at its maximum current.
    fn select_capability(&mut self, source_capabilities: &[u32]) -> Option<FixedVariableSupply> {
        match PowerDataObject::from(*source_capabilities.first()?) {
            PowerDataObject::FixedSupply(supply) => Some(
                FixedVariableSupply::new(1, supply.raw_max_current(), supply.raw_max_current())
                    .with_usb_communications_capable(true),
            ),
            _ => None,
        }
    }

    /// Decide on a data role swap, given the present data role.
    fn evaluate_data_role_swap(&mut self, _data_role: DataRole) -> bool {
        true
    }

    /// Decide on a power role swap, given the present power role.
    fn evaluate_power_role_swap(&mut self, _power_role: PowerRole) -> bool {
        true
    }

    /// Decide on a VCONN swap, given whether the port is the VCONN source.
    fn evaluate_vconn_swap(&mut self, _vconn_source: bool) -> bool {
        true
    }

    /// Mode VDOs for an SVID. An empty list refuses discovery.
    fn modes(&mut self, _svid: u16) -> Vec<u32, 6> {
        Vec::new()
    }

    /// Decide on entering a mode, upon request of the port partner.
    fn evaluate_mode_entry(&mut self, _target: ModeTarget) -> bool {
        true
    }

    /// The mode to discover, enter or exit as DFP, among the partner's SVIDs.
    ///
    /// Defaults to the first mode of the first SVID.
    fn mode_target(&mut self, svids: &[u16]) -> Option<ModeTarget> {
        svids.first().map(|svid| ModeTarget {
            svid: *svid,
            object_position: 1,
        })
    }

    /// DisplayPort status VDO, as UFP. `None` refuses the status update.
    fn displayport_status(&mut self) -> Option<u32> {
        None
    }

    /// Apply a DisplayPort configuration, as UFP. Returns whether it was accepted.
    fn displayport_configure(&mut self, _configuration: u32) -> bool {
        false
    }

    /// DisplayPort configuration VDO to request, as DFP.
    fn displayport_configuration(&mut self) -> u32 {
        0
    }

    /// Content of an unstructured VDM to send, after its header.
    fn unstructured_vdm(&mut self) -> Vec<u32, 6> {
        Vec::new()
    }

    /// Supported country codes. An empty list answers with Not_Supported.
    fn country_codes(&mut self) -> Vec<[u8; 2], 12> {
        Vec::new()
    }

    /// The country to ask the port partner about.
    fn country(&mut self) -> [u8; 2] {
        *b"US"
    }

    /// PPS status, as source. `None` answers with Not_Supported.
    fn pps_status(&mut self) -> Option<[u8; 4]> {
        None
    }

    /// The battery to ask the port partner about.
    fn battery_reference(&mut self) -> u8 {
        0
    }

    /// Notification about an event.
    fn inform_event(&mut self, _event: Event) {}
}
