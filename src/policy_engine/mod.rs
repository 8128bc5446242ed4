//! The policy engine, which drives a port through source, sink, swap and alternate mode states.
//!
//! The engine is run to stability: every call to [`PolicyEngine::run`] executes state handlers
//! until one of them parks, by returning its own state. Handlers never block indefinitely; they
//! poll pending events and their own stopwatch against bounded protocol timers.
use heapless::Vec;

use crate::counters::{Counter, CounterType};
use crate::device_policy_manager::{DevicePolicyManager, Event, ModeTarget, RequestEvaluation};
use crate::events::{Command, EventLatch, Flag, MessageEvent};
use crate::protocol_layer::ProtocolLayer;
use crate::protocol_layer::message::extended::Identity;
use crate::protocol_layer::message::header::{
    ControlMessageType, DataMessageType, ExtendedMessageType, Header, SpecificationRevision,
};
use crate::protocol_layer::message::pdo::Kind;
use crate::protocol_layer::message::request::FixedVariableSupply;
use crate::protocol_layer::message::vendor_defined::{DISPLAYPORT_SID, VdmCommand};
use crate::protocol_layer::message::Message;
use crate::timers::{Clock, Stopwatch, TimerType};
use crate::{CcControl, DataRole, PortController, PowerRole, RpLevel};

mod extended;
mod sink;
mod source;
mod swap;
mod vdm;

#[cfg(test)]
mod tests;

/// Policy engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum State {
    /// Resolves to the reset handling or startup state of the present power role.
    Reevaluate,

    // Source.
    SrcStartup,
    SrcDiscovery,
    SrcSendCapabilities,
    SrcNegotiateCapability,
    SrcTransitionSupply,
    SrcReady,
    SrcDisabled,
    SrcCapabilityResponse,
    SrcHardReset,
    SrcHardResetReceived,
    SrcTransitionToDefault,
    SrcGiveSourceCap,
    SrcGetSinkCap,
    SrcWaitNewCapabilities,
    SrcSendSoftReset,
    SrcSoftReset,
    SrcSendNotSupported,
    SrcNotSupportedReceived,
    SrcChunkReceived,
    SrcSinkAlertReceived,
    SrcSendSourceAlert,
    SrcGiveSourceCapExt,
    SrcGiveSourceInfo,
    SrcGivePpsStatus,

    // Sink.
    SnkStartup,
    SnkDiscovery,
    SnkWaitForCapabilities,
    SnkEvaluateCapability,
    SnkSelectCapability,
    SnkTransitionSink,
    SnkReady,
    SnkHardReset,
    SnkTransitionToDefault,
    SnkGiveSinkCap,
    SnkGetSourceCap,
    SnkSendSoftReset,
    SnkSoftReset,
    SnkSendNotSupported,
    SnkNotSupportedReceived,
    SnkChunkReceived,
    SnkSourceAlertReceived,
    SnkSendSinkAlert,
    SnkGetSourceCapExt,
    SnkGetPpsStatus,
    SnkGetSourceStatus,

    // Dual-role specific.
    DrSrcGetSourceCap,
    DrSrcGiveSinkCap,
    DrSnkGetSinkCap,
    DrSnkGiveSourceCap,
    DrSnkGiveSourceInfo,
    DrSendReject,

    // Extended messages, for either power role.
    GiveStatus,
    GiveRevision,
    GiveBatteryCap,
    GiveBatteryStatus,
    GiveManufacturerInfo,
    GiveCountryCodes,
    GiveCountryInfo,
    GetStatus,
    GetBatteryCap,
    GetBatteryStatus,
    GetManufacturerInfo,
    GetCountryCodes,
    GetCountryInfo,
    SendSecurityRequest,
    SecurityResponseReceived,
    SendFirmwareUpdateRequest,
    FirmwareUpdateResponseReceived,
    BistCarrierMode,

    // Data role swap.
    DrsEvaluatePort,
    DrsEvaluateSendPort,
    DrsDfpUfpEvaluateSwap,
    DrsDfpUfpAcceptSwap,
    DrsDfpUfpChangeToUfp,
    DrsDfpUfpSendSwap,
    DrsDfpUfpRejectSwap,
    DrsUfpDfpEvaluateSwap,
    DrsUfpDfpAcceptSwap,
    DrsUfpDfpChangeToDfp,
    DrsUfpDfpSendSwap,
    DrsUfpDfpRejectSwap,

    // Power role swap.
    PrsSrcSnkEvaluateSwap,
    PrsSrcSnkAcceptSwap,
    PrsSrcSnkTransitionToOff,
    PrsSrcSnkAssertRd,
    PrsSrcSnkWaitSourceOn,
    PrsSrcSnkRejectSwap,
    PrsSrcSnkSendSwap,
    PrsSnkSrcEvaluateSwap,
    PrsSnkSrcAcceptSwap,
    PrsSnkSrcTransitionToOff,
    PrsSnkSrcAssertRp,
    PrsSnkSrcSourceOn,
    PrsSnkSrcRejectSwap,
    PrsSnkSrcSendSwap,

    // VCONN swap.
    VcsEvaluateSwap,
    VcsAcceptSwap,
    VcsRejectSwap,
    VcsSendSwap,
    VcsWaitForVconn,
    VcsTurnOffVconn,
    VcsTurnOnVconn,
    VcsSendPsRdy,

    // Fast role swap.
    FrsSrcSnkEvaluateSwap,
    FrsSrcSnkAcceptSwap,
    FrsSrcSnkTransitionToOff,
    FrsSrcSnkAssertRd,
    FrsSrcSnkWaitSourceOn,
    FrsSnkSrcStartAms,
    FrsSnkSrcSendSwap,
    FrsSnkSrcTransitionToOff,
    FrsSnkSrcVbusApplied,
    FrsSnkSrcAssertRp,
    FrsSnkSrcSourceOn,

    // Structured VDMs as responder.
    UfpVdmGetIdentity,
    UfpVdmSendIdentity,
    UfpVdmGetIdentityNak,
    UfpVdmGetSvids,
    UfpVdmSendSvids,
    UfpVdmGetSvidsNak,
    UfpVdmGetModes,
    UfpVdmSendModes,
    UfpVdmGetModesNak,
    UfpVdmEvaluateModeEntry,
    UfpVdmModeEntryAck,
    UfpVdmModeEntryNak,
    UfpVdmModeExit,
    UfpVdmModeExitAck,
    UfpVdmModeExitNak,
    UfpVdmAttentionRequest,
    UfpVdmEvaluateStatus,
    UfpVdmStatusAck,
    UfpVdmStatusNak,
    UfpVdmEvaluateConfigure,
    UfpVdmConfigureAck,
    UfpVdmConfigureNak,

    // Structured VDMs as initiator.
    DfpVdmIdentityRequest,
    DfpVdmIdentityAcked,
    DfpVdmIdentityNaked,
    DfpVdmSvidsRequest,
    DfpVdmSvidsAcked,
    DfpVdmSvidsNaked,
    DfpVdmModesRequest,
    DfpVdmModesAcked,
    DfpVdmModesNaked,
    DfpVdmModeEntryRequest,
    DfpVdmModeEntryAcked,
    DfpVdmModeEntryNaked,
    DfpVdmModeExitRequest,
    DfpVdmModeExitAcked,
    DfpVdmModeExitNaked,
    DfpVdmAttentionRequest,
    DfpVdmStatusUpdate,
    DfpVdmStatusUpdateAcked,
    DfpVdmStatusUpdateNaked,
    DfpVdmDisplayPortConfigure,
    DfpVdmDisplayPortConfigureAcked,
    DfpVdmDisplayPortConfigureNaked,
    DfpVdmEvaluate,

    // Unstructured VDMs.
    DfpUvdmSendMessage,
    DfpUvdmReceiveMessage,

    ErrorRecovery,
}

/// Policy engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// nCapsCount.
    pub caps_count: u8,
    /// nHardResetCount.
    pub hard_reset_count: u8,
    /// Hard resets that are tolerated during swaps.
    pub swap_hard_reset_count: u8,
    /// nDiscoverIdentityCount.
    pub discover_identity_count: u8,
    /// Request retransmissions by a sink, before it resorts to a soft reset.
    pub select_capability_retries: u8,
    /// Identity that is reported in discovery and extended messages.
    pub identity: Identity,
    /// SVIDs that are reported and may be entered.
    pub svids: Vec<u16, 4>,
    /// Handle received fast role swap requests, instead of answering Not_Supported.
    pub fast_role_swap: bool,
    /// The power role before the first startup.
    pub initial_power_role: PowerRole,
}

impl Default for Config {
    fn default() -> Self {
        let mut svids = Vec::new();
        let _ = svids.push(DISPLAYPORT_SID);

        Self {
            caps_count: CounterType::Caps.default_max(),
            hard_reset_count: CounterType::HardReset.default_max(),
            swap_hard_reset_count: CounterType::SwapHardReset.default_max(),
            discover_identity_count: CounterType::DiscoverIdentity.default_max(),
            select_capability_retries: CounterType::SelectRetry.default_max(),
            identity: Identity {
                vendor_id: 0x1209,
                product_id: 0x0001,
                bcd_device: 0x0100,
            },
            svids,
            fast_role_swap: false,
            initial_power_role: PowerRole::Sink,
        }
    }
}

/// The negotiated power contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Contract {
    /// Object position of the supply in use, zero without an explicit contract.
    pub selected_object_position: u8,
    /// Kind of the supply in use.
    pub selected_kind: Option<Kind>,
    /// Object position of the latest request.
    pub requested_object_position: u8,
    /// Kind of the requested supply.
    pub requested_kind: Option<Kind>,
    /// The latest request data object.
    pub request: FixedVariableSupply,
    /// The latest request did not satisfy the sink.
    pub capability_mismatch: bool,
    /// An explicit contract exists.
    pub explicit: bool,
}

/// State of alternate mode discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VdmState {
    /// SVIDs that the port partner reported.
    pub svids: Vec<u16, 12>,
    /// Modes that the port partner reported for the latest discovered SVID.
    pub modes: Vec<u32, 6>,
    /// The mode that is entered, if any.
    pub entered_mode: Option<ModeTarget>,
    /// An unsolicited VDM was answered as UFP, such that commands wait for tStartAmsMargin.
    pub got_ufp_vdm: bool,
    request: Option<VdmRequest>,
}

/// A structured VDM request that awaits its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct VdmRequest {
    command: VdmCommand,
    /// The request state, which is entered again to resend.
    origin: State,
    timer: Stopwatch,
    attempts: u8,
}

impl VdmState {
    /// Whether an alternate mode is entered.
    pub fn is_mode_entered(&self) -> bool {
        self.entered_mode.is_some()
    }
}

/// Outcome of waiting for a single message.
enum Awaited {
    Received,
    Expired,
    Interrupted(State),
}

/// Routes of a ready state.
struct ReadyRoutes {
    /// Checked first on PD 3.x contracts.
    pd3: &'static [(MessageEvent, State)],
    /// Answered with Not_Supported on PD 3.x contracts, and ignored otherwise.
    not_supported: &'static [MessageEvent],
    common: &'static [(MessageEvent, State)],
    commands: &'static [(Command, State)],
}

/// Implementation of the policy engine for a dual-role port.
#[derive(Debug)]
pub struct PolicyEngine<PROTOCOL: ProtocolLayer, PORT: PortController, DPM: DevicePolicyManager, CLOCK: Clock> {
    protocol_layer: PROTOCOL,
    port_controller: PORT,
    device_policy_manager: DPM,
    clock: CLOCK,
    config: Config,

    state: State,
    power_role: PowerRole,
    data_role: DataRole,
    vconn_source: bool,
    spec_revision: SpecificationRevision,

    caps_counter: Counter,
    select_retry_counter: Counter,
    hard_reset_counter: Counter,
    swap_hard_reset_counter: Counter,
    discover_identity_counter: Counter,

    contract: Contract,
    /// The latest evaluation of a request, as answered by the capability response.
    last_evaluation: RequestEvaluation,
    vdm: VdmState,
    timer: Stopwatch,

    /// Capabilities of the port partner.
    partner_capabilities: Vec<u32, 7>,
    partner_sink_capabilities_known: bool,
    /// The port partner responded to PD communication.
    pd_support: bool,
    /// A hard reset was sent, and the source shall wait for recovery before startup.
    tx_hard_reset: bool,
    modal_operation: bool,
    goto_min: bool,
    /// Rp was lowered to SinkTxNG in the ready state.
    sink_tx_ng: bool,
}

impl<PROTOCOL: ProtocolLayer, PORT: PortController, DPM: DevicePolicyManager, CLOCK: Clock>
    PolicyEngine<PROTOCOL, PORT, DPM, CLOCK>
{
    /// Create a new policy engine.
    ///
    /// The first run resolves to the startup state of the configured power role.
    pub fn new(
        protocol_layer: PROTOCOL,
        port_controller: PORT,
        device_policy_manager: DPM,
        clock: CLOCK,
        config: Config,
    ) -> Self {
        let timer = Stopwatch::new(&clock);
        let power_role = config.initial_power_role;

        Self {
            protocol_layer,
            port_controller,
            device_policy_manager,
            clock,
            caps_counter: Counter::new_with_max(config.caps_count),
            select_retry_counter: Counter::new_with_max(config.select_capability_retries),
            hard_reset_counter: Counter::new_with_max(config.hard_reset_count),
            swap_hard_reset_counter: Counter::new_with_max(config.swap_hard_reset_count),
            discover_identity_counter: Counter::new_with_max(config.discover_identity_count),
            config,
            state: State::Reevaluate,
            power_role,
            data_role: match power_role {
                PowerRole::Source => DataRole::Dfp,
                PowerRole::Sink => DataRole::Ufp,
            },
            vconn_source: false,
            spec_revision: SpecificationRevision::R3_X,
            contract: Contract::default(),
            last_evaluation: RequestEvaluation::Accept,
            vdm: VdmState::default(),
            timer,
            partner_capabilities: Vec::new(),
            partner_sink_capabilities_known: false,
            pd_support: false,
            tx_hard_reset: false,
            modal_operation: false,
            goto_min: false,
            sink_tx_ng: false,
        }
    }

    /// The present state.
    pub fn state(&self) -> State {
        self.state
    }

    /// The present power role.
    pub fn power_role(&self) -> PowerRole {
        self.power_role
    }

    /// The present data role.
    pub fn data_role(&self) -> DataRole {
        self.data_role
    }

    /// Whether the port sources VCONN.
    pub fn vconn_source(&self) -> bool {
        self.vconn_source
    }

    /// The negotiated specification revision.
    pub fn spec_revision(&self) -> SpecificationRevision {
        self.spec_revision
    }

    /// The negotiated contract.
    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    /// Alternate mode discovery state.
    pub fn vdm_state(&self) -> &VdmState {
        &self.vdm
    }

    /// The device policy manager.
    pub fn device_policy_manager(&mut self) -> &mut DPM {
        &mut self.device_policy_manager
    }

    /// Post a command, which is honoured once the engine is ready.
    pub fn post_command(&self, command: Command) {
        self.events().post_command(command);
    }

    /// Run the state machine until it parks.
    ///
    /// Returns immediately while the port partner is detached.
    pub fn run(&mut self) {
        loop {
            let pending = self.events().pending();

            if pending.unplugged {
                trace!("Detached, stop in {:?}", self.state);
                break;
            }

            if pending.needs_reevaluation() {
                self.state = State::Reevaluate;
            }

            let entered = self.state;
            trace!("Enter {:?}", entered);
            let next = Self::handler(entered)(self);

            if next == entered {
                break;
            }

            debug!("{:?} -> {:?}", entered, next);
            self.state = next;
        }
    }

    /// The handler of a state.
    fn handler(state: State) -> fn(&mut Self) -> State {
        match state {
            State::Reevaluate => Self::reevaluate,

            State::SrcStartup => Self::src_startup,
            State::SrcDiscovery => Self::src_discovery,
            State::SrcSendCapabilities => Self::src_send_capabilities,
            State::SrcNegotiateCapability => Self::src_negotiate_capability,
            State::SrcTransitionSupply => Self::src_transition_supply,
            State::SrcReady => Self::src_ready,
            State::SrcDisabled => Self::src_disabled,
            State::SrcCapabilityResponse => Self::src_capability_response,
            State::SrcHardReset => Self::src_hard_reset,
            State::SrcHardResetReceived => Self::src_hard_reset_received,
            State::SrcTransitionToDefault => Self::src_transition_to_default,
            State::SrcGiveSourceCap => Self::src_give_source_cap,
            State::SrcGetSinkCap => Self::src_get_sink_cap,
            State::SrcWaitNewCapabilities => Self::src_wait_new_capabilities,
            State::SrcSendSoftReset => Self::src_send_soft_reset,
            State::SrcSoftReset => Self::src_soft_reset,
            State::SrcSendNotSupported | State::SnkSendNotSupported => Self::send_not_supported,
            State::SrcNotSupportedReceived | State::SnkNotSupportedReceived => Self::not_supported_received,
            State::SrcChunkReceived | State::SnkChunkReceived => Self::chunk_received,
            State::SrcSinkAlertReceived => Self::src_sink_alert_received,
            State::SrcSendSourceAlert | State::SnkSendSinkAlert => Self::send_alert,
            State::SrcGiveSourceCapExt => Self::src_give_source_cap_ext,
            State::SrcGiveSourceInfo | State::DrSnkGiveSourceInfo => Self::give_source_info,
            State::SrcGivePpsStatus => Self::src_give_pps_status,

            State::SnkStartup => Self::snk_startup,
            State::SnkDiscovery => Self::snk_discovery,
            State::SnkWaitForCapabilities => Self::snk_wait_for_capabilities,
            State::SnkEvaluateCapability => Self::snk_evaluate_capability,
            State::SnkSelectCapability => Self::snk_select_capability,
            State::SnkTransitionSink => Self::snk_transition_sink,
            State::SnkReady => Self::snk_ready,
            State::SnkHardReset => Self::snk_hard_reset,
            State::SnkTransitionToDefault => Self::snk_transition_to_default,
            State::SnkGiveSinkCap => Self::snk_give_sink_cap,
            State::SnkGetSourceCap => Self::snk_get_source_cap,
            State::SnkSendSoftReset => Self::snk_send_soft_reset,
            State::SnkSoftReset => Self::snk_soft_reset,
            State::SnkSourceAlertReceived => Self::snk_source_alert_received,
            State::SnkGetSourceCapExt => Self::snk_get_source_cap_ext,
            State::SnkGetPpsStatus => Self::snk_get_pps_status,
            State::SnkGetSourceStatus => Self::get_status,

            State::DrSrcGetSourceCap => Self::dr_src_get_source_cap,
            State::DrSrcGiveSinkCap => Self::dr_src_give_sink_cap,
            State::DrSnkGetSinkCap => Self::dr_snk_get_sink_cap,
            State::DrSnkGiveSourceCap => Self::dr_snk_give_source_cap,
            State::DrSendReject => Self::dr_send_reject,

            State::GiveStatus => Self::give_status,
            State::GiveRevision => Self::give_revision,
            State::GiveBatteryCap => Self::give_battery_cap,
            State::GiveBatteryStatus => Self::give_battery_status,
            State::GiveManufacturerInfo => Self::give_manufacturer_info,
            State::GiveCountryCodes => Self::give_country_codes,
            State::GiveCountryInfo => Self::give_country_info,
            State::GetStatus => Self::get_status,
            State::GetBatteryCap => Self::get_battery_cap,
            State::GetBatteryStatus => Self::get_battery_status,
            State::GetManufacturerInfo => Self::get_manufacturer_info,
            State::GetCountryCodes => Self::get_country_codes,
            State::GetCountryInfo => Self::get_country_info,
            State::SendSecurityRequest => Self::send_security_request,
            State::SecurityResponseReceived => Self::security_response_received,
            State::SendFirmwareUpdateRequest => Self::send_firmware_update_request,
            State::FirmwareUpdateResponseReceived => Self::firmware_update_response_received,
            State::BistCarrierMode => Self::bist_carrier_mode,

            State::DrsEvaluatePort => Self::drs_evaluate_port,
            State::DrsEvaluateSendPort => Self::drs_evaluate_send_port,
            State::DrsDfpUfpEvaluateSwap | State::DrsUfpDfpEvaluateSwap => Self::drs_evaluate_swap,
            State::DrsDfpUfpAcceptSwap | State::DrsUfpDfpAcceptSwap => Self::drs_accept_swap,
            State::DrsDfpUfpChangeToUfp => Self::drs_dfp_ufp_change_to_ufp,
            State::DrsUfpDfpChangeToDfp => Self::drs_ufp_dfp_change_to_dfp,
            State::DrsDfpUfpSendSwap | State::DrsUfpDfpSendSwap => Self::drs_send_swap,
            State::DrsDfpUfpRejectSwap | State::DrsUfpDfpRejectSwap => Self::reject_swap,

            State::PrsSrcSnkEvaluateSwap | State::PrsSnkSrcEvaluateSwap => Self::prs_evaluate_swap,
            State::PrsSrcSnkAcceptSwap => Self::prs_src_snk_accept_swap,
            State::PrsSrcSnkTransitionToOff => Self::prs_src_snk_transition_to_off,
            State::PrsSrcSnkAssertRd => Self::prs_src_snk_assert_rd,
            State::PrsSrcSnkWaitSourceOn => Self::prs_src_snk_wait_source_on,
            State::PrsSrcSnkSendSwap => Self::prs_src_snk_send_swap,
            State::PrsSnkSrcAcceptSwap => Self::prs_snk_src_accept_swap,
            State::PrsSnkSrcTransitionToOff => Self::prs_snk_src_transition_to_off,
            State::PrsSnkSrcAssertRp => Self::prs_snk_src_assert_rp,
            State::PrsSnkSrcSourceOn => Self::prs_snk_src_source_on,
            State::PrsSnkSrcSendSwap => Self::prs_snk_src_send_swap,
            State::PrsSrcSnkRejectSwap | State::PrsSnkSrcRejectSwap => Self::reject_swap,

            State::VcsEvaluateSwap => Self::vcs_evaluate_swap,
            State::VcsAcceptSwap => Self::vcs_accept_swap,
            State::VcsRejectSwap => Self::reject_swap,
            State::VcsSendSwap => Self::vcs_send_swap,
            State::VcsWaitForVconn => Self::vcs_wait_for_vconn,
            State::VcsTurnOffVconn => Self::vcs_turn_off_vconn,
            State::VcsTurnOnVconn => Self::vcs_turn_on_vconn,
            State::VcsSendPsRdy => Self::vcs_send_ps_rdy,

            State::FrsSrcSnkEvaluateSwap
            | State::FrsSrcSnkAcceptSwap
            | State::FrsSrcSnkTransitionToOff
            | State::FrsSrcSnkAssertRd
            | State::FrsSrcSnkWaitSourceOn
            | State::FrsSnkSrcStartAms
            | State::FrsSnkSrcSendSwap
            | State::FrsSnkSrcTransitionToOff
            | State::FrsSnkSrcVbusApplied
            | State::FrsSnkSrcAssertRp
            | State::FrsSnkSrcSourceOn => Self::fast_role_swap,

            State::UfpVdmGetIdentity => Self::ufp_vdm_get_identity,
            State::UfpVdmSendIdentity => Self::ufp_vdm_send_identity,
            State::UfpVdmGetSvids => Self::ufp_vdm_get_svids,
            State::UfpVdmSendSvids => Self::ufp_vdm_send_svids,
            State::UfpVdmGetModes => Self::ufp_vdm_get_modes,
            State::UfpVdmSendModes => Self::ufp_vdm_send_modes,
            State::UfpVdmEvaluateModeEntry => Self::ufp_vdm_evaluate_mode_entry,
            State::UfpVdmModeEntryAck => Self::ufp_vdm_mode_entry_ack,
            State::UfpVdmModeExit => Self::ufp_vdm_mode_exit,
            State::UfpVdmModeExitAck => Self::ufp_vdm_mode_exit_ack,
            State::UfpVdmModeExitNak => Self::ufp_vdm_mode_exit_nak,
            State::UfpVdmAttentionRequest => Self::ufp_vdm_attention_request,
            State::UfpVdmEvaluateStatus => Self::ufp_vdm_evaluate_status,
            State::UfpVdmStatusAck => Self::ufp_vdm_status_ack,
            State::UfpVdmEvaluateConfigure => Self::ufp_vdm_evaluate_configure,
            State::UfpVdmConfigureAck => Self::ufp_vdm_configure_ack,
            State::UfpVdmGetIdentityNak
            | State::UfpVdmGetSvidsNak
            | State::UfpVdmGetModesNak
            | State::UfpVdmModeEntryNak
            | State::UfpVdmStatusNak
            | State::UfpVdmConfigureNak => Self::ufp_vdm_nak,

            State::DfpVdmIdentityRequest => Self::dfp_vdm_identity_request,
            State::DfpVdmIdentityAcked => Self::dfp_vdm_identity_acked,
            State::DfpVdmSvidsRequest => Self::dfp_vdm_svids_request,
            State::DfpVdmSvidsAcked => Self::dfp_vdm_svids_acked,
            State::DfpVdmModesRequest => Self::dfp_vdm_modes_request,
            State::DfpVdmModesAcked => Self::dfp_vdm_modes_acked,
            State::DfpVdmModeEntryRequest => Self::dfp_vdm_mode_entry_request,
            State::DfpVdmModeEntryAcked => Self::dfp_vdm_mode_entry_acked,
            State::DfpVdmModeEntryNaked => Self::dfp_vdm_mode_entry_naked,
            State::DfpVdmModeExitRequest => Self::dfp_vdm_mode_exit_request,
            State::DfpVdmModeExitAcked | State::DfpVdmModeExitNaked => Self::dfp_vdm_mode_exit_done,
            State::DfpVdmAttentionRequest => Self::dfp_vdm_attention_request,
            State::DfpVdmStatusUpdate => Self::dfp_vdm_status_update,
            State::DfpVdmStatusUpdateAcked => Self::dfp_vdm_status_update_acked,
            State::DfpVdmDisplayPortConfigure => Self::dfp_vdm_displayport_configure,
            State::DfpVdmIdentityNaked
            | State::DfpVdmSvidsNaked
            | State::DfpVdmModesNaked
            | State::DfpVdmStatusUpdateNaked
            | State::DfpVdmDisplayPortConfigureAcked
            | State::DfpVdmDisplayPortConfigureNaked => Self::dfp_vdm_inform,
            State::DfpVdmEvaluate => Self::dfp_vdm_evaluate,
            State::DfpUvdmSendMessage => Self::dfp_uvdm_send_message,
            State::DfpUvdmReceiveMessage => Self::dfp_uvdm_receive_message,

            State::ErrorRecovery => Self::error_recovery,
        }
    }

    /// Resolve pending resets and replugs, or start the present power role.
    fn reevaluate(&mut self) -> State {
        let pending = self.events().pending();

        if pending.hard_reset {
            warn!("Hard reset received");
            self.events().clear(Flag::HardReset);
            self.events().clear(Flag::SoftReset);
            self.device_policy_manager.inform_event(Event::HardReset);

            match self.power_role {
                PowerRole::Source => State::SrcHardResetReceived,
                PowerRole::Sink => State::SnkTransitionToDefault,
            }
        } else if pending.soft_reset {
            warn!("Soft reset received");
            self.events().clear(Flag::SoftReset);
            self.device_policy_manager.inform_event(Event::SoftReset);

            match self.power_role {
                PowerRole::Source => State::SrcSoftReset,
                PowerRole::Sink => State::SnkSoftReset,
            }
        } else {
            if pending.replug {
                info!("Attached again");
                self.events().clear(Flag::Replug);
            }

            self.startup_state()
        }
    }

    /// Error recovery: detach electrically, settle, and restart as sink.
    fn error_recovery(&mut self) -> State {
        error!("Error recovery");
        self.port_controller.set_cc_control(CcControl::Off);
        self.port_controller.set_rp_control(RpLevel::Rp0);
        self.port_controller.set_vconn_source(false);
        self.vconn_source = false;

        self.clock.delay_ms(TimerType::ErrorRecoverySettle.duration_ms());

        self.power_role = PowerRole::Sink;
        self.data_role = DataRole::Ufp;
        self.port_controller.set_power_role(PowerRole::Sink);
        self.port_controller.set_data_role(DataRole::Ufp);
        self.port_controller.set_dual_role();

        self.init_counters();
        self.hard_reset_counter.reset();
        self.swap_hard_reset_counter.reset();
        self.init_policy();
        self.device_policy_manager.inform_event(Event::ErrorRecovery);

        State::SnkStartup
    }

    fn events(&self) -> &EventLatch {
        self.protocol_layer.events()
    }

    /// Interruption of a waiting state.
    ///
    /// A pending reset forces reevaluation, a detach aborts the traversal in the present state.
    fn interrupted(&self) -> Option<State> {
        let pending = self.events().pending();

        if pending.reset_pending() {
            Some(State::Reevaluate)
        } else if pending.unplugged {
            Some(self.state)
        } else {
            None
        }
    }

    fn arm(&mut self) {
        self.timer.arm(&self.clock);
    }

    fn elapsed_ms(&self) -> u64 {
        self.timer.elapsed_ms(&self.clock)
    }

    fn expired(&self, timer_type: TimerType) -> bool {
        self.timer.expired(&self.clock, timer_type)
    }

    /// Wait for a fixed time, unless interrupted.
    fn settle(&mut self, timer_type: TimerType) -> Option<State> {
        self.arm();

        while !self.expired(timer_type) {
            if let Some(state) = self.interrupted() {
                return Some(state);
            }
        }

        None
    }

    /// Consume the first received message of an ordered list, and return its state.
    fn check_messages(&self, checks: &[(MessageEvent, State)]) -> Option<State> {
        if self.elapsed_ms() <= TimerType::MessageGuard.duration_ms() {
            return None;
        }

        checks
            .iter()
            .find_map(|&(event, state)| self.protocol_layer.get_status(event).then_some(state))
    }

    /// Wait for one of the given messages, until the timer expires.
    fn wait_for(&mut self, checks: &[(MessageEvent, State)], timer_type: TimerType, on_timeout: State) -> State {
        self.arm();

        loop {
            if let Some(state) = self.interrupted() {
                return state;
            }

            if let Some(state) = self.check_messages(checks) {
                return state;
            }

            if self.expired(timer_type) {
                trace!("{:?} expired in {:?}", timer_type, self.state);
                return on_timeout;
            }
        }
    }

    /// Wait for a single message, until the timer expires.
    fn await_message(&mut self, event: MessageEvent, timer_type: TimerType) -> Awaited {
        self.arm();

        loop {
            if let Some(state) = self.interrupted() {
                return Awaited::Interrupted(state);
            }

            if self.elapsed_ms() > TimerType::MessageGuard.duration_ms() && self.protocol_layer.get_status(event) {
                return Awaited::Received;
            }

            if self.expired(timer_type) {
                trace!("{:?} expired in {:?}", timer_type, self.state);
                return Awaited::Expired;
            }
        }
    }

    fn header_template(&self) -> Header {
        Header::new_template(self.data_role, self.power_role, self.spec_revision)
    }

    fn send(&mut self, message: Message) -> bool {
        let sent = self.protocol_layer.send_message(&message);

        if !sent {
            warn!("Failed to send {:?} in {:?}", message.header.message_type(), self.state);
        }

        sent
    }

    fn send_control(&mut self, message_type: ControlMessageType) -> bool {
        self.send(Message::control(self.header_template(), message_type))
    }

    fn send_data(&mut self, message_type: DataMessageType, objects: &[u32]) -> bool {
        self.send(Message::data(self.header_template(), message_type, objects))
    }

    fn send_extended(&mut self, message_type: ExtendedMessageType, payload: &[u8]) -> bool {
        self.send(Message::extended(self.header_template(), message_type, payload))
    }

    /// Follow the specification revision of the port partner, up to 3.x.
    fn adopt_spec_revision(&mut self) {
        let revision = self
            .protocol_layer
            .rx_message()
            .header
            .spec_revision()
            .unwrap_or(SpecificationRevision::R2_0);

        self.spec_revision = revision.max(SpecificationRevision::R2_0);
    }

    fn startup_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::SrcStartup,
            PowerRole::Sink => State::SnkStartup,
        }
    }

    fn ready_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::SrcReady,
            PowerRole::Sink => State::SnkReady,
        }
    }

    fn send_soft_reset_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::SrcSendSoftReset,
            PowerRole::Sink => State::SnkSendSoftReset,
        }
    }

    fn hard_reset_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::SrcHardReset,
            PowerRole::Sink => State::SnkHardReset,
        }
    }

    fn send_not_supported_state(&self) -> State {
        match self.power_role {
            PowerRole::Source => State::SrcSendNotSupported,
            PowerRole::Sink => State::SnkSendNotSupported,
        }
    }

    /// Answer an unsupported message, after the chunking timeout for large chunked messages.
    fn not_supported_state(&self) -> State {
        let large_chunked = self
            .protocol_layer
            .rx_message()
            .extended_header()
            .is_some_and(|header| header.is_large_chunked());

        match (self.power_role, large_chunked) {
            (PowerRole::Source, true) => State::SrcChunkReceived,
            (PowerRole::Sink, true) => State::SnkChunkReceived,
            _ => self.send_not_supported_state(),
        }
    }

    /// Send a control message, or soft reset on failure.
    fn send_control_or_soft_reset(&mut self, message_type: ControlMessageType, next: State) -> State {
        if self.send_control(message_type) {
            next
        } else {
            self.send_soft_reset_state()
        }
    }

    /// Drop received message markers and reset the protocol layer.
    fn reset_protocol(&mut self) {
        self.events().clear_messages();
        self.protocol_layer.reset();
    }

    /// Reset counters, apart from the hard reset counters.
    fn init_counters(&mut self) {
        self.caps_counter.reset();
        self.discover_identity_counter.reset();
        self.reset_protocol();
    }

    /// Drop contract and discovery state.
    fn init_policy(&mut self) {
        self.reset_session();
        self.tx_hard_reset = false;
        self.pd_support = false;
    }

    /// Drop contract and discovery state, as on every startup.
    fn reset_session(&mut self) {
        self.contract = Contract::default();
        self.vdm = VdmState::default();
        self.partner_capabilities.clear();
        self.partner_sink_capabilities_known = false;
        self.modal_operation = false;
        self.goto_min = false;
        self.sink_tx_ng = false;
    }

    /// The ready state loop that both power roles share.
    ///
    /// Received messages are checked before commands. The loop parks in the ready state
    /// after its polling window.
    fn ready(&mut self, routes: &ReadyRoutes) -> State {
        let ready = self.ready_state();
        let mut window = TimerType::ReadyPoll.duration_ms();
        if self.vdm.got_ufp_vdm {
            window += TimerType::StartAmsMargin.duration_ms();
        }

        self.arm();

        loop {
            if let Some(state) = self.interrupted() {
                return state;
            }

            if let Some(state) = self.route_message(routes) {
                return state;
            }

            // The partner may follow up on an answered VDM within the margin.
            if self.vdm.got_ufp_vdm && self.expired(TimerType::StartAmsMargin) {
                self.vdm.got_ufp_vdm = false;
            }

            if let Some(state) = self.route_command(routes) {
                return state;
            }

            if self.elapsed_ms() >= window {
                return ready;
            }
        }
    }

    fn route_message(&mut self, routes: &ReadyRoutes) -> Option<State> {
        if self.elapsed_ms() <= TimerType::MessageGuard.duration_ms() {
            return None;
        }

        if self.spec_revision.is_pd3() {
            if let Some(state) = self.check_messages(routes.pd3) {
                return Some(state);
            }

            if routes
                .not_supported
                .iter()
                .any(|event| self.protocol_layer.get_status(*event))
            {
                return Some(self.not_supported_state());
            }

            if !self.config.fast_role_swap && self.protocol_layer.get_status(MessageEvent::FrSwap) {
                return Some(self.not_supported_state());
            }
        } else {
            if self.protocol_layer.get_status(MessageEvent::Reserved) {
                return Some(State::DrSendReject);
            }

            // Drop what is only answered on PD 3.x.
            for event in routes.not_supported {
                if !routes.common.iter().any(|(routed, _)| routed == event) {
                    self.protocol_layer.get_status(*event);
                }
            }
        }

        if let Some(state) = self.check_messages(routes.common) {
            return Some(state);
        }

        if self.config.fast_role_swap
            && self.power_role == PowerRole::Source
            && self.protocol_layer.get_status(MessageEvent::FrSwap)
        {
            return Some(State::FrsSrcSnkEvaluateSwap);
        }

        self.route_vdm()
    }

    /// Route received VDMs, as responder (UFP) or initiator (DFP).
    fn route_vdm(&mut self) -> Option<State> {
        const UFP: &[(MessageEvent, State)] = &[
            (MessageEvent::DiscoverIdentity, State::UfpVdmGetIdentity),
            (MessageEvent::DiscoverSvids, State::UfpVdmGetSvids),
            (MessageEvent::DiscoverModes, State::UfpVdmGetModes),
            (MessageEvent::EnterMode, State::UfpVdmEvaluateModeEntry),
            (MessageEvent::ExitMode, State::UfpVdmModeExit),
            (MessageEvent::Attention, State::DfpVdmAttentionRequest),
            (MessageEvent::DisplayPortStatus, State::UfpVdmEvaluateStatus),
            (MessageEvent::DisplayPortConfigure, State::UfpVdmEvaluateConfigure),
        ];
        const DFP: &[(MessageEvent, State)] = &[
            (MessageEvent::DiscoverIdentity, State::DfpVdmEvaluate),
            (MessageEvent::DiscoverSvids, State::DfpVdmEvaluate),
            (MessageEvent::DiscoverModes, State::DfpVdmEvaluate),
            (MessageEvent::EnterMode, State::DfpVdmEvaluate),
            (MessageEvent::ExitMode, State::DfpVdmEvaluate),
            (MessageEvent::Attention, State::DfpVdmAttentionRequest),
            (MessageEvent::DisplayPortStatus, State::DfpVdmEvaluate),
            (MessageEvent::DisplayPortConfigure, State::DfpVdmEvaluate),
        ];

        let routed = match self.data_role {
            DataRole::Ufp => self.check_messages(UFP).inspect(|_| self.vdm.got_ufp_vdm = true),
            DataRole::Dfp => self.check_messages(DFP),
        };

        if routed.is_some() {
            return routed;
        }

        if self.protocol_layer.get_status(MessageEvent::UnstructuredVdm) {
            let vendor_id = self.protocol_layer.rx_message().object(0).map(|header| (header >> 16) as u16);

            if vendor_id == Some(self.config.identity.vendor_id) {
                return Some(State::DfpUvdmReceiveMessage);
            } else if self.spec_revision.is_pd3() {
                return Some(self.send_not_supported_state());
            }
        }

        None
    }

    fn route_command(&mut self, routes: &ReadyRoutes) -> Option<State> {
        let pending = self.events().pending();
        if !pending.any_command() || !self.command_gate() {
            return None;
        }

        let state = routes.commands.iter().find_map(|&(command, state)| {
            (pending.command(command) && self.command_applies(command)).then_some((command, state))
        });

        match state {
            Some((command, state)) => {
                self.events().take_command(command);
                if command == Command::GotoMin {
                    self.goto_min = true;
                }
                debug!("Command {:?}", command);
                Some(state)
            }
            None => {
                warn!("Dropping commands that do not apply in {:?}", self.state);
                self.events().clear_commands(&pending);
                None
            }
        }
    }

    /// Whether commands may start an atomic message sequence now.
    fn command_gate(&mut self) -> bool {
        if self.vdm.got_ufp_vdm {
            return false;
        }

        if self.spec_revision.is_pd3() {
            match self.power_role {
                PowerRole::Source => {
                    if !self.sink_tx_ng {
                        // Signal SinkTxNG, and give the sink time to notice.
                        self.port_controller.set_rp_control(RpLevel::Rp180);
                        self.sink_tx_ng = true;
                        self.arm();
                    }

                    self.expired(TimerType::CommandDelayPd3)
                }
                PowerRole::Sink => self.port_controller.rp_level() == RpLevel::Rp330,
            }
        } else {
            self.expired(TimerType::CommandDelayPd2)
        }
    }

    fn command_applies(&self, command: Command) -> bool {
        match command {
            Command::GetSinkCap => !(self.power_role == PowerRole::Source && self.partner_sink_capabilities_known),
            _ => true,
        }
    }
}
