//! Sink states: startup, capability evaluation, power requests and resets.
use heapless::Vec;

use super::{PolicyEngine, ReadyRoutes, State};
use crate::device_policy_manager::{DevicePolicyManager, Event};
use crate::events::{Command, MessageEvent};
use crate::protocol_layer::ProtocolLayer;
use crate::protocol_layer::message::header::{ControlMessageType, DataMessageType};
use crate::protocol_layer::message::pdo::PowerDataObject;
use crate::timers::{Clock, TimerType};
use crate::{CcControl, DataRole, PortController, RpLevel, VbusState};

const SINK_READY: ReadyRoutes = ReadyRoutes {
    pd3: &[
        (MessageEvent::GetStatus, State::GiveStatus),
        (MessageEvent::GetRevision, State::GiveRevision),
        (MessageEvent::GetSourceInfo, State::DrSnkGiveSourceInfo),
        (MessageEvent::Alert, State::SnkSourceAlertReceived),
        (MessageEvent::GetBatteryCap, State::GiveBatteryCap),
        (MessageEvent::GetBatteryStatus, State::GiveBatteryStatus),
        (MessageEvent::GetManufacturerInfo, State::GiveManufacturerInfo),
        (MessageEvent::GetCountryCodes, State::GiveCountryCodes),
        (MessageEvent::GetCountryInfo, State::GiveCountryInfo),
        (MessageEvent::NotSupported, State::SnkNotSupportedReceived),
        (MessageEvent::SecurityResponse, State::SecurityResponseReceived),
        (MessageEvent::FirmwareUpdateResponse, State::FirmwareUpdateResponseReceived),
    ],
    not_supported: &[
        MessageEvent::GetSourceCapExtended,
        MessageEvent::GetPpsStatus,
        MessageEvent::GetSinkCapExtended,
        MessageEvent::BatteryStatus,
        MessageEvent::SourceCapabilitiesExtended,
        MessageEvent::BatteryCapabilities,
        MessageEvent::ManufacturerInfo,
        MessageEvent::SecurityRequest,
        MessageEvent::FirmwareUpdateRequest,
        MessageEvent::PpsStatus,
        MessageEvent::CountryInfo,
        MessageEvent::CountryCodes,
        MessageEvent::SinkCapabilitiesExtended,
        MessageEvent::EnterUsb,
        MessageEvent::VconnSwap,
        MessageEvent::Reserved,
    ],
    common: &[
        (MessageEvent::SourceCapabilities, State::SnkEvaluateCapability),
        (MessageEvent::GetSinkCap, State::SnkGiveSinkCap),
        (MessageEvent::PrSwap, State::PrsSnkSrcEvaluateSwap),
        (MessageEvent::DrSwap, State::DrsEvaluatePort),
        (MessageEvent::VconnSwap, State::VcsEvaluateSwap),
        (MessageEvent::GetSourceCap, State::DrSnkGiveSourceCap),
        (MessageEvent::Bist, State::BistCarrierMode),
        (MessageEvent::Accept, State::SnkSendSoftReset),
        (MessageEvent::GotoMin, State::SnkTransitionSink),
    ],
    commands: &[
        (Command::NewPowerSource, State::SnkSelectCapability),
        (Command::GetSourceCap, State::SnkGetSourceCap),
        (Command::PrSwap, State::PrsSnkSrcSendSwap),
        (Command::DrSwap, State::DrsEvaluateSendPort),
        (Command::VconnSwap, State::VcsSendSwap),
        (Command::DiscoverIdentity, State::DfpVdmIdentityRequest),
        (Command::DiscoverSvids, State::DfpVdmSvidsRequest),
        (Command::DiscoverModes, State::DfpVdmModesRequest),
        (Command::Attention, State::UfpVdmAttentionRequest),
        (Command::EnterMode, State::DfpVdmModeEntryRequest),
        (Command::ExitMode, State::DfpVdmModeExitRequest),
        (Command::DisplayPortStatus, State::DfpVdmStatusUpdate),
        (Command::DisplayPortConfigure, State::DfpVdmDisplayPortConfigure),
        (Command::UvdmSend, State::DfpUvdmSendMessage),
        (Command::GetSinkCap, State::DrSnkGetSinkCap),
        (Command::GetStatus, State::SnkGetSourceStatus),
        (Command::GetSourceCapExtended, State::SnkGetSourceCapExt),
        (Command::GetPpsStatus, State::SnkGetPpsStatus),
        (Command::GetBatteryCap, State::GetBatteryCap),
        (Command::GetBatteryStatus, State::GetBatteryStatus),
        (Command::GetManufacturerInfo, State::GetManufacturerInfo),
        (Command::GetCountryCodes, State::GetCountryCodes),
        (Command::GetCountryInfo, State::GetCountryInfo),
        (Command::FastRoleSwap, State::FrsSnkSrcStartAms),
        (Command::SendAlert, State::SnkSendSinkAlert),
        (Command::SecurityRequest, State::SendSecurityRequest),
        (Command::FirmwareUpdateRequest, State::SendFirmwareUpdateRequest),
    ],
};

impl<PROTOCOL: ProtocolLayer, PORT: PortController, DPM: DevicePolicyManager, CLOCK: Clock>
    PolicyEngine<PROTOCOL, PORT, DPM, CLOCK>
{
    pub(super) fn snk_startup(&mut self) -> State {
        self.port_controller.set_rp_control(RpLevel::Rp80);
        self.reset_protocol();
        self.reset_session();

        State::SnkDiscovery
    }

    pub(super) fn snk_discovery(&mut self) -> State {
        self.arm();

        loop {
            if let Some(state) = self.interrupted() {
                return state;
            }

            if self.port_controller.vbus_on_check() != VbusState::Absent {
                return State::SnkWaitForCapabilities;
            }

            if self.expired(TimerType::NoResponse) {
                return if self.hard_reset_counter.is_exhausted() {
                    warn!("Source unresponsive");
                    State::SnkDiscovery
                } else {
                    State::SnkHardReset
                };
            }
        }
    }

    pub(super) fn snk_wait_for_capabilities(&mut self) -> State {
        self.port_controller.set_cc_control(CcControl::On);

        let on_timeout = if self.hard_reset_counter.is_exhausted() {
            State::SnkWaitForCapabilities
        } else {
            State::SnkHardReset
        };

        self.wait_for(
            &[(MessageEvent::SourceCapabilities, State::SnkEvaluateCapability)],
            TimerType::TypeCSinkWaitCap,
            on_timeout,
        )
    }

    pub(super) fn snk_evaluate_capability(&mut self) -> State {
        self.adopt_spec_revision();
        self.hard_reset_counter.reset();
        self.pd_support = true;

        let mut capabilities: Vec<u32, 7> = Vec::new();
        let _ = capabilities.extend_from_slice(self.protocol_layer.rx_message().objects());
        self.partner_capabilities = capabilities.clone();
        self.device_policy_manager
            .inform_event(Event::SourceCapabilities(capabilities));

        let Some(request) = self.device_policy_manager.select_capability(&self.partner_capabilities) else {
            warn!("No acceptable capability");
            return State::SnkHardReset;
        };

        let position = request.object_position();
        self.contract.request = request;
        self.contract.capability_mismatch = request.capability_mismatch();
        self.contract.requested_object_position = position;
        self.contract.requested_kind = usize::from(position)
            .checked_sub(1)
            .and_then(|index| self.partner_capabilities.get(index))
            .map(|raw| PowerDataObject::from(*raw).kind());

        State::SnkSelectCapability
    }

    pub(super) fn snk_select_capability(&mut self) -> State {
        // Newer capabilities overtake the pending request.
        if self.pd_support && self.protocol_layer.get_status(MessageEvent::SourceCapabilities) {
            return State::SnkEvaluateCapability;
        }

        self.protocol_layer.get_status(MessageEvent::Accept);
        self.protocol_layer.get_status(MessageEvent::PsRdy);
        self.select_retry_counter.reset();

        let request = self.contract.request.0;
        let mut sent = self.send_data(DataMessageType::Request, &[request]);
        let rejected = if self.contract.selected_object_position == 0 {
            State::SnkWaitForCapabilities
        } else {
            State::SnkReady
        };

        self.arm();

        loop {
            if let Some(state) = self.interrupted() {
                return state;
            }

            if let Some(state) = self.check_messages(&[
                (MessageEvent::GetSinkCap, State::SnkSendSoftReset),
                (MessageEvent::Accept, State::SnkTransitionSink),
                (MessageEvent::Reject, rejected),
                (MessageEvent::Wait, rejected),
            ]) {
                return state;
            }

            if self.expired(TimerType::SenderResponse) {
                if sent {
                    return State::SnkHardReset;
                }

                if self.select_retry_counter.value() >= self.select_retry_counter.max_value() {
                    warn!("Request not acknowledged");
                    return State::SnkSendSoftReset;
                }

                let _ = self.select_retry_counter.increment();
                sent = self.send_data(DataMessageType::Request, &[request]);
                self.arm();
            }
        }
    }

    pub(super) fn snk_transition_sink(&mut self) -> State {
        let next = self.wait_for(
            &[
                (MessageEvent::PsRdy, State::SnkReady),
                (MessageEvent::GetSinkCap, State::SnkHardReset),
            ],
            TimerType::PSTransition,
            State::SnkHardReset,
        );

        if next == State::SnkReady {
            let position = self.contract.requested_object_position;
            self.contract.selected_object_position = position;
            self.contract.selected_kind = self.contract.requested_kind;
            self.contract.explicit = true;
            self.device_policy_manager
                .inform_event(Event::ContractEstablished(position));
        }

        next
    }

    pub(super) fn snk_ready(&mut self) -> State {
        self.contract.explicit = true;
        self.pd_support = true;

        self.ready(&SINK_READY)
    }

    pub(super) fn snk_hard_reset(&mut self) -> State {
        self.port_controller.hard_reset();
        self.port_controller.set_cc_control(CcControl::Off);
        let _ = self.hard_reset_counter.increment();

        State::SnkTransitionToDefault
    }

    pub(super) fn snk_transition_to_default(&mut self) -> State {
        self.init_counters();
        self.init_policy();
        self.port_controller.driver_reset();

        self.data_role = DataRole::Ufp;
        self.port_controller.set_data_role(DataRole::Ufp);
        self.vconn_source = false;
        self.port_controller.set_vconn_source(false);

        if let Some(state) = self.settle(TimerType::SinkDefaultSettle) {
            return state;
        }

        State::SnkStartup
    }

    pub(super) fn snk_give_sink_cap(&mut self) -> State {
        let capabilities = self.device_policy_manager.sink_capabilities();

        if self.send_data(DataMessageType::SinkCapabilities, &capabilities) {
            State::SnkReady
        } else {
            State::SnkSendSoftReset
        }
    }

    pub(super) fn snk_get_source_cap(&mut self) -> State {
        self.protocol_layer.get_status(MessageEvent::SourceCapabilities);

        if !self.send_control(ControlMessageType::GetSourceCap) {
            return State::SnkSendSoftReset;
        }

        self.wait_for(
            &[(MessageEvent::SourceCapabilities, State::SnkEvaluateCapability)],
            TimerType::SenderResponse,
            State::SnkReady,
        )
    }

    pub(super) fn snk_send_soft_reset(&mut self) -> State {
        self.reset_protocol();
        self.init_counters();
        self.hard_reset_counter.reset();
        self.port_controller.soft_reset();

        if !self.send_control(ControlMessageType::SoftReset) {
            return State::SnkHardReset;
        }

        self.wait_for(
            &[(MessageEvent::Accept, State::SnkWaitForCapabilities)],
            TimerType::SenderResponse,
            State::SnkHardReset,
        )
    }

    pub(super) fn snk_soft_reset(&mut self) -> State {
        self.init_counters();
        self.hard_reset_counter.reset();

        if self.send_control(ControlMessageType::Accept) {
            State::SnkWaitForCapabilities
        } else {
            State::SnkHardReset
        }
    }
}
