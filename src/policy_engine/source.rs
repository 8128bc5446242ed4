//! Source states: startup, capability advertisement, negotiation and resets.
use super::{Awaited, PolicyEngine, ReadyRoutes, State};
use crate::device_policy_manager::{DevicePolicyManager, Event, RequestEvaluation};
use crate::events::{Command, MessageEvent};
use crate::protocol_layer::ProtocolLayer;
use crate::protocol_layer::message::header::{ControlMessageType, DataMessageType};
use crate::protocol_layer::message::pdo::PowerDataObject;
use crate::protocol_layer::message::request::FixedVariableSupply;
use crate::timers::{Clock, TimerType};
use crate::{CcControl, DataRole, PortController, RpLevel, VbusState};

const SOURCE_READY: ReadyRoutes = ReadyRoutes {
    pd3: &[
        (MessageEvent::GetSourceCapExtended, State::SrcGiveSourceCapExt),
        (MessageEvent::GetStatus, State::GiveStatus),
        (MessageEvent::GetRevision, State::GiveRevision),
        (MessageEvent::GetSourceInfo, State::SrcGiveSourceInfo),
        (MessageEvent::GetBatteryCap, State::GiveBatteryCap),
        (MessageEvent::GetBatteryStatus, State::GiveBatteryStatus),
        (MessageEvent::GetManufacturerInfo, State::GiveManufacturerInfo),
        (MessageEvent::GetCountryCodes, State::GiveCountryCodes),
        (MessageEvent::GetCountryInfo, State::GiveCountryInfo),
        (MessageEvent::GetPpsStatus, State::SrcGivePpsStatus),
        (MessageEvent::Alert, State::SrcSinkAlertReceived),
        (MessageEvent::NotSupported, State::SrcNotSupportedReceived),
        (MessageEvent::SecurityResponse, State::SecurityResponseReceived),
        (MessageEvent::FirmwareUpdateResponse, State::FirmwareUpdateResponseReceived),
    ],
    not_supported: &[
        MessageEvent::GetSinkCapExtended,
        MessageEvent::BatteryStatus,
        MessageEvent::SourceCapabilitiesExtended,
        MessageEvent::Status,
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
        (MessageEvent::GetSourceCap, State::SrcGiveSourceCap),
        (MessageEvent::Request, State::SrcNegotiateCapability),
        (MessageEvent::PrSwap, State::PrsSrcSnkEvaluateSwap),
        (MessageEvent::DrSwap, State::DrsEvaluatePort),
        (MessageEvent::VconnSwap, State::VcsEvaluateSwap),
        (MessageEvent::GetSinkCap, State::DrSrcGiveSinkCap),
        (MessageEvent::Bist, State::BistCarrierMode),
        // An Accept that belongs to no message sequence.
        (MessageEvent::Accept, State::SrcSendSoftReset),
    ],
    commands: &[
        (Command::GetSinkCap, State::SrcGetSinkCap),
        (Command::GotoMin, State::SrcTransitionSupply),
        (Command::SourceCapChange, State::SrcSendCapabilities),
        (Command::PrSwap, State::PrsSrcSnkSendSwap),
        (Command::DrSwap, State::DrsEvaluateSendPort),
        (Command::VconnSwap, State::VcsSendSwap),
        (Command::UvdmSend, State::DfpUvdmSendMessage),
        (Command::DiscoverIdentity, State::DfpVdmIdentityRequest),
        (Command::DiscoverSvids, State::DfpVdmSvidsRequest),
        (Command::DiscoverModes, State::DfpVdmModesRequest),
        (Command::EnterMode, State::DfpVdmModeEntryRequest),
        (Command::ExitMode, State::DfpVdmModeExitRequest),
        (Command::DisplayPortStatus, State::DfpVdmStatusUpdate),
        (Command::DisplayPortConfigure, State::DfpVdmDisplayPortConfigure),
        (Command::Attention, State::UfpVdmAttentionRequest),
        (Command::GetSourceCap, State::DrSrcGetSourceCap),
        (Command::GetStatus, State::GetStatus),
        (Command::GetBatteryCap, State::GetBatteryCap),
        (Command::GetBatteryStatus, State::GetBatteryStatus),
        (Command::GetManufacturerInfo, State::GetManufacturerInfo),
        (Command::GetCountryCodes, State::GetCountryCodes),
        (Command::GetCountryInfo, State::GetCountryInfo),
        (Command::SecurityRequest, State::SendSecurityRequest),
        (Command::FirmwareUpdateRequest, State::SendFirmwareUpdateRequest),
        (Command::SendAlert, State::SrcSendSourceAlert),
    ],
};

impl<PROTOCOL: ProtocolLayer, PORT: PortController, DPM: DevicePolicyManager, CLOCK: Clock>
    PolicyEngine<PROTOCOL, PORT, DPM, CLOCK>
{
    pub(super) fn src_startup(&mut self) -> State {
        self.caps_counter.reset();
        self.reset_protocol();
        self.port_controller.soft_reset();
        self.reset_session();

        if self.tx_hard_reset {
            self.tx_hard_reset = false;

            if let Some(state) = self.settle(TimerType::SrcStartupRecover) {
                return state;
            }
        }

        self.arm();
        while !self.expired(TimerType::VbusDetect) {
            if let Some(state) = self.interrupted() {
                return state;
            }

            if self.port_controller.vbus_on_check() != VbusState::Absent {
                self.clock.delay_ms(TimerType::ChargerSettle.duration_ms());
                self.port_controller.set_cc_control(CcControl::On);
                return State::SrcSendCapabilities;
            }
        }

        warn!("VBUS not detected");
        State::SrcStartup
    }

    pub(super) fn src_discovery(&mut self) -> State {
        if let Some(state) = self.settle(TimerType::TypeCSendSourceCap) {
            return state;
        }

        if self.caps_counter.is_exhausted() {
            self.device_policy_manager.inform_event(Event::SourceDisabled);
            State::SrcDisabled
        } else {
            State::SrcSendCapabilities
        }
    }

    pub(super) fn src_send_capabilities(&mut self) -> State {
        self.protocol_layer.get_status(MessageEvent::Request);
        self.protocol_layer.get_status(MessageEvent::GetSinkCap);
        // Saturates; the discovery state takes the exhausted path.
        let _ = self.caps_counter.increment();

        let capabilities = self.device_policy_manager.source_capabilities();
        if !self.send_data(DataMessageType::SourceCapabilities, &capabilities) {
            return if self.pd_support {
                State::SrcSendSoftReset
            } else {
                State::SrcDiscovery
            };
        }

        self.pd_support = true;

        let on_timeout = if self.hard_reset_counter.is_exhausted() {
            State::ErrorRecovery
        } else {
            State::SrcHardReset
        };

        let next = self.wait_for(
            &[
                (MessageEvent::Request, State::SrcNegotiateCapability),
                (MessageEvent::GetSinkCap, State::SrcSendSoftReset),
                (MessageEvent::Ping, State::SrcSendSoftReset),
            ],
            TimerType::SenderResponse,
            on_timeout,
        );

        if next == State::SrcNegotiateCapability {
            self.hard_reset_counter.reset();
            self.caps_counter.reset();
        }

        next
    }

    pub(super) fn src_negotiate_capability(&mut self) -> State {
        self.adopt_spec_revision();

        let request = FixedVariableSupply(self.protocol_layer.rx_message().object(0).unwrap_or_default());
        let capabilities = self.device_policy_manager.source_capabilities();
        let evaluation = self.device_policy_manager.evaluate_request(request, &capabilities);
        debug!("Request for position {}: {:?}", request.object_position(), evaluation);

        if evaluation != RequestEvaluation::Accept {
            self.contract.request = request;
            self.contract.capability_mismatch = false;
            self.last_evaluation = evaluation;
            return State::SrcCapabilityResponse;
        }

        if !self.send_control(ControlMessageType::Accept) {
            return State::SrcSendSoftReset;
        }

        if request.capability_mismatch() && !self.partner_sink_capabilities_known {
            self.device_policy_manager.inform_event(Event::CapabilityMismatch);
        }

        let position = request.object_position();
        self.contract.request = request;
        self.contract.capability_mismatch = request.capability_mismatch();
        self.contract.requested_object_position = position;
        self.contract.requested_kind = usize::from(position)
            .checked_sub(1)
            .and_then(|index| capabilities.get(index))
            .map(|raw| PowerDataObject::from(*raw).kind());

        State::SrcTransitionSupply
    }

    pub(super) fn src_transition_supply(&mut self) -> State {
        if self.goto_min {
            self.goto_min = false;
            if !self.send_control(ControlMessageType::GotoMin) {
                return State::SrcSendSoftReset;
            }
        }

        if let Some(state) = self.settle(TimerType::SrcTransition) {
            return state;
        }

        let position = self.contract.requested_object_position;
        if position != self.contract.selected_object_position || !self.contract.explicit {
            let capabilities = self.device_policy_manager.source_capabilities();
            let raw = usize::from(position)
                .checked_sub(1)
                .and_then(|index| capabilities.get(index).copied())
                .unwrap_or_default();

            info!("Apply supply at position {}", position);
            self.port_controller.apply_supply(position, raw);
        }

        self.contract.selected_object_position = position;
        self.contract.selected_kind = self.contract.requested_kind;
        self.contract.explicit = true;

        if !self.send_control(ControlMessageType::PsRdy) {
            return State::SrcSendSoftReset;
        }

        self.device_policy_manager
            .inform_event(Event::ContractEstablished(position));
        State::SrcReady
    }

    pub(super) fn src_ready(&mut self) -> State {
        self.contract.explicit = true;
        self.pd_support = true;

        // SinkTxOK on PD 3.x, default Rp otherwise.
        self.port_controller.set_rp_control(if self.spec_revision.is_pd3() {
            RpLevel::Rp330
        } else {
            RpLevel::Rp180
        });
        self.sink_tx_ng = false;

        self.ready(&SOURCE_READY)
    }

    pub(super) fn src_disabled(&mut self) -> State {
        State::SrcDisabled
    }

    pub(super) fn src_capability_response(&mut self) -> State {
        let (message_type, waiting) = match self.last_evaluation {
            RequestEvaluation::Wait => (ControlMessageType::Wait, true),
            _ => (ControlMessageType::Reject, false),
        };

        if !self.send_control(message_type) {
            return State::SrcSendSoftReset;
        }

        if self.contract.explicit {
            State::SrcReady
        } else if waiting {
            State::SrcWaitNewCapabilities
        } else {
            State::SrcDiscovery
        }
    }

    pub(super) fn src_wait_new_capabilities(&mut self) -> State {
        State::SrcSendCapabilities
    }

    pub(super) fn src_hard_reset(&mut self) -> State {
        self.init_counters();
        self.init_policy();
        self.port_controller.hard_reset();
        self.port_controller.set_cc_control(CcControl::Off);

        if let Some(state) = self.settle(TimerType::PSHardReset) {
            return state;
        }

        let _ = self.hard_reset_counter.increment();
        self.tx_hard_reset = true;
        State::SrcTransitionToDefault
    }

    pub(super) fn src_hard_reset_received(&mut self) -> State {
        self.init_counters();
        self.init_policy();
        self.port_controller.set_cc_control(CcControl::Off);

        if let Some(state) = self.settle(TimerType::PSHardReset) {
            return state;
        }

        self.tx_hard_reset = true;
        State::SrcTransitionToDefault
    }

    pub(super) fn src_transition_to_default(&mut self) -> State {
        self.port_controller.set_otg_control(false);

        if let Some(state) = self.settle(TimerType::SrcRecover) {
            return state;
        }

        self.port_controller.driver_reset();
        let tx_hard_reset = self.tx_hard_reset;
        self.init_policy();
        self.tx_hard_reset = tx_hard_reset;
        self.port_controller.set_otg_control(true);

        if self.data_role != DataRole::Dfp {
            self.data_role = DataRole::Dfp;
            self.port_controller.set_data_role(DataRole::Dfp);
        }

        if self.vconn_source {
            self.vconn_source = false;
            self.port_controller.set_vconn_source(false);
        }

        State::SrcStartup
    }

    pub(super) fn src_give_source_cap(&mut self) -> State {
        let capabilities = self.device_policy_manager.source_capabilities();
        if !self.send_data(DataMessageType::SourceCapabilities, &capabilities) {
            return State::SrcSendSoftReset;
        }

        self.wait_for(
            &[(MessageEvent::Request, State::SrcNegotiateCapability)],
            TimerType::SenderResponse,
            State::SrcHardReset,
        )
    }

    pub(super) fn src_get_sink_cap(&mut self) -> State {
        self.protocol_layer.get_status(MessageEvent::SinkCapabilities);

        if !self.send_control(ControlMessageType::GetSinkCap) {
            return State::SrcSendSoftReset;
        }

        match self.await_message(MessageEvent::SinkCapabilities, TimerType::SenderResponse) {
            Awaited::Received => {
                let mut capabilities = heapless::Vec::new();
                let _ = capabilities.extend_from_slice(self.protocol_layer.rx_message().objects());

                self.partner_sink_capabilities_known = true;
                self.device_policy_manager
                    .inform_event(Event::SinkCapabilities(capabilities));
                State::SrcReady
            }
            Awaited::Expired => {
                debug!("No sink capabilities received");
                State::SrcReady
            }
            Awaited::Interrupted(state) => state,
        }
    }

    pub(super) fn src_send_soft_reset(&mut self) -> State {
        self.reset_protocol();
        self.init_counters();
        self.hard_reset_counter.reset();
        self.port_controller.soft_reset();

        if !self.send_control(ControlMessageType::SoftReset) {
            return State::SrcHardReset;
        }

        self.wait_for(
            &[(MessageEvent::Accept, State::SrcSendCapabilities)],
            TimerType::SenderResponse,
            State::SrcHardReset,
        )
    }

    pub(super) fn src_soft_reset(&mut self) -> State {
        self.init_counters();
        self.hard_reset_counter.reset();

        if self.send_control(ControlMessageType::Accept) {
            State::SrcSendCapabilities
        } else {
            State::SrcHardReset
        }
    }
}
