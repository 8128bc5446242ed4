//! Extended message exchange, queries to the port partner, and the states that only notify the
//! device policy manager.
use heapless::Vec;

use super::{Awaited, PolicyEngine, State};
use crate::device_policy_manager::{Deferred, DevicePolicyManager, Event};
use crate::events::{Command, MessageEvent};
use crate::protocol_layer::ProtocolLayer;
use crate::protocol_layer::message::extended::{
    self, BatteryStatusDataObject, RevisionDataObject, SourceInfoDataObject,
};
use crate::protocol_layer::message::header::{ControlMessageType, DataMessageType, ExtendedMessageType};
use crate::protocol_layer::message::pdo::FixedSupply;
use crate::protocol_layer::message::vendor_defined::AlertDataObject;
use crate::timers::{Clock, TimerType};
use crate::{PortController, PowerRole};

/// How a received query reply is reported.
enum Reply {
    /// As [`Event::Response`].
    Response,
    SourceCapabilities,
    SinkCapabilities,
}

impl<PROTOCOL: ProtocolLayer, PORT: PortController, DPM: DevicePolicyManager, CLOCK: Clock>
    PolicyEngine<PROTOCOL, PORT, DPM, CLOCK>
{
    /// Send a query, and forward its reply or absence to the device policy manager.
    fn query(
        &mut self,
        command: Command,
        reply: MessageEvent,
        report: Reply,
        send: impl FnOnce(&mut Self) -> bool,
    ) -> State {
        // Drop a stale reply.
        self.protocol_layer.get_status(reply);

        if !send(self) {
            return self.send_soft_reset_state();
        }

        match self.await_message(reply, TimerType::SenderResponse) {
            Awaited::Interrupted(state) => return state,
            Awaited::Expired => {
                warn!("No reply to {:?}", command);
                self.device_policy_manager.inform_event(Event::NoResponse(command));
            }
            Awaited::Received => {
                let event = match report {
                    Reply::Response => Event::Response(self.protocol_layer.rx_message().clone()),
                    Reply::SourceCapabilities => Event::SourceCapabilities(self.rx_objects()),
                    Reply::SinkCapabilities => Event::SinkCapabilities(self.rx_objects()),
                };
                self.device_policy_manager.inform_event(event);
            }
        }

        self.ready_state()
    }

    fn rx_objects(&self) -> Vec<u32, 7> {
        let mut objects = Vec::new();
        let _ = objects.extend_from_slice(self.protocol_layer.rx_message().objects());
        objects
    }

    fn rx_payload_byte(&self, index: usize) -> u8 {
        self.protocol_layer
            .rx_message()
            .extended_payload_byte(index)
            .unwrap_or_default()
    }

    fn give_data(&mut self, message_type: DataMessageType, objects: &[u32]) -> State {
        if self.send_data(message_type, objects) {
            self.ready_state()
        } else {
            self.send_soft_reset_state()
        }
    }

    fn give_extended(&mut self, message_type: ExtendedMessageType, payload: &[u8]) -> State {
        if self.send_extended(message_type, payload) {
            self.ready_state()
        } else {
            self.send_soft_reset_state()
        }
    }

    fn defer(&mut self, deferred: Deferred) -> State {
        self.device_policy_manager.inform_event(Event::Deferred(deferred));
        self.ready_state()
    }

    pub(super) fn send_not_supported(&mut self) -> State {
        let ready = self.ready_state();
        self.send_control_or_soft_reset(ControlMessageType::NotSupported, ready)
    }

    pub(super) fn not_supported_received(&mut self) -> State {
        self.device_policy_manager.inform_event(Event::NotSupportedReceived);
        self.ready_state()
    }

    /// A large chunked message is answered once the partner stopped sending chunks.
    pub(super) fn chunk_received(&mut self) -> State {
        if let Some(state) = self.settle(TimerType::ChunkingNotSupported) {
            return state;
        }

        self.send_not_supported_state()
    }

    pub(super) fn src_sink_alert_received(&mut self) -> State {
        let alert = self.protocol_layer.rx_message().object(0).unwrap_or_default();

        self.device_policy_manager.inform_event(Event::Alert(alert));
        State::SrcReady
    }

    /// Follow up on an alert of the source with the matching status query.
    pub(super) fn snk_source_alert_received(&mut self) -> State {
        let alert = self.protocol_layer.rx_message().object(0).unwrap_or_default();
        self.device_policy_manager.inform_event(Event::Alert(alert));

        if AlertDataObject(alert).battery_status_change() {
            State::GetBatteryStatus
        } else {
            State::SnkGetSourceStatus
        }
    }

    pub(super) fn send_alert(&mut self) -> State {
        self.defer(Deferred::SendAlert)
    }

    pub(super) fn src_give_source_cap_ext(&mut self) -> State {
        let payload = extended::source_capabilities_extended(&self.config.identity);
        self.give_extended(ExtendedMessageType::SourceCapabilitiesExtended, &payload)
    }

    pub(super) fn give_source_info(&mut self) -> State {
        self.give_data(DataMessageType::SourceInfo, &[SourceInfoDataObject::guaranteed_2w().0])
    }

    pub(super) fn src_give_pps_status(&mut self) -> State {
        match self.device_policy_manager.pps_status() {
            Some(status) => self.give_extended(ExtendedMessageType::PpsStatus, &status),
            None => State::SrcSendNotSupported,
        }
    }

    pub(super) fn snk_get_source_cap_ext(&mut self) -> State {
        self.query(
            Command::GetSourceCapExtended,
            MessageEvent::SourceCapabilitiesExtended,
            Reply::Response,
            |engine| engine.send_control(ControlMessageType::GetSourceCapExtended),
        )
    }

    pub(super) fn snk_get_pps_status(&mut self) -> State {
        self.query(
            Command::GetPpsStatus,
            MessageEvent::PpsStatus,
            Reply::Response,
            |engine| engine.send_control(ControlMessageType::GetPpsStatus),
        )
    }

    pub(super) fn dr_src_get_source_cap(&mut self) -> State {
        self.query(
            Command::GetSourceCap,
            MessageEvent::SourceCapabilities,
            Reply::SourceCapabilities,
            |engine| engine.send_control(ControlMessageType::GetSourceCap),
        )
    }

    pub(super) fn dr_src_give_sink_cap(&mut self) -> State {
        let capabilities = self.device_policy_manager.sink_capabilities();
        self.give_data(DataMessageType::SinkCapabilities, &capabilities)
    }

    pub(super) fn dr_snk_get_sink_cap(&mut self) -> State {
        self.query(
            Command::GetSinkCap,
            MessageEvent::SinkCapabilities,
            Reply::SinkCapabilities,
            |engine| engine.send_control(ControlMessageType::GetSinkCap),
        )
    }

    /// A dual-role sink advertises vSafe5V only.
    pub(super) fn dr_snk_give_source_cap(&mut self) -> State {
        self.give_data(
            DataMessageType::SourceCapabilities,
            &[FixedSupply::new_dual_role_5v().0],
        )
    }

    pub(super) fn dr_send_reject(&mut self) -> State {
        let ready = self.ready_state();
        self.send_control_or_soft_reset(ControlMessageType::Reject, ready)
    }

    pub(super) fn give_status(&mut self) -> State {
        self.give_extended(ExtendedMessageType::Status, &extended::status())
    }

    pub(super) fn give_revision(&mut self) -> State {
        self.give_data(DataMessageType::Revision, &[RevisionDataObject::current().0])
    }

    pub(super) fn give_battery_cap(&mut self) -> State {
        let reference = self.rx_payload_byte(0);
        let payload = extended::battery_capabilities(&self.config.identity, reference);

        self.give_extended(ExtendedMessageType::BatteryCapabilities, &payload)
    }

    pub(super) fn give_battery_status(&mut self) -> State {
        let reference = self.rx_payload_byte(0);
        let discharging = self.power_role == PowerRole::Source;
        let status = BatteryStatusDataObject::new(reference, discharging);

        self.give_data(DataMessageType::BatteryStatus, &[status.0])
    }

    pub(super) fn give_manufacturer_info(&mut self) -> State {
        let target = self.rx_payload_byte(0);
        let reference = self.rx_payload_byte(1);
        let payload = extended::manufacturer_info(&self.config.identity, target, reference);

        self.give_extended(ExtendedMessageType::ManufacturerInfo, &payload)
    }

    pub(super) fn give_country_codes(&mut self) -> State {
        let codes = self.device_policy_manager.country_codes();

        if codes.is_empty() {
            return self.send_not_supported_state();
        }

        self.give_extended(ExtendedMessageType::CountryCodes, &extended::country_codes(&codes))
    }

    pub(super) fn give_country_info(&mut self) -> State {
        let object = self.protocol_layer.rx_message().object(0).unwrap_or_default();
        let requested = [(object >> 24) as u8, (object >> 16) as u8];

        if !self.device_policy_manager.country_codes().contains(&requested) {
            return self.send_not_supported_state();
        }

        self.give_extended(ExtendedMessageType::CountryInfo, &extended::country_info(requested))
    }

    /// Serves both the generic query and the sink's follow-up on a source alert.
    pub(super) fn get_status(&mut self) -> State {
        self.query(
            Command::GetStatus,
            MessageEvent::Status,
            Reply::Response,
            |engine| engine.send_control(ControlMessageType::GetStatus),
        )
    }

    pub(super) fn get_battery_cap(&mut self) -> State {
        let reference = self.device_policy_manager.battery_reference();

        self.query(
            Command::GetBatteryCap,
            MessageEvent::BatteryCapabilities,
            Reply::Response,
            |engine| engine.send_extended(ExtendedMessageType::GetBatteryCap, &extended::single_byte(reference)),
        )
    }

    pub(super) fn get_battery_status(&mut self) -> State {
        let reference = self.device_policy_manager.battery_reference();

        self.query(
            Command::GetBatteryStatus,
            MessageEvent::BatteryStatus,
            Reply::Response,
            |engine| engine.send_extended(ExtendedMessageType::GetBatteryStatus, &extended::single_byte(reference)),
        )
    }

    pub(super) fn get_manufacturer_info(&mut self) -> State {
        self.query(
            Command::GetManufacturerInfo,
            MessageEvent::ManufacturerInfo,
            Reply::Response,
            // Port information.
            |engine| engine.send_extended(ExtendedMessageType::GetManufacturerInfo, &[0, 0]),
        )
    }

    pub(super) fn get_country_codes(&mut self) -> State {
        self.query(
            Command::GetCountryCodes,
            MessageEvent::CountryCodes,
            Reply::Response,
            |engine| engine.send_control(ControlMessageType::GetCountryCodes),
        )
    }

    pub(super) fn get_country_info(&mut self) -> State {
        let country = self.device_policy_manager.country();
        let object = (u32::from(country[0]) << 24) | (u32::from(country[1]) << 16);

        self.query(
            Command::GetCountryInfo,
            MessageEvent::CountryInfo,
            Reply::Response,
            |engine| engine.send_data(DataMessageType::GetCountryInfo, &[object]),
        )
    }

    pub(super) fn send_security_request(&mut self) -> State {
        self.defer(Deferred::SecurityRequest)
    }

    pub(super) fn security_response_received(&mut self) -> State {
        self.defer(Deferred::SecurityResponse)
    }

    pub(super) fn send_firmware_update_request(&mut self) -> State {
        self.defer(Deferred::FirmwareUpdateRequest)
    }

    pub(super) fn firmware_update_response_received(&mut self) -> State {
        self.defer(Deferred::FirmwareUpdateResponse)
    }

    /// The carrier is transmitted by the PHY, for tBISTContMode.
    pub(super) fn bist_carrier_mode(&mut self) -> State {
        self.device_policy_manager.inform_event(Event::BistCarrierMode);

        if let Some(state) = self.settle(TimerType::BistContMode) {
            return state;
        }

        self.ready_state()
    }
}
