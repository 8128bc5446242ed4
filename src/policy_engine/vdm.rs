//! Structured and unstructured vendor defined messages.
//!
//! As responder, the port answers discovery and mode requests from its configured SVIDs and the
//! decisions of the device policy manager. As initiator, a request state sends the command and
//! hands over to [`State::DfpVdmEvaluate`], which waits for the reply and fans out to the
//! acknowledged or refused states, or sends the request again on timeout.
use heapless::Vec;

use super::{PolicyEngine, State, VdmRequest};
use crate::device_policy_manager::{DevicePolicyManager, Event, ModeTarget};
use crate::events::{Command, MessageEvent};
use crate::protocol_layer::ProtocolLayer;
use crate::protocol_layer::message::header::DataMessageType;
use crate::protocol_layer::message::vendor_defined::{
    CONNECTOR_RECEPTACLE, DISPLAYPORT_SID, IdentityHeader, PD_SID, ProductTypeDfp, ProductTypeUfp, ProductVdo,
    SvidVdo, VdmCommand, VdmCommandType, VdmHeaderStructured, VdmHeaderUnstructured, VdmVersion,
};
use crate::timers::{Clock, Stopwatch, TimerType};
use crate::PortController;

/// UFP VDO: version 1.3, USB 2.0 billboard-less peripheral.
const UFP_VDO: u32 = (0b011 << 29) | (0b0001 << 24);
/// DFP VDO: version 1.2, USB 2.0 host.
const DFP_VDO: u32 = (0b010 << 29) | (0b001 << 24);

/// Attempts for requests other than Discover Identity, which is bound by its own counter.
const REQUEST_ATTEMPTS: u8 = 2;

/// Object position that addresses all modes of an SVID on exit.
const EXIT_ALL_MODES: u8 = 7;

fn marker(command: VdmCommand) -> Option<MessageEvent> {
    match command {
        VdmCommand::DiscoverIdentity => Some(MessageEvent::DiscoverIdentity),
        VdmCommand::DiscoverSvids => Some(MessageEvent::DiscoverSvids),
        VdmCommand::DiscoverModes => Some(MessageEvent::DiscoverModes),
        VdmCommand::EnterMode => Some(MessageEvent::EnterMode),
        VdmCommand::ExitMode => Some(MessageEvent::ExitMode),
        VdmCommand::Attention => Some(MessageEvent::Attention),
        VdmCommand::DisplayPortStatus => Some(MessageEvent::DisplayPortStatus),
        VdmCommand::DisplayPortConfigure => Some(MessageEvent::DisplayPortConfigure),
        VdmCommand::Other(_) => None,
    }
}

fn command(command: VdmCommand) -> Option<Command> {
    match command {
        VdmCommand::DiscoverIdentity => Some(Command::DiscoverIdentity),
        VdmCommand::DiscoverSvids => Some(Command::DiscoverSvids),
        VdmCommand::DiscoverModes => Some(Command::DiscoverModes),
        VdmCommand::EnterMode => Some(Command::EnterMode),
        VdmCommand::ExitMode => Some(Command::ExitMode),
        VdmCommand::Attention => Some(Command::Attention),
        VdmCommand::DisplayPortStatus => Some(Command::DisplayPortStatus),
        VdmCommand::DisplayPortConfigure => Some(Command::DisplayPortConfigure),
        VdmCommand::Other(_) => None,
    }
}

impl<PROTOCOL: ProtocolLayer, PORT: PortController, DPM: DevicePolicyManager, CLOCK: Clock>
    PolicyEngine<PROTOCOL, PORT, DPM, CLOCK>
{
    fn vdm_version(&self) -> VdmVersion {
        if self.spec_revision.is_pd3() {
            VdmVersion::V2_1
        } else {
            VdmVersion::V1_0
        }
    }

    fn rx_vdm_header(&self) -> VdmHeaderStructured {
        VdmHeaderStructured(self.protocol_layer.rx_message().object(0).unwrap_or_default())
    }

    /// The mode that a received request addresses.
    fn rx_mode_target(&self) -> ModeTarget {
        let header = self.rx_vdm_header();

        ModeTarget {
            svid: header.svid(),
            object_position: header.object_position(),
        }
    }

    fn send_vdm(&mut self, header: VdmHeaderStructured, vdos: &[u32]) -> bool {
        let mut objects: Vec<u32, 7> = Vec::new();
        let _ = objects.push(header.0);
        let _ = objects.extend_from_slice(&vdos[..vdos.len().min(6)]);

        self.send_data(DataMessageType::VendorDefined, &objects)
    }

    /// Answer the received request, and return to the ready state.
    fn respond(&mut self, svid: u16, command_type: VdmCommandType, vdos: &[u32]) -> State {
        let request = self.rx_vdm_header();
        let header = VdmHeaderStructured::new(svid, self.vdm_version(), request.command(), command_type)
            .with_object_position(request.object_position());

        self.clock.delay_ms(TimerType::VdmReplyDelay.duration_ms());

        if self.send_vdm(header, vdos) {
            self.ready_state()
        } else {
            self.send_soft_reset_state()
        }
    }

    /// Send a request as initiator, and wait for its reply in the evaluation state.
    fn request(&mut self, svid: u16, command: VdmCommand, object_position: u8, vdos: &[u32]) -> State {
        if let Some(event) = marker(command) {
            self.protocol_layer.get_status(event);
        }

        let header = VdmHeaderStructured::new(svid, self.vdm_version(), command, VdmCommandType::InitiatorReq)
            .with_object_position(object_position);

        if !self.send_vdm(header, vdos) {
            self.vdm.request = None;
            return self.send_soft_reset_state();
        }

        let attempts = self.vdm.request.map_or(1, |request| request.attempts.saturating_add(1));
        self.vdm.request = Some(VdmRequest {
            command,
            origin: self.state,
            timer: Stopwatch::new(&self.clock),
            attempts,
        });

        State::DfpVdmEvaluate
    }

    pub(super) fn ufp_vdm_get_identity(&mut self) -> State {
        let header = self.rx_vdm_header();

        if header.command_type() != VdmCommandType::InitiatorReq {
            return State::DfpVdmEvaluate;
        }

        if header.svid() == PD_SID {
            State::UfpVdmSendIdentity
        } else {
            State::UfpVdmGetIdentityNak
        }
    }

    pub(super) fn ufp_vdm_send_identity(&mut self) -> State {
        let identity = self.config.identity;
        let pd3 = self.spec_revision.is_pd3();

        let mut id_header = IdentityHeader(0)
            .with_host_data(true)
            .with_device_data(true)
            .with_product_type_ufp(ProductTypeUfp::PdUsbPeripheral)
            .with_modal_supported(!self.config.svids.is_empty())
            .with_vid(identity.vendor_id);

        if pd3 {
            id_header = id_header
                .with_product_type_dfp(ProductTypeDfp::PdUsbHost)
                .with_connector_type(CONNECTOR_RECEPTACLE);
        }

        let product = ProductVdo(0)
            .with_pid(identity.product_id)
            .with_bcd_device(identity.bcd_device);

        let mut vdos: Vec<u32, 6> = Vec::new();
        let _ = vdos.extend_from_slice(&[id_header.0, 0, product.0]);
        if pd3 {
            let _ = vdos.extend_from_slice(&[UFP_VDO, 0, DFP_VDO]);
        }

        self.respond(PD_SID, VdmCommandType::ResponderAck, &vdos)
    }

    pub(super) fn ufp_vdm_get_svids(&mut self) -> State {
        let header = self.rx_vdm_header();

        if header.command_type() != VdmCommandType::InitiatorReq {
            return State::DfpVdmEvaluate;
        }

        if header.svid() == PD_SID && !self.config.svids.is_empty() {
            State::UfpVdmSendSvids
        } else {
            State::UfpVdmGetSvidsNak
        }
    }

    pub(super) fn ufp_vdm_send_svids(&mut self) -> State {
        let mut vdos: Vec<u32, 6> = Vec::new();

        for pair in self.config.svids.chunks(2) {
            let vdo = SvidVdo(0)
                .with_svid_0(pair[0])
                .with_svid_1(pair.get(1).copied().unwrap_or_default());
            let _ = vdos.push(vdo.0);
        }

        // A full last object is followed by a terminating, empty one.
        if self.config.svids.len() % 2 == 0 {
            let _ = vdos.push(0);
        }

        self.respond(PD_SID, VdmCommandType::ResponderAck, &vdos)
    }

    pub(super) fn ufp_vdm_get_modes(&mut self) -> State {
        let header = self.rx_vdm_header();

        if header.command_type() != VdmCommandType::InitiatorReq {
            return State::DfpVdmEvaluate;
        }

        let svid = header.svid();
        if self.config.svids.contains(&svid) && !self.device_policy_manager.modes(svid).is_empty() {
            State::UfpVdmSendModes
        } else {
            State::UfpVdmGetModesNak
        }
    }

    pub(super) fn ufp_vdm_send_modes(&mut self) -> State {
        let svid = self.rx_vdm_header().svid();
        let modes = self.device_policy_manager.modes(svid);

        self.respond(svid, VdmCommandType::ResponderAck, &modes)
    }

    pub(super) fn ufp_vdm_evaluate_mode_entry(&mut self) -> State {
        let header = self.rx_vdm_header();

        if header.command_type() != VdmCommandType::InitiatorReq {
            return State::DfpVdmEvaluate;
        }

        let target = self.rx_mode_target();
        let known = self.config.svids.contains(&target.svid) && target.object_position != 0;

        if known && self.vdm.entered_mode.is_none() && self.device_policy_manager.evaluate_mode_entry(target) {
            State::UfpVdmModeEntryAck
        } else {
            State::UfpVdmModeEntryNak
        }
    }

    pub(super) fn ufp_vdm_mode_entry_ack(&mut self) -> State {
        let target = self.rx_mode_target();

        self.vdm.entered_mode = Some(target);
        self.modal_operation = true;
        self.device_policy_manager.inform_event(Event::ModeEntered(target));

        self.respond(target.svid, VdmCommandType::ResponderAck, &[])
    }

    pub(super) fn ufp_vdm_mode_exit(&mut self) -> State {
        let header = self.rx_vdm_header();

        if header.command_type() != VdmCommandType::InitiatorReq {
            return State::DfpVdmEvaluate;
        }

        let target = self.rx_mode_target();
        let entered = self.vdm.entered_mode.is_some_and(|mode| {
            mode.svid == target.svid
                && (mode.object_position == target.object_position || target.object_position == EXIT_ALL_MODES)
        });

        if entered {
            State::UfpVdmModeExitAck
        } else {
            State::UfpVdmModeExitNak
        }
    }

    pub(super) fn ufp_vdm_mode_exit_ack(&mut self) -> State {
        let target = self.rx_mode_target();

        self.exit_mode(target);
        self.respond(target.svid, VdmCommandType::ResponderAck, &[])
    }

    pub(super) fn ufp_vdm_mode_exit_nak(&mut self) -> State {
        let svid = self.rx_vdm_header().svid();
        self.respond(svid, VdmCommandType::ResponderNak, &[])
    }

    /// Refuse the received request.
    pub(super) fn ufp_vdm_nak(&mut self) -> State {
        let svid = self.rx_vdm_header().svid();
        self.respond(svid, VdmCommandType::ResponderNak, &[])
    }

    /// Send Attention for the entered mode, with the present DisplayPort status, if any.
    pub(super) fn ufp_vdm_attention_request(&mut self) -> State {
        let target = self.vdm.entered_mode.unwrap_or(ModeTarget {
            svid: DISPLAYPORT_SID,
            object_position: 1,
        });

        let mut vdos: Vec<u32, 1> = Vec::new();
        if let Some(status) = self.device_policy_manager.displayport_status() {
            let _ = vdos.push(status);
        }

        let header = VdmHeaderStructured::new(
            target.svid,
            self.vdm_version(),
            VdmCommand::Attention,
            VdmCommandType::InitiatorReq,
        )
        .with_object_position(target.object_position);

        if self.send_vdm(header, &vdos) {
            self.ready_state()
        } else {
            self.send_soft_reset_state()
        }
    }

    pub(super) fn ufp_vdm_evaluate_status(&mut self) -> State {
        let header = self.rx_vdm_header();

        if header.command_type() != VdmCommandType::InitiatorReq {
            return State::DfpVdmEvaluate;
        }

        if header.svid() == DISPLAYPORT_SID && self.device_policy_manager.displayport_status().is_some() {
            State::UfpVdmStatusAck
        } else {
            State::UfpVdmStatusNak
        }
    }

    pub(super) fn ufp_vdm_status_ack(&mut self) -> State {
        let status = self.device_policy_manager.displayport_status().unwrap_or_default();
        self.respond(DISPLAYPORT_SID, VdmCommandType::ResponderAck, &[status])
    }

    pub(super) fn ufp_vdm_evaluate_configure(&mut self) -> State {
        let header = self.rx_vdm_header();

        if header.command_type() != VdmCommandType::InitiatorReq {
            return State::DfpVdmEvaluate;
        }

        let configuration = self.protocol_layer.rx_message().object(1).unwrap_or_default();

        if header.svid() == DISPLAYPORT_SID && self.device_policy_manager.displayport_configure(configuration) {
            State::UfpVdmConfigureAck
        } else {
            State::UfpVdmConfigureNak
        }
    }

    pub(super) fn ufp_vdm_configure_ack(&mut self) -> State {
        self.respond(DISPLAYPORT_SID, VdmCommandType::ResponderAck, &[])
    }

    pub(super) fn dfp_vdm_identity_request(&mut self) -> State {
        if self.discover_identity_counter.increment().is_err() || self.discover_identity_counter.is_exhausted() {
            error!("Discover Identity not answered");
            self.vdm.request = None;
            self.device_policy_manager.inform_event(Event::IdentityNaked);
            return self.ready_state();
        }

        self.request(PD_SID, VdmCommand::DiscoverIdentity, 0, &[])
    }

    pub(super) fn dfp_vdm_identity_acked(&mut self) -> State {
        let identity = IdentityHeader(self.protocol_layer.rx_message().object(1).unwrap_or_default());

        self.device_policy_manager.inform_event(Event::IdentityAcked {
            vendor_id: identity.vid(),
            modal_supported: identity.modal_supported(),
        });
        self.ready_state()
    }

    pub(super) fn dfp_vdm_svids_request(&mut self) -> State {
        self.request(PD_SID, VdmCommand::DiscoverSvids, 0, &[])
    }

    pub(super) fn dfp_vdm_svids_acked(&mut self) -> State {
        let mut svids: Vec<u16, 12> = Vec::new();

        'objects: for object in self.protocol_layer.rx_message().objects().iter().skip(1) {
            let vdo = SvidVdo(*object);

            for svid in [vdo.svid_0(), vdo.svid_1()] {
                if svid == 0 {
                    break 'objects;
                }
                let _ = svids.push(svid);
            }
        }

        self.vdm.svids = svids.clone();
        self.device_policy_manager.inform_event(Event::SvidsAcked(svids));
        self.ready_state()
    }

    pub(super) fn dfp_vdm_modes_request(&mut self) -> State {
        let Some(target) = self.device_policy_manager.mode_target(&self.vdm.svids) else {
            warn!("No SVID to discover modes for");
            self.vdm.request = None;
            return self.ready_state();
        };

        self.request(target.svid, VdmCommand::DiscoverModes, 0, &[])
    }

    pub(super) fn dfp_vdm_modes_acked(&mut self) -> State {
        let svid = self.rx_vdm_header().svid();
        let mut modes: Vec<u32, 6> = Vec::new();
        let _ = modes.extend_from_slice(self.protocol_layer.rx_message().objects().get(1..).unwrap_or_default());

        self.vdm.modes = modes.clone();
        self.device_policy_manager
            .inform_event(Event::ModesAcked { svid, modes });
        self.ready_state()
    }

    pub(super) fn dfp_vdm_mode_entry_request(&mut self) -> State {
        if let Some(entered) = self.vdm.entered_mode {
            warn!("Mode {:?} is entered, exit first", entered);
            self.vdm.request = None;
            return self.ready_state();
        }

        let Some(target) = self.device_policy_manager.mode_target(&self.vdm.svids) else {
            warn!("No mode to enter");
            self.vdm.request = None;
            return self.ready_state();
        };

        self.request(target.svid, VdmCommand::EnterMode, target.object_position, &[])
    }

    pub(super) fn dfp_vdm_mode_entry_acked(&mut self) -> State {
        let target = self.rx_mode_target();

        self.vdm.entered_mode = Some(target);
        self.modal_operation = true;
        self.device_policy_manager.inform_event(Event::ModeEntered(target));
        self.ready_state()
    }

    pub(super) fn dfp_vdm_mode_entry_naked(&mut self) -> State {
        let target = self.rx_mode_target();

        self.device_policy_manager.inform_event(Event::ModeEntryNaked(target));
        self.ready_state()
    }

    pub(super) fn dfp_vdm_mode_exit_request(&mut self) -> State {
        let Some(target) = self.vdm.entered_mode else {
            warn!("No mode entered");
            self.vdm.request = None;
            return self.ready_state();
        };

        self.request(target.svid, VdmCommand::ExitMode, target.object_position, &[])
    }

    /// Exit acknowledged or refused: either way, the mode is left.
    pub(super) fn dfp_vdm_mode_exit_done(&mut self) -> State {
        let target = self.vdm.entered_mode.unwrap_or_else(|| self.rx_mode_target());

        if self.state == State::DfpVdmModeExitAcked {
            self.exit_mode(target);
        } else {
            warn!("Mode exit refused");
            self.vdm.entered_mode = None;
            self.modal_operation = false;
            self.device_policy_manager.inform_event(Event::ModeExitNaked(target));
        }

        self.ready_state()
    }

    fn exit_mode(&mut self, target: ModeTarget) {
        self.vdm.entered_mode = None;
        self.modal_operation = false;
        self.device_policy_manager.inform_event(Event::ModeExited(target));
    }

    pub(super) fn dfp_vdm_attention_request(&mut self) -> State {
        let svid = self.rx_vdm_header().svid();
        let vdo = self.protocol_layer.rx_message().object(1);

        self.device_policy_manager
            .inform_event(Event::Attention { svid, vdo });
        self.ready_state()
    }

    pub(super) fn dfp_vdm_status_update(&mut self) -> State {
        let position = self.vdm.entered_mode.map_or(1, |mode| mode.object_position);
        let status = self.device_policy_manager.displayport_status().unwrap_or_default();

        self.request(DISPLAYPORT_SID, VdmCommand::DisplayPortStatus, position, &[status])
    }

    pub(super) fn dfp_vdm_status_update_acked(&mut self) -> State {
        let status = self.protocol_layer.rx_message().object(1).unwrap_or_default();

        self.device_policy_manager
            .inform_event(Event::DisplayPortStatusAcked(status));
        self.ready_state()
    }

    pub(super) fn dfp_vdm_displayport_configure(&mut self) -> State {
        let position = self.vdm.entered_mode.map_or(1, |mode| mode.object_position);
        let configuration = self.device_policy_manager.displayport_configuration();

        self.request(DISPLAYPORT_SID, VdmCommand::DisplayPortConfigure, position, &[configuration])
    }

    /// Replies that only notify the device policy manager.
    pub(super) fn dfp_vdm_inform(&mut self) -> State {
        let event = match self.state {
            State::DfpVdmIdentityNaked => Event::IdentityNaked,
            State::DfpVdmSvidsNaked => Event::SvidsNaked,
            State::DfpVdmModesNaked => Event::ModesNaked,
            State::DfpVdmStatusUpdateNaked => Event::DisplayPortStatusNaked,
            State::DfpVdmDisplayPortConfigureAcked => Event::DisplayPortConfigureAcked,
            _ => Event::DisplayPortConfigureNaked,
        };

        self.device_policy_manager.inform_event(event);
        self.ready_state()
    }

    /// Wait for the reply to a pending request, or evaluate a received VDM.
    pub(super) fn dfp_vdm_evaluate(&mut self) -> State {
        let Some(request) = self.vdm.request else {
            return self.evaluate_vdm();
        };

        let Some(event) = marker(request.command) else {
            self.vdm.request = None;
            return self.ready_state();
        };

        loop {
            if let Some(state) = self.interrupted() {
                self.vdm.request = None;
                return state;
            }

            if request.timer.elapsed_ms(&self.clock) > TimerType::MessageGuard.duration_ms()
                && self.protocol_layer.get_status(event)
            {
                self.vdm.request = None;
                return self.evaluate_vdm();
            }

            if request.timer.expired(&self.clock, TimerType::VdmSenderResponse) {
                return self.request_timeout(request);
            }
        }
    }

    fn request_timeout(&mut self, request: VdmRequest) -> State {
        let resend = match request.command {
            VdmCommand::DiscoverIdentity => !self.discover_identity_counter.is_exhausted(),
            _ => request.attempts < REQUEST_ATTEMPTS,
        };

        if resend {
            debug!("Resend {:?}", request.command);
            return request.origin;
        }

        self.vdm.request = None;
        if let Some(command) = command(request.command) {
            self.device_policy_manager.inform_event(Event::NoResponse(command));
        }

        self.ready_state()
    }

    /// Fan out on the received VDM.
    fn evaluate_vdm(&mut self) -> State {
        let header = self.rx_vdm_header();

        if !header.structured() {
            return self.ready_state();
        }

        let acked = match header.command_type() {
            VdmCommandType::ResponderAck => true,
            VdmCommandType::ResponderNak | VdmCommandType::ResponderBusy => false,
            VdmCommandType::InitiatorReq => {
                return match header.command() {
                    VdmCommand::Attention => State::DfpVdmAttentionRequest,
                    VdmCommand::DiscoverIdentity => State::UfpVdmGetIdentityNak,
                    VdmCommand::DiscoverSvids => State::UfpVdmGetSvidsNak,
                    VdmCommand::DiscoverModes => State::UfpVdmGetModesNak,
                    VdmCommand::EnterMode => State::UfpVdmModeEntryNak,
                    VdmCommand::ExitMode => State::UfpVdmModeExitNak,
                    VdmCommand::DisplayPortStatus => State::UfpVdmStatusNak,
                    VdmCommand::DisplayPortConfigure => State::UfpVdmConfigureNak,
                    VdmCommand::Other(_) => self.ready_state(),
                };
            }
        };

        match (header.command(), acked) {
            (VdmCommand::DiscoverIdentity, true) => State::DfpVdmIdentityAcked,
            (VdmCommand::DiscoverIdentity, false) => State::DfpVdmIdentityNaked,
            (VdmCommand::DiscoverSvids, true) => State::DfpVdmSvidsAcked,
            (VdmCommand::DiscoverSvids, false) => State::DfpVdmSvidsNaked,
            (VdmCommand::DiscoverModes, true) => State::DfpVdmModesAcked,
            (VdmCommand::DiscoverModes, false) => State::DfpVdmModesNaked,
            (VdmCommand::EnterMode, true) => State::DfpVdmModeEntryAcked,
            (VdmCommand::EnterMode, false) => State::DfpVdmModeEntryNaked,
            (VdmCommand::ExitMode, true) => State::DfpVdmModeExitAcked,
            (VdmCommand::ExitMode, false) => State::DfpVdmModeExitNaked,
            (VdmCommand::DisplayPortStatus, true) => State::DfpVdmStatusUpdateAcked,
            (VdmCommand::DisplayPortStatus, false) => State::DfpVdmStatusUpdateNaked,
            (VdmCommand::DisplayPortConfigure, true) => State::DfpVdmDisplayPortConfigureAcked,
            (VdmCommand::DisplayPortConfigure, false) => State::DfpVdmDisplayPortConfigureNaked,
            (VdmCommand::Attention, _) => State::DfpVdmAttentionRequest,
            (VdmCommand::Other(_), _) => self.ready_state(),
        }
    }

    pub(super) fn dfp_uvdm_send_message(&mut self) -> State {
        let header = VdmHeaderUnstructured(0)
            .with_vid(self.config.identity.vendor_id)
            .with_structured(false);
        let content = self.device_policy_manager.unstructured_vdm();

        let mut objects: Vec<u32, 7> = Vec::new();
        let _ = objects.push(header.0);
        let _ = objects.extend_from_slice(&content);

        if !self.send_data(DataMessageType::VendorDefined, &objects) {
            return self.send_soft_reset_state();
        }

        self.device_policy_manager.inform_event(Event::UnstructuredVdmSent);
        self.ready_state()
    }

    pub(super) fn dfp_uvdm_receive_message(&mut self) -> State {
        let mut objects: Vec<u32, 7> = Vec::new();
        let _ = objects.extend_from_slice(self.protocol_layer.rx_message().objects());

        self.device_policy_manager
            .inform_event(Event::UnstructuredVdmReceived(objects));
        self.ready_state()
    }
}
