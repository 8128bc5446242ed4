//! Tests for the policy engine.
use super::{Config, PolicyEngine, State, VdmRequest};
use crate::device_policy_manager::{Event, ModeTarget, RequestEvaluation};
use crate::dummy::{
    Action, DummyClock, DummyDevicePolicyManager, DummyPortController, DummyProtocolLayer, PortCall, Trigger,
    partner_control, partner_data, partner_header, partner_vdm,
};
use crate::events::Command;
use crate::protocol_layer::ProtocolLayer;
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::extended;
use crate::protocol_layer::message::header::{
    ControlMessageType, DataMessageType, ExtendedMessageType, MessageType, SpecificationRevision,
};
use crate::protocol_layer::message::pdo::FixedSupply;
use crate::protocol_layer::message::request::FixedVariableSupply;
use crate::protocol_layer::message::vendor_defined::{
    AlertDataObject, DISPLAYPORT_SID, IdentityHeader, PD_SID, VdmCommand, VdmCommandType, VdmHeaderStructured,
};
use crate::timers::{Stopwatch, TimerType};
use crate::{DataRole, PowerRole, RpLevel};

type Engine = PolicyEngine<DummyProtocolLayer, DummyPortController, DummyDevicePolicyManager, DummyClock>;

const SOURCE_CAPABILITIES: MessageType = MessageType::Data(DataMessageType::SourceCapabilities);
const REQUEST: MessageType = MessageType::Data(DataMessageType::Request);
const VENDOR_DEFINED: MessageType = MessageType::Data(DataMessageType::VendorDefined);

fn get_policy_engine(power_role: PowerRole) -> Engine {
    get_policy_engine_with(Config {
        initial_power_role: power_role,
        ..Config::default()
    })
}

fn get_policy_engine_with(config: Config) -> Engine {
    let clock = DummyClock::new();

    PolicyEngine::new(
        DummyProtocolLayer::with_clock(clock.clone()),
        DummyPortController::new(),
        DummyDevicePolicyManager::new(),
        clock,
        config,
    )
}

fn request_5v() -> u32 {
    FixedVariableSupply::new(1, 50, 50).0
}

fn source_capabilities(revision: SpecificationRevision) -> Message {
    Message::data(
        partner_header(PowerRole::Source, revision),
        DataMessageType::SourceCapabilities,
        &[FixedSupply::new_dual_role_5v().0],
    )
}

fn sink_request() -> Message {
    partner_data(PowerRole::Sink, DataMessageType::Request, &[request_5v()])
}

/// Negotiate 5 V as source, with a PD 3.x sink.
fn source_ready() -> Engine {
    let mut policy_engine = get_policy_engine(PowerRole::Source);
    policy_engine
        .protocol_layer
        .on(Trigger::Sent(SOURCE_CAPABILITIES), vec![Action::Receive(sink_request())]);

    policy_engine.run();
    assert_eq!(policy_engine.state(), State::SrcReady);

    policy_engine
}

/// Negotiate 5 V as sink, with a source of the given revision.
fn sink_ready(revision: SpecificationRevision) -> Engine {
    let mut policy_engine = get_policy_engine(PowerRole::Sink);
    simulate_source_capabilities(&mut policy_engine, revision);

    policy_engine.run();
    assert_eq!(policy_engine.state(), State::SnkReady);

    policy_engine
}

/// The source advertises on the next protocol reset, and accepts the next request.
fn simulate_source_capabilities(policy_engine: &mut Engine, revision: SpecificationRevision) {
    policy_engine
        .protocol_layer
        .on(Trigger::Reset, vec![Action::Receive(source_capabilities(revision))]);
    simulate_accept_request(policy_engine);
}

fn simulate_accept_request(policy_engine: &mut Engine) {
    policy_engine.protocol_layer.on(
        Trigger::Sent(REQUEST),
        vec![
            Action::Receive(partner_control(PowerRole::Source, ControlMessageType::Accept)),
            Action::Receive(partner_control(PowerRole::Source, ControlMessageType::PsRdy)),
        ],
    );
}

fn simulate_receive(policy_engine: &mut Engine, message: Message) {
    policy_engine.protocol_layer.inject(message);
    policy_engine.run();
}

fn last_vdm_header(policy_engine: &Engine) -> VdmHeaderStructured {
    policy_engine
        .protocol_layer
        .sent()
        .last()
        .and_then(Message::vdm_header)
        .unwrap()
}

fn position_of(policy_engine: &Engine, message_type: MessageType) -> usize {
    policy_engine
        .protocol_layer
        .sent_types()
        .iter()
        .position(|sent| *sent == message_type)
        .unwrap()
}

fn count_events(policy_engine: &mut Engine, predicate: impl Fn(&Event) -> bool) -> usize {
    policy_engine
        .device_policy_manager()
        .events
        .iter()
        .filter(|event| predicate(event))
        .count()
}

#[test]
fn source_negotiates_contract() {
    let mut policy_engine = source_ready();

    let contract = *policy_engine.contract();
    assert!(contract.explicit);
    assert_eq!(contract.selected_object_position, 1);
    assert_eq!(policy_engine.spec_revision(), SpecificationRevision::R3_X);

    let sent = policy_engine.protocol_layer.sent_types();
    let accept = sent
        .iter()
        .position(|message_type| *message_type == MessageType::Control(ControlMessageType::Accept))
        .unwrap();
    let ps_rdy = sent
        .iter()
        .position(|message_type| *message_type == MessageType::Control(ControlMessageType::PsRdy))
        .unwrap();
    assert!(accept < ps_rdy);

    let sent_at = policy_engine.protocol_layer.sent_at();
    assert!(sent_at[ps_rdy] - sent_at[accept] >= TimerType::SrcTransition.duration_ms());

    assert!(policy_engine.port_controller.called(PortCall::ApplySupply(1)));
    assert!(policy_engine.device_policy_manager().received(&Event::ContractEstablished(1)));

    // Collision avoidance allows the sink to transmit.
    assert_eq!(
        policy_engine
            .port_controller
            .calls
            .iter()
            .rev()
            .find(|call| matches!(call, PortCall::Rp(_))),
        Some(&PortCall::Rp(RpLevel::Rp330))
    );
}

#[test]
fn source_repeats_identical_request() {
    let mut policy_engine = source_ready();
    let contract = *policy_engine.contract();

    simulate_receive(&mut policy_engine, sink_request());

    assert_eq!(policy_engine.state(), State::SrcReady);
    assert_eq!(*policy_engine.contract(), contract);
    assert_eq!(
        policy_engine
            .port_controller
            .calls
            .iter()
            .filter(|call| **call == PortCall::ApplySupply(1))
            .count(),
        1
    );
    assert_eq!(
        policy_engine
            .protocol_layer
            .count_sent(MessageType::Control(ControlMessageType::PsRdy)),
        2
    );
}

#[test]
fn source_rejects_request_in_ready() {
    let mut policy_engine = source_ready();
    let contract = *policy_engine.contract();
    policy_engine.device_policy_manager().evaluation = RequestEvaluation::Reject;

    simulate_receive(&mut policy_engine, sink_request());

    assert_eq!(policy_engine.state(), State::SrcReady);
    assert!(
        policy_engine
            .protocol_layer
            .has_sent(MessageType::Control(ControlMessageType::Reject))
    );
    assert_eq!(*policy_engine.contract(), contract);
}

#[test]
fn source_disabled_after_caps_count() {
    let mut policy_engine = get_policy_engine_with(Config {
        initial_power_role: PowerRole::Source,
        caps_count: 6,
        ..Config::default()
    });
    policy_engine.protocol_layer.fail(SOURCE_CAPABILITIES, usize::MAX);

    policy_engine.run();

    assert_eq!(policy_engine.state(), State::SrcDisabled);
    assert_eq!(policy_engine.protocol_layer.failed().len(), 7);
    assert_eq!(policy_engine.caps_counter.value(), 7);
    assert!(policy_engine.device_policy_manager().received(&Event::SourceDisabled));
}

#[test]
fn detach_stops_traversal() {
    let mut policy_engine = get_policy_engine(PowerRole::Source);
    policy_engine.protocol_layer.on(
        Trigger::Sent(SOURCE_CAPABILITIES),
        vec![Action::Receive(sink_request()), Action::Detach],
    );

    policy_engine.run();
    assert_eq!(policy_engine.state(), State::SrcSendCapabilities);
    assert_eq!(policy_engine.protocol_layer.sent().len(), 1);

    // Stays idle while detached.
    policy_engine.run();
    assert_eq!(policy_engine.protocol_layer.sent().len(), 1);
    assert!(!policy_engine.contract().explicit);
}

#[test]
fn source_hard_reset_during_negotiation() {
    let mut policy_engine = get_policy_engine(PowerRole::Source);
    policy_engine
        .protocol_layer
        .on(Trigger::Sent(SOURCE_CAPABILITIES), vec![Action::HardReset]);
    policy_engine
        .protocol_layer
        .on(Trigger::Sent(SOURCE_CAPABILITIES), vec![Action::Receive(sink_request())]);

    policy_engine.run();

    assert_eq!(policy_engine.state(), State::SrcReady);
    assert_eq!(policy_engine.protocol_layer.count_sent(SOURCE_CAPABILITIES), 2);
    assert!(policy_engine.device_policy_manager().received(&Event::HardReset));
    assert!(policy_engine.port_controller.called(PortCall::Otg(false)));
}

#[test]
fn sink_negotiates_contract() {
    let mut policy_engine = sink_ready(SpecificationRevision::R3_X);

    assert!(policy_engine.contract().explicit);
    assert_eq!(policy_engine.contract().selected_object_position, 1);
    assert_eq!(policy_engine.protocol_layer.count_sent(REQUEST), 1);
    assert!(matches!(
        policy_engine.device_policy_manager().events.as_slice(),
        [Event::SourceCapabilities(_), Event::ContractEstablished(1)]
    ));
}

#[test]
fn sink_hard_resets_without_capabilities() {
    let mut policy_engine = get_policy_engine(PowerRole::Sink);

    policy_engine.run();

    assert_eq!(policy_engine.state(), State::SnkWaitForCapabilities);
    assert_eq!(
        policy_engine
            .port_controller
            .calls
            .iter()
            .filter(|call| **call == PortCall::HardReset)
            .count(),
        3
    );
    assert!(policy_engine.protocol_layer.sent().is_empty());
}

#[test]
fn sink_hard_reset_in_ready() {
    let mut policy_engine = sink_ready(SpecificationRevision::R3_X);

    // The first protocol reset is in the transition to default, the second at startup.
    policy_engine.protocol_layer.on(Trigger::Reset, vec![]);
    simulate_source_capabilities(&mut policy_engine, SpecificationRevision::R3_X);
    policy_engine.protocol_layer.events().signal_hard_reset();

    policy_engine.run();

    assert_eq!(policy_engine.state(), State::SnkReady);
    assert!(policy_engine.device_policy_manager().received(&Event::HardReset));
    assert!(policy_engine.port_controller.called(PortCall::DriverReset));
    assert_eq!(
        count_events(&mut policy_engine, |event| matches!(event, Event::ContractEstablished(_))),
        2
    );
}

#[test]
fn sink_soft_resets_after_unacknowledged_requests() {
    let mut policy_engine = get_policy_engine(PowerRole::Sink);
    policy_engine.protocol_layer.on(
        Trigger::Reset,
        vec![Action::Receive(source_capabilities(SpecificationRevision::R3_X))],
    );
    policy_engine.protocol_layer.fail(REQUEST, 6);
    policy_engine.protocol_layer.on(
        Trigger::Sent(MessageType::Control(ControlMessageType::SoftReset)),
        vec![
            Action::Receive(partner_control(PowerRole::Source, ControlMessageType::Accept)),
            Action::Receive(source_capabilities(SpecificationRevision::R3_X)),
        ],
    );
    simulate_accept_request(&mut policy_engine);

    policy_engine.run();

    assert_eq!(policy_engine.protocol_layer.failed(), &[REQUEST; 6]);
    assert!(
        policy_engine
            .protocol_layer
            .has_sent(MessageType::Control(ControlMessageType::SoftReset))
    );
    assert_eq!(policy_engine.state(), State::SnkReady);
    assert!(policy_engine.contract().explicit);
}

#[test]
fn sink_answers_not_supported_on_pd3() {
    let mut policy_engine = sink_ready(SpecificationRevision::R3_X);

    simulate_receive(
        &mut policy_engine,
        partner_data(PowerRole::Source, DataMessageType::EnterUsb, &[0]),
    );

    assert_eq!(policy_engine.state(), State::SnkReady);
    assert!(matches!(
        policy_engine.protocol_layer.sent_types().last(),
        Some(MessageType::Control(ControlMessageType::NotSupported))
    ));
}

#[test]
fn sink_rejects_reserved_on_pd2() {
    let mut policy_engine = sink_ready(SpecificationRevision::R2_0);
    assert_eq!(policy_engine.spec_revision(), SpecificationRevision::R2_0);

    simulate_receive(
        &mut policy_engine,
        Message::control(
            partner_header(PowerRole::Source, SpecificationRevision::R2_0),
            ControlMessageType::Reserved,
        ),
    );

    assert_eq!(policy_engine.state(), State::SnkReady);
    assert!(matches!(
        policy_engine.protocol_layer.sent_types().last(),
        Some(MessageType::Control(ControlMessageType::Reject))
    ));
}

#[test]
fn sink_swaps_vconn_on_pd2() {
    let mut policy_engine = sink_ready(SpecificationRevision::R2_0);
    assert!(!policy_engine.vconn_source());

    simulate_receive(
        &mut policy_engine,
        partner_control(PowerRole::Source, ControlMessageType::VconnSwap),
    );

    assert_eq!(policy_engine.state(), State::SnkReady);
    assert!(policy_engine.vconn_source());
    assert!(policy_engine.port_controller.called(PortCall::VconnSource(true)));
    assert!(
        policy_engine
            .protocol_layer
            .has_sent(MessageType::Control(ControlMessageType::PsRdy))
    );
    assert!(policy_engine.device_policy_manager().received(&Event::VconnSourceChanged(true)));
}

#[test]
fn data_role_swap_round_trip() {
    let mut policy_engine = sink_ready(SpecificationRevision::R3_X);
    assert_eq!(policy_engine.data_role(), DataRole::Ufp);

    simulate_receive(
        &mut policy_engine,
        partner_control(PowerRole::Source, ControlMessageType::DrSwap),
    );
    assert_eq!(policy_engine.data_role(), DataRole::Dfp);

    simulate_receive(
        &mut policy_engine,
        partner_control(PowerRole::Source, ControlMessageType::DrSwap),
    );
    assert_eq!(policy_engine.data_role(), DataRole::Ufp);

    assert_eq!(policy_engine.state(), State::SnkReady);
    assert_eq!(
        policy_engine
            .protocol_layer
            .count_sent(MessageType::Control(ControlMessageType::Accept)),
        2
    );
    assert!(policy_engine.device_policy_manager().received(&Event::DataRoleChanged(DataRole::Dfp)));
    assert!(policy_engine.device_policy_manager().received(&Event::DataRoleChanged(DataRole::Ufp)));
}

#[test]
fn data_role_swap_rejected() {
    let mut policy_engine = sink_ready(SpecificationRevision::R3_X);
    policy_engine.device_policy_manager().accept_swaps = false;

    simulate_receive(
        &mut policy_engine,
        partner_control(PowerRole::Source, ControlMessageType::DrSwap),
    );

    assert_eq!(policy_engine.data_role(), DataRole::Ufp);
    assert!(matches!(
        policy_engine.protocol_layer.sent_types().last(),
        Some(MessageType::Control(ControlMessageType::Reject))
    ));
}

#[test]
fn data_role_swap_on_command() {
    let mut policy_engine = sink_ready(SpecificationRevision::R3_X);
    policy_engine.protocol_layer.on(
        Trigger::Sent(MessageType::Control(ControlMessageType::DrSwap)),
        vec![Action::Receive(partner_control(
            PowerRole::Source,
            ControlMessageType::Accept,
        ))],
    );

    policy_engine.post_command(Command::DrSwap);
    policy_engine.run();

    assert_eq!(policy_engine.state(), State::SnkReady);
    assert_eq!(policy_engine.data_role(), DataRole::Dfp);
    assert!(policy_engine.port_controller.called(PortCall::DataRole(DataRole::Dfp)));
}

#[test]
fn power_role_swap_without_source_recovers() {
    let mut policy_engine = source_ready();
    policy_engine.protocol_layer.on(Trigger::Reset, vec![Action::Detach]);

    simulate_receive(
        &mut policy_engine,
        partner_control(PowerRole::Sink, ControlMessageType::PrSwap),
    );

    assert_eq!(policy_engine.state(), State::SnkStartup);
    assert_eq!(policy_engine.power_role(), PowerRole::Sink);
    assert_eq!(policy_engine.data_role(), DataRole::Ufp);
    assert!(policy_engine.port_controller.called(PortCall::Rp(RpLevel::Rp0)));
    assert!(policy_engine.device_policy_manager().received(&Event::ErrorRecovery));
}

#[test]
fn ufp_naks_identity_for_unknown_svid() {
    let mut policy_engine = sink_ready(SpecificationRevision::R3_X);

    simulate_receive(
        &mut policy_engine,
        partner_vdm(
            PowerRole::Source,
            0x1234,
            VdmCommand::DiscoverIdentity,
            VdmCommandType::InitiatorReq,
            0,
            &[],
        ),
    );

    let header = last_vdm_header(&policy_engine);
    assert_eq!(header.command_type(), VdmCommandType::ResponderNak);
    assert_eq!(header.command(), VdmCommand::DiscoverIdentity);
    assert_eq!(header.svid(), 0x1234);
    assert_eq!(policy_engine.state(), State::SnkReady);
}

#[test]
fn ufp_reports_identity() {
    let mut policy_engine = sink_ready(SpecificationRevision::R3_X);

    simulate_receive(
        &mut policy_engine,
        partner_vdm(
            PowerRole::Source,
            PD_SID,
            VdmCommand::DiscoverIdentity,
            VdmCommandType::InitiatorReq,
            0,
            &[],
        ),
    );

    let response = policy_engine.protocol_layer.sent().last().unwrap().clone();
    let header = response.vdm_header().unwrap();
    assert_eq!(header.command_type(), VdmCommandType::ResponderAck);
    assert_eq!(response.objects().len(), 7);

    let identity = IdentityHeader(response.object(1).unwrap());
    assert_eq!(identity.vid(), 0x1209);
    assert!(identity.modal_supported());
}

#[test]
fn ufp_enters_and_exits_mode() {
    let mut policy_engine = sink_ready(SpecificationRevision::R3_X);
    policy_engine.device_policy_manager().modes.push(0x0C05).unwrap();
    let target = ModeTarget {
        svid: DISPLAYPORT_SID,
        object_position: 1,
    };
    let enter_mode = partner_vdm(
        PowerRole::Source,
        DISPLAYPORT_SID,
        VdmCommand::EnterMode,
        VdmCommandType::InitiatorReq,
        1,
        &[],
    );

    simulate_receive(&mut policy_engine, enter_mode.clone());
    assert_eq!(last_vdm_header(&policy_engine).command_type(), VdmCommandType::ResponderAck);
    assert!(policy_engine.vdm_state().is_mode_entered());
    assert!(policy_engine.modal_operation);

    // A mode is entered only once.
    simulate_receive(&mut policy_engine, enter_mode);
    assert_eq!(last_vdm_header(&policy_engine).command_type(), VdmCommandType::ResponderNak);
    assert_eq!(policy_engine.vdm_state().entered_mode, Some(target));

    simulate_receive(
        &mut policy_engine,
        partner_vdm(
            PowerRole::Source,
            DISPLAYPORT_SID,
            VdmCommand::ExitMode,
            VdmCommandType::InitiatorReq,
            1,
            &[],
        ),
    );
    let header = last_vdm_header(&policy_engine);
    assert_eq!(header.command(), VdmCommand::ExitMode);
    assert_eq!(header.command_type(), VdmCommandType::ResponderAck);
    assert!(!policy_engine.vdm_state().is_mode_entered());
    assert!(!policy_engine.modal_operation);

    let modes: Vec<_> = policy_engine
        .device_policy_manager()
        .events
        .iter()
        .filter(|event| matches!(event, Event::ModeEntered(_) | Event::ModeExited(_)))
        .cloned()
        .collect();
    assert_eq!(modes, [Event::ModeEntered(target), Event::ModeExited(target)]);
    assert_eq!(policy_engine.state(), State::SnkReady);
}

#[test]
fn dfp_discovers_identity() {
    let mut policy_engine = source_ready();
    let identity = IdentityHeader(0).with_vid(0x1234).with_modal_supported(true);
    policy_engine.protocol_layer.on(
        Trigger::Sent(VENDOR_DEFINED),
        vec![Action::Receive(partner_vdm(
            PowerRole::Sink,
            PD_SID,
            VdmCommand::DiscoverIdentity,
            VdmCommandType::ResponderAck,
            0,
            &[identity.0, 0, 0],
        ))],
    );

    policy_engine.post_command(Command::DiscoverIdentity);
    policy_engine.run();

    assert_eq!(policy_engine.state(), State::SrcReady);
    assert!(policy_engine.device_policy_manager().received(&Event::IdentityAcked {
        vendor_id: 0x1234,
        modal_supported: true,
    }));
    assert!(policy_engine.port_controller.called(PortCall::Rp(RpLevel::Rp180)));
    assert_eq!(policy_engine.protocol_layer.count_sent(VENDOR_DEFINED), 1);
}

#[test]
fn dfp_request_without_reply() {
    let mut policy_engine = source_ready();

    policy_engine.post_command(Command::DiscoverSvids);
    policy_engine.run();

    assert_eq!(policy_engine.state(), State::SrcReady);
    assert_eq!(policy_engine.protocol_layer.count_sent(VENDOR_DEFINED), 2);
    assert!(
        policy_engine
            .device_policy_manager()
            .received(&Event::NoResponse(Command::DiscoverSvids))
    );
    assert!(policy_engine.vdm_state().svids.is_empty());
}

#[test]
fn sink_follows_up_battery_alert() {
    let mut policy_engine = sink_ready(SpecificationRevision::R3_X);
    let alert = AlertDataObject(0).with_battery_status_change(true).0;

    simulate_receive(
        &mut policy_engine,
        partner_data(PowerRole::Source, DataMessageType::Alert, &[alert]),
    );

    assert_eq!(policy_engine.state(), State::SnkReady);
    assert!(
        policy_engine
            .protocol_layer
            .has_sent(MessageType::Extended(ExtendedMessageType::GetBatteryStatus))
    );
    assert!(policy_engine.device_policy_manager().received(&Event::Alert(alert)));
    assert!(
        policy_engine
            .device_policy_manager()
            .received(&Event::NoResponse(Command::GetBatteryStatus))
    );
}

#[test]
fn sink_reports_source_status() {
    let mut policy_engine = sink_ready(SpecificationRevision::R3_X);
    let status = Message::extended(
        partner_header(PowerRole::Source, SpecificationRevision::R3_X),
        ExtendedMessageType::Status,
        &extended::status(),
    );
    policy_engine.protocol_layer.on(
        Trigger::Sent(MessageType::Control(ControlMessageType::GetStatus)),
        vec![Action::Receive(status.clone())],
    );

    simulate_receive(
        &mut policy_engine,
        partner_data(PowerRole::Source, DataMessageType::Alert, &[0]),
    );

    assert_eq!(policy_engine.state(), State::SnkReady);
    assert!(policy_engine.device_policy_manager().received(&Event::Response(status)));
}

#[test]
fn detach_during_negotiation() {
    let mut policy_engine = get_policy_engine(PowerRole::Source);
    policy_engine
        .protocol_layer
        .on(Trigger::Sent(SOURCE_CAPABILITIES), vec![Action::Receive(sink_request())]);
    policy_engine.protocol_layer.on(
        Trigger::Sent(MessageType::Control(ControlMessageType::Accept)),
        vec![Action::Detach],
    );

    policy_engine.run();
    policy_engine.run();

    assert_eq!(policy_engine.state(), State::SrcTransitionSupply);
    assert!(
        !policy_engine
            .protocol_layer
            .has_sent(MessageType::Control(ControlMessageType::PsRdy))
    );
    assert!(!policy_engine.port_controller.called(PortCall::ApplySupply(1)));
    assert!(!policy_engine.contract().explicit);
}

#[test]
fn power_role_swap_source_to_sink() {
    let mut policy_engine = source_ready();
    policy_engine.protocol_layer.on(
        Trigger::Sent(MessageType::Control(ControlMessageType::PsRdy)),
        vec![Action::Receive(partner_control(PowerRole::Source, ControlMessageType::PsRdy))],
    );
    // The protocol layer is reset after the swap, and again on sink startup.
    policy_engine.protocol_layer.on(Trigger::Reset, vec![]);
    simulate_source_capabilities(&mut policy_engine, SpecificationRevision::R3_X);

    simulate_receive(
        &mut policy_engine,
        partner_control(PowerRole::Sink, ControlMessageType::PrSwap),
    );

    assert_eq!(policy_engine.state(), State::SnkReady);
    assert_eq!(policy_engine.power_role(), PowerRole::Sink);
    assert!(policy_engine.contract().explicit);

    let calls = &policy_engine.port_controller.calls;
    let source_off = calls.iter().position(|call| *call == PortCall::Otg(false)).unwrap();
    let rd = calls
        .iter()
        .position(|call| *call == PortCall::PowerRole(PowerRole::Sink))
        .unwrap();
    assert!(source_off < rd);
    assert!(policy_engine.port_controller.called(PortCall::Rp(RpLevel::Rp80)));
    assert!(
        policy_engine
            .device_policy_manager()
            .received(&Event::PowerRoleChanged(PowerRole::Sink))
    );
}

#[test]
fn power_role_swap_sink_to_source() {
    let mut policy_engine = sink_ready(SpecificationRevision::R3_X);
    policy_engine.protocol_layer.on(
        Trigger::Sent(MessageType::Control(ControlMessageType::Accept)),
        vec![Action::Receive(partner_control(PowerRole::Source, ControlMessageType::PsRdy))],
    );
    policy_engine
        .protocol_layer
        .on(Trigger::Sent(SOURCE_CAPABILITIES), vec![Action::Receive(sink_request())]);

    simulate_receive(
        &mut policy_engine,
        partner_control(PowerRole::Source, ControlMessageType::PrSwap),
    );

    assert_eq!(policy_engine.state(), State::SrcReady);
    assert_eq!(policy_engine.power_role(), PowerRole::Source);
    assert!(policy_engine.contract().explicit);
    assert!(policy_engine.port_controller.called(PortCall::PowerRole(PowerRole::Source)));
    assert!(policy_engine.port_controller.called(PortCall::Otg(true)));
    assert!(
        policy_engine
            .device_policy_manager()
            .received(&Event::PowerRoleChanged(PowerRole::Source))
    );

    let ps_rdy = position_of(&policy_engine, MessageType::Control(ControlMessageType::PsRdy));
    assert!(ps_rdy < position_of(&policy_engine, SOURCE_CAPABILITIES));
    assert_eq!(
        count_events(&mut policy_engine, |event| matches!(event, Event::ContractEstablished(_))),
        2
    );
}

#[test]
fn dfp_enters_and_exits_mode() {
    let mut policy_engine = source_ready();
    policy_engine.vdm.svids.push(DISPLAYPORT_SID).unwrap();
    let target = ModeTarget {
        svid: DISPLAYPORT_SID,
        object_position: 1,
    };
    policy_engine.protocol_layer.on(
        Trigger::Sent(VENDOR_DEFINED),
        vec![Action::Receive(partner_vdm(
            PowerRole::Sink,
            DISPLAYPORT_SID,
            VdmCommand::EnterMode,
            VdmCommandType::ResponderAck,
            1,
            &[],
        ))],
    );

    policy_engine.post_command(Command::EnterMode);
    policy_engine.run();
    assert_eq!(policy_engine.vdm_state().entered_mode, Some(target));
    assert!(policy_engine.modal_operation);

    // A mode is entered only once.
    policy_engine.post_command(Command::EnterMode);
    policy_engine.run();
    assert_eq!(policy_engine.protocol_layer.count_sent(VENDOR_DEFINED), 1);
    assert!(policy_engine.vdm.request.is_none());

    policy_engine.protocol_layer.on(
        Trigger::Sent(VENDOR_DEFINED),
        vec![Action::Receive(partner_vdm(
            PowerRole::Sink,
            DISPLAYPORT_SID,
            VdmCommand::ExitMode,
            VdmCommandType::ResponderAck,
            1,
            &[],
        ))],
    );
    policy_engine.post_command(Command::ExitMode);
    policy_engine.run();

    let header = last_vdm_header(&policy_engine);
    assert_eq!(header.command(), VdmCommand::ExitMode);
    assert_eq!(header.object_position(), 1);
    assert!(!policy_engine.vdm_state().is_mode_entered());
    assert!(!policy_engine.modal_operation);
    assert_eq!(policy_engine.state(), State::SrcReady);

    let modes: Vec<_> = policy_engine
        .device_policy_manager()
        .events
        .iter()
        .filter(|event| matches!(event, Event::ModeEntered(_) | Event::ModeExited(_)))
        .cloned()
        .collect();
    assert_eq!(modes, [Event::ModeEntered(target), Event::ModeExited(target)]);
}

#[test]
fn refused_request_drops_previous_attempts() {
    let mut policy_engine = source_ready();
    policy_engine.vdm.request = Some(VdmRequest {
        command: VdmCommand::DiscoverModes,
        origin: State::DfpVdmModesRequest,
        timer: Stopwatch::new(&policy_engine.clock),
        attempts: 1,
    });

    // Without SVIDs, there is nothing to discover modes for.
    policy_engine.post_command(Command::DiscoverModes);
    policy_engine.run();
    assert!(policy_engine.vdm.request.is_none());
    assert_eq!(policy_engine.protocol_layer.count_sent(VENDOR_DEFINED), 0);

    policy_engine.post_command(Command::DiscoverSvids);
    policy_engine.run();
    assert_eq!(policy_engine.protocol_layer.count_sent(VENDOR_DEFINED), 2);
    assert!(
        policy_engine
            .device_policy_manager()
            .received(&Event::NoResponse(Command::DiscoverSvids))
    );
}

#[test]
fn messages_are_routed_within_ams_margin() {
    let mut policy_engine = sink_ready(SpecificationRevision::R2_0);
    policy_engine.protocol_layer.on(
        Trigger::Sent(VENDOR_DEFINED),
        vec![
            Action::Command(Command::GetSourceCap),
            Action::ReceiveAfter(
                100,
                partner_control(PowerRole::Source, ControlMessageType::GetSinkCap),
            ),
        ],
    );

    simulate_receive(
        &mut policy_engine,
        partner_vdm(
            PowerRole::Source,
            PD_SID,
            VdmCommand::DiscoverIdentity,
            VdmCommandType::InitiatorReq,
            0,
            &[],
        ),
    );

    assert_eq!(policy_engine.state(), State::SnkReady);
    assert!(!policy_engine.vdm_state().got_ufp_vdm);

    let sink_capabilities = position_of(&policy_engine, MessageType::Data(DataMessageType::SinkCapabilities));
    let get_source_cap = position_of(&policy_engine, MessageType::Control(ControlMessageType::GetSourceCap));
    assert!(sink_capabilities < get_source_cap);

    // The command still waits for the margin after the last answered message.
    let sent_at = policy_engine.protocol_layer.sent_at();
    let delay = sent_at[get_source_cap] - sent_at[sink_capabilities];
    assert!(delay >= TimerType::StartAmsMargin.duration_ms());
}

#[cfg(feature = "serde")]
#[test]
fn config_is_serializable() {
    fn serializable<T: serde::Serialize + for<'de> serde::Deserialize<'de>>() {}

    serializable::<Config>();
}
