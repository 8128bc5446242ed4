//! Implements dummy collaborators of the policy engine for testing.
use std::cell::Cell;
use std::rc::Rc;
use std::vec::Vec;

use crate::device_policy_manager::{DevicePolicyManager, Event, ModeTarget, RequestEvaluation};
use crate::events::{Command, EventLatch, MessageEvent};
use crate::protocol_layer::ProtocolLayer;
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::header::{
    ControlMessageType, DataMessageType, Header, MessageType, SpecificationRevision,
};
use crate::protocol_layer::message::vendor_defined::{
    VdmCommand, VdmCommandType, VdmHeaderStructured, VdmVersion,
};
use crate::timers::Clock;
use crate::{CcControl, DataRole, PortController, PowerRole, RpLevel, VbusState};

/// A clock that advances by one millisecond whenever it is read.
///
/// Every polling loop makes progress, so that tests fast-forward through protocol timers.
#[derive(Debug, Clone, Default)]
pub struct DummyClock {
    now_ms: Rc<Cell<u64>>,
}

impl DummyClock {
    /// Create a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// The present time, without advancing the clock.
    pub fn peek_ms(&self) -> u64 {
        self.now_ms.get()
    }
}

impl Clock for DummyClock {
    fn now_ms(&self) -> u64 {
        let now = self.now_ms.get() + 1;
        self.now_ms.set(now);
        now
    }
}

/// What makes the dummy protocol layer play a scripted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A message of this type was sent by the policy engine.
    Sent(MessageType),
    /// The protocol layer was reset.
    Reset,
}

/// Scripted behaviour of the port partner.
#[derive(Debug, Clone)]
pub enum Action {
    /// Receive a message.
    Receive(Message),
    /// Receive a message after a number of milliseconds.
    ///
    /// The message is stored right away, its marker is posted once the delay has passed.
    ReceiveAfter(u64, Message),
    /// Post a command, as the device policy manager would.
    Command(Command),
    /// Receive a hard reset.
    HardReset,
    /// Detach.
    Detach,
}

/// A dummy protocol layer, which records sent messages and plays scripted partner replies.
#[derive(Debug, Default)]
pub struct DummyProtocolLayer {
    events: EventLatch,
    clock: Option<DummyClock>,
    rx: Message,
    delayed: Cell<Option<(u64, MessageEvent)>>,
    sent: Vec<Message>,
    sent_at: Vec<u64>,
    script: Vec<(Trigger, Vec<Action>)>,
    failures: Vec<(MessageType, usize)>,
    failed: Vec<MessageType>,
}

impl DummyProtocolLayer {
    /// Create a new dummy protocol layer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dummy protocol layer that shares the clock of the policy engine.
    pub fn with_clock(clock: DummyClock) -> Self {
        Self {
            clock: Some(clock),
            ..Self::default()
        }
    }

    /// Play the actions once, the next time the trigger occurs.
    ///
    /// Scripts are consumed in the order they were added.
    pub fn on(&mut self, trigger: Trigger, actions: Vec<Action>) {
        self.script.push((trigger, actions));
    }

    /// Let the next transmissions of a message type fail, as if no GoodCRC was received.
    pub fn fail(&mut self, message_type: MessageType, times: usize) {
        self.failures.push((message_type, times));
    }

    /// The types of all messages whose transmission failed.
    pub fn failed(&self) -> &[MessageType] {
        &self.failed
    }

    /// Receive a message right away.
    pub fn inject(&mut self, message: Message) {
        self.play(Action::Receive(message));
    }

    /// All messages that were sent successfully.
    pub fn sent(&self) -> &[Message] {
        &self.sent
    }

    /// The times at which the sent messages were transmitted.
    pub fn sent_at(&self) -> &[u64] {
        &self.sent_at
    }

    /// The types of all messages that were sent successfully.
    pub fn sent_types(&self) -> Vec<MessageType> {
        self.sent.iter().map(|message| message.header.message_type()).collect()
    }

    /// Whether a message of the given type was sent.
    pub fn has_sent(&self, message_type: MessageType) -> bool {
        self.sent_types().contains(&message_type)
    }

    /// The number of sent messages of the given type.
    pub fn count_sent(&self, message_type: MessageType) -> usize {
        self.sent_types().iter().filter(|sent| **sent == message_type).count()
    }

    fn now_ms(&self) -> u64 {
        self.clock.as_ref().map_or(0, DummyClock::peek_ms)
    }

    fn trigger(&mut self, trigger: Trigger) {
        if let Some(index) = self.script.iter().position(|(scripted, _)| *scripted == trigger) {
            let (_, actions) = self.script.remove(index);

            for action in actions {
                self.play(action);
            }
        }
    }

    fn play(&mut self, action: Action) {
        match action {
            Action::Receive(message) => {
                let event = message.event();
                self.rx = message;
                self.events.post_message(event);
            }
            Action::ReceiveAfter(delay_ms, message) => {
                let now = self.now_ms();
                let event = message.event();
                self.rx = message;
                self.delayed.set(Some((now + delay_ms, event)));
            }
            Action::Command(command) => self.events.post_command(command),
            Action::HardReset => self.events.signal_hard_reset(),
            Action::Detach => self.events.signal_detach(),
        }
    }
}

impl ProtocolLayer for DummyProtocolLayer {
    fn send_message(&mut self, message: &Message) -> bool {
        let message_type = message.header.message_type();

        if let Some((_, times)) = self
            .failures
            .iter_mut()
            .find(|(failing, times)| *failing == message_type && *times > 0)
        {
            *times -= 1;
            self.failed.push(message_type);
            return false;
        }

        self.sent.push(message.clone());
        self.sent_at.push(self.now_ms());
        self.trigger(Trigger::Sent(message_type));
        true
    }

    fn events(&self) -> &EventLatch {
        if let Some((due, event)) = self.delayed.get() {
            if self.now_ms() >= due {
                self.delayed.set(None);
                self.events.post_message(event);
            }
        }

        &self.events
    }

    fn rx_message(&self) -> &Message {
        &self.rx
    }

    fn reset(&mut self) {
        self.trigger(Trigger::Reset);
    }
}

/// Calls on the dummy port controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PortCall {
    PowerRole(PowerRole),
    DataRole(DataRole),
    DualRole,
    VconnSource(bool),
    Rp(RpLevel),
    Otg(bool),
    Cc(CcControl),
    ApplySupply(u8),
    HardReset,
    SoftReset,
    DriverReset,
}

/// A dummy port controller that records all calls.
#[derive(Debug)]
pub struct DummyPortController {
    /// Recorded calls, in order.
    pub calls: Vec<PortCall>,
    /// Result of VBUS checks.
    pub vbus: VbusState,
    /// The Rp level of the port partner.
    pub partner_rp: RpLevel,
}

impl Default for DummyPortController {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            vbus: VbusState::Present,
            partner_rp: RpLevel::Rp330,
        }
    }
}

impl DummyPortController {
    /// Create a new dummy port controller, with VBUS present.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the call was recorded.
    pub fn called(&self, call: PortCall) -> bool {
        self.calls.contains(&call)
    }
}

impl PortController for DummyPortController {
    fn set_power_role(&mut self, role: PowerRole) {
        self.calls.push(PortCall::PowerRole(role));
    }

    fn set_data_role(&mut self, role: DataRole) {
        self.calls.push(PortCall::DataRole(role));
    }

    fn set_dual_role(&mut self) {
        self.calls.push(PortCall::DualRole);
    }

    fn set_vconn_source(&mut self, enable: bool) {
        self.calls.push(PortCall::VconnSource(enable));
    }

    fn set_rp_control(&mut self, level: RpLevel) {
        self.calls.push(PortCall::Rp(level));
    }

    fn rp_level(&self) -> RpLevel {
        self.partner_rp
    }

    fn set_otg_control(&mut self, enable: bool) {
        self.calls.push(PortCall::Otg(enable));
    }

    fn set_cc_control(&mut self, control: CcControl) {
        self.calls.push(PortCall::Cc(control));
    }

    fn vbus_on_check(&mut self) -> VbusState {
        self.vbus
    }

    fn apply_supply(&mut self, object_position: u8, _power_data_object: u32) {
        self.calls.push(PortCall::ApplySupply(object_position));
    }

    fn hard_reset(&mut self) {
        self.calls.push(PortCall::HardReset);
    }

    fn soft_reset(&mut self) {
        self.calls.push(PortCall::SoftReset);
    }

    fn driver_reset(&mut self) {
        self.calls.push(PortCall::DriverReset);
    }
}

/// A dummy device policy manager with configurable decisions, which records all events.
#[derive(Debug)]
pub struct DummyDevicePolicyManager {
    /// Recorded events, in order.
    pub events: Vec<Event>,
    /// Evaluation of every request.
    pub evaluation: RequestEvaluation,
    /// Decision on all swaps.
    pub accept_swaps: bool,
    /// Modes that are reported for every SVID.
    pub modes: heapless::Vec<u32, 6>,
    /// DisplayPort status as UFP.
    pub displayport_status: Option<u32>,
}

impl Default for DummyDevicePolicyManager {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            evaluation: RequestEvaluation::Accept,
            accept_swaps: true,
            modes: heapless::Vec::new(),
            displayport_status: None,
        }
    }
}

impl DummyDevicePolicyManager {
    /// Create a new dummy device policy manager that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the event was recorded.
    pub fn received(&self, event: &Event) -> bool {
        self.events.contains(event)
    }
}

impl DevicePolicyManager for DummyDevicePolicyManager {
    fn evaluate_request(
        &mut self,
        _request: crate::protocol_layer::message::request::FixedVariableSupply,
        _source_capabilities: &[u32],
    ) -> RequestEvaluation {
        self.evaluation
    }

    fn evaluate_data_role_swap(&mut self, _data_role: DataRole) -> bool {
        self.accept_swaps
    }

    fn evaluate_power_role_swap(&mut self, _power_role: PowerRole) -> bool {
        self.accept_swaps
    }

    fn evaluate_vconn_swap(&mut self, _vconn_source: bool) -> bool {
        self.accept_swaps
    }

    fn modes(&mut self, _svid: u16) -> heapless::Vec<u32, 6> {
        self.modes.clone()
    }

    fn evaluate_mode_entry(&mut self, _target: ModeTarget) -> bool {
        !self.modes.is_empty()
    }

    fn displayport_status(&mut self) -> Option<u32> {
        self.displayport_status
    }

    fn inform_event(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// Header of messages from a port partner in the given power role.
pub fn partner_header(power_role: PowerRole, revision: SpecificationRevision) -> Header {
    let data_role = match power_role {
        PowerRole::Source => DataRole::Dfp,
        PowerRole::Sink => DataRole::Ufp,
    };

    Header::new_template(data_role, power_role, revision)
}

/// A control message from a port partner in the given power role, on PD 3.x.
pub fn partner_control(power_role: PowerRole, message_type: ControlMessageType) -> Message {
    Message::control(partner_header(power_role, SpecificationRevision::R3_X), message_type)
}

/// A data message from a port partner in the given power role, on PD 3.x.
pub fn partner_data(power_role: PowerRole, message_type: DataMessageType, objects: &[u32]) -> Message {
    Message::data(
        partner_header(power_role, SpecificationRevision::R3_X),
        message_type,
        objects,
    )
}

/// A structured VDM from a port partner in the given power role, on PD 3.x.
pub fn partner_vdm(
    power_role: PowerRole,
    svid: u16,
    command: VdmCommand,
    command_type: VdmCommandType,
    object_position: u8,
    vdos: &[u32],
) -> Message {
    let header =
        VdmHeaderStructured::new(svid, VdmVersion::V2_1, command, command_type).with_object_position(object_position);

    let mut objects = vec![header.0];
    objects.extend_from_slice(vdos);

    partner_data(power_role, DataMessageType::VendorDefined, &objects)
}
