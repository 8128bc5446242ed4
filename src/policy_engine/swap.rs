//! Data role, power role, VCONN and fast role swaps.
//!
//! Power role swaps sequence VBUS with fixed settle times. A missing PS_RDY during a power role
//! swap leads to error recovery, since the port can not tell which side drives VBUS.
use super::{Awaited, PolicyEngine, State};
use crate::device_policy_manager::{Deferred, DevicePolicyManager, Event, FastRoleSwapStep};
use crate::events::MessageEvent;
use crate::protocol_layer::ProtocolLayer;
use crate::protocol_layer::message::header::ControlMessageType;
use crate::timers::{Clock, TimerType};
use crate::{DataRole, PortController, PowerRole, RpLevel};

impl<PROTOCOL: ProtocolLayer, PORT: PortController, DPM: DevicePolicyManager, CLOCK: Clock>
    PolicyEngine<PROTOCOL, PORT, DPM, CLOCK>
{
    /// A data role swap request was received.
    pub(super) fn drs_evaluate_port(&mut self) -> State {
        if self.modal_operation {
            warn!("Data role swap in modal operation");
            return self.hard_reset_state();
        }

        match self.data_role {
            DataRole::Dfp => State::DrsDfpUfpEvaluateSwap,
            DataRole::Ufp => State::DrsUfpDfpEvaluateSwap,
        }
    }

    /// The device policy manager asked for a data role swap.
    pub(super) fn drs_evaluate_send_port(&mut self) -> State {
        if self.modal_operation {
            warn!("Data role swap in modal operation");
            return self.hard_reset_state();
        }

        match self.data_role {
            DataRole::Dfp => State::DrsDfpUfpSendSwap,
            DataRole::Ufp => State::DrsUfpDfpSendSwap,
        }
    }

    pub(super) fn drs_evaluate_swap(&mut self) -> State {
        let accept = self.device_policy_manager.evaluate_data_role_swap(self.data_role);

        match (self.data_role, accept) {
            (DataRole::Dfp, true) => State::DrsDfpUfpAcceptSwap,
            (DataRole::Dfp, false) => State::DrsDfpUfpRejectSwap,
            (DataRole::Ufp, true) => State::DrsUfpDfpAcceptSwap,
            (DataRole::Ufp, false) => State::DrsUfpDfpRejectSwap,
        }
    }

    pub(super) fn drs_accept_swap(&mut self) -> State {
        if !self.send_control(ControlMessageType::Accept) {
            return self.send_soft_reset_state();
        }

        self.swap_data_role()
    }

    pub(super) fn drs_dfp_ufp_change_to_ufp(&mut self) -> State {
        self.device_policy_manager
            .inform_event(Event::DataRoleChanged(DataRole::Ufp));
        self.ready_state()
    }

    pub(super) fn drs_ufp_dfp_change_to_dfp(&mut self) -> State {
        self.discover_identity_counter.reset();
        self.device_policy_manager
            .inform_event(Event::DataRoleChanged(DataRole::Dfp));
        self.ready_state()
    }

    pub(super) fn drs_send_swap(&mut self) -> State {
        self.protocol_layer.get_status(MessageEvent::Accept);

        if !self.send_control(ControlMessageType::DrSwap) {
            return self.send_soft_reset_state();
        }

        let ready = self.ready_state();
        let changed = match self.data_role {
            DataRole::Dfp => State::DrsDfpUfpChangeToUfp,
            DataRole::Ufp => State::DrsUfpDfpChangeToDfp,
        };
        let next = self.wait_for(
            &[
                (MessageEvent::Accept, changed),
                (MessageEvent::Reject, ready),
                (MessageEvent::Wait, ready),
            ],
            TimerType::SenderResponse,
            ready,
        );

        if next == changed {
            self.swap_data_role()
        } else {
            next
        }
    }

    /// Reject a data role, power role or VCONN swap.
    pub(super) fn reject_swap(&mut self) -> State {
        let ready = self.ready_state();
        self.send_control_or_soft_reset(ControlMessageType::Reject, ready)
    }

    fn swap_data_role(&mut self) -> State {
        self.data_role = self.data_role.swapped();
        self.port_controller.set_data_role(self.data_role);
        info!("Data role is now {:?}", self.data_role);

        match self.data_role {
            DataRole::Dfp => State::DrsUfpDfpChangeToDfp,
            DataRole::Ufp => State::DrsDfpUfpChangeToUfp,
        }
    }

    pub(super) fn prs_evaluate_swap(&mut self) -> State {
        let accept = self.device_policy_manager.evaluate_power_role_swap(self.power_role);

        match (self.power_role, accept) {
            (PowerRole::Source, true) => State::PrsSrcSnkAcceptSwap,
            (PowerRole::Source, false) => State::PrsSrcSnkRejectSwap,
            (PowerRole::Sink, true) => State::PrsSnkSrcAcceptSwap,
            (PowerRole::Sink, false) => State::PrsSnkSrcRejectSwap,
        }
    }

    pub(super) fn prs_src_snk_send_swap(&mut self) -> State {
        self.protocol_layer.get_status(MessageEvent::Accept);

        if !self.send_control(ControlMessageType::PrSwap) {
            return State::SrcSendSoftReset;
        }

        self.wait_for(
            &[
                (MessageEvent::Accept, State::PrsSrcSnkTransitionToOff),
                (MessageEvent::Reject, State::SrcReady),
                (MessageEvent::Wait, State::SrcReady),
            ],
            TimerType::SenderResponse,
            State::SrcReady,
        )
    }

    pub(super) fn prs_src_snk_accept_swap(&mut self) -> State {
        self.send_control_or_soft_reset(ControlMessageType::Accept, State::PrsSrcSnkTransitionToOff)
    }

    pub(super) fn prs_src_snk_transition_to_off(&mut self) -> State {
        if let Some(state) = self.settle(TimerType::SrcTransition) {
            return state;
        }

        self.port_controller.set_otg_control(false);
        self.port_controller.set_rp_control(RpLevel::Rp80);

        if let Some(state) = self.settle(TimerType::SourceOffSettle) {
            return state;
        }

        State::PrsSrcSnkAssertRd
    }

    pub(super) fn prs_src_snk_assert_rd(&mut self) -> State {
        self.power_role = PowerRole::Sink;
        self.port_controller.set_power_role(PowerRole::Sink);

        State::PrsSrcSnkWaitSourceOn
    }

    pub(super) fn prs_src_snk_wait_source_on(&mut self) -> State {
        self.protocol_layer.get_status(MessageEvent::PsRdy);

        if !self.send_control(ControlMessageType::PsRdy) {
            return State::ErrorRecovery;
        }

        let next = self.wait_for(
            &[(MessageEvent::PsRdy, State::SnkStartup)],
            TimerType::PSSourceOn,
            State::ErrorRecovery,
        );

        if next == State::SnkStartup {
            self.swap_hard_reset_counter.reset();
            self.init_counters();
            self.hard_reset_counter.reset();
            self.port_controller.soft_reset();
            self.device_policy_manager
                .inform_event(Event::PowerRoleChanged(PowerRole::Sink));
        } else if next == State::ErrorRecovery {
            error!("No PS_RDY from new source");
        }

        next
    }

    pub(super) fn prs_snk_src_send_swap(&mut self) -> State {
        self.protocol_layer.get_status(MessageEvent::Accept);

        if !self.send_control(ControlMessageType::PrSwap) {
            return State::SnkSendSoftReset;
        }

        self.wait_for(
            &[
                (MessageEvent::Accept, State::PrsSnkSrcTransitionToOff),
                (MessageEvent::Reject, State::SnkReady),
                (MessageEvent::Wait, State::SnkReady),
            ],
            TimerType::SenderResponse,
            State::SnkReady,
        )
    }

    pub(super) fn prs_snk_src_accept_swap(&mut self) -> State {
        self.protocol_layer.get_status(MessageEvent::PsRdy);
        self.send_control_or_soft_reset(ControlMessageType::Accept, State::PrsSnkSrcTransitionToOff)
    }

    pub(super) fn prs_snk_src_transition_to_off(&mut self) -> State {
        if let Some(state) = self.settle(TimerType::SinkOffSettle) {
            return state;
        }

        let next = self.wait_for(
            &[(MessageEvent::PsRdy, State::PrsSnkSrcAssertRp)],
            TimerType::PSSourceOff,
            State::ErrorRecovery,
        );

        if next == State::ErrorRecovery {
            error!("Old source did not turn off");
        }

        next
    }

    pub(super) fn prs_snk_src_assert_rp(&mut self) -> State {
        self.power_role = PowerRole::Source;
        self.port_controller.set_power_role(PowerRole::Source);

        State::PrsSnkSrcSourceOn
    }

    pub(super) fn prs_snk_src_source_on(&mut self) -> State {
        self.port_controller.set_otg_control(true);

        if let Some(state) = self.settle(TimerType::SourceOnSettle) {
            return state;
        }

        if !self.send_control(ControlMessageType::PsRdy) {
            return State::ErrorRecovery;
        }

        if let Some(state) = self.settle(TimerType::SwapSourceStart) {
            return state;
        }

        self.init_counters();
        self.hard_reset_counter.reset();
        self.swap_hard_reset_counter.reset();
        self.device_policy_manager
            .inform_event(Event::PowerRoleChanged(PowerRole::Source));

        State::SrcStartup
    }

    pub(super) fn vcs_evaluate_swap(&mut self) -> State {
        if self.device_policy_manager.evaluate_vconn_swap(self.vconn_source) {
            State::VcsAcceptSwap
        } else {
            State::VcsRejectSwap
        }
    }

    pub(super) fn vcs_accept_swap(&mut self) -> State {
        self.protocol_layer.get_status(MessageEvent::PsRdy);

        let next = if self.vconn_source {
            State::VcsWaitForVconn
        } else {
            State::VcsTurnOnVconn
        };

        self.send_control_or_soft_reset(ControlMessageType::Accept, next)
    }

    pub(super) fn vcs_send_swap(&mut self) -> State {
        self.protocol_layer.get_status(MessageEvent::Accept);
        self.protocol_layer.get_status(MessageEvent::PsRdy);

        if !self.send_control(ControlMessageType::VconnSwap) {
            return self.hard_reset_state();
        }

        let ready = self.ready_state();
        let accepted = if self.vconn_source {
            State::VcsWaitForVconn
        } else {
            State::VcsTurnOnVconn
        };

        self.wait_for(
            &[
                (MessageEvent::Accept, accepted),
                (MessageEvent::Reject, ready),
                (MessageEvent::Wait, ready),
            ],
            TimerType::SenderResponse,
            ready,
        )
    }

    pub(super) fn vcs_wait_for_vconn(&mut self) -> State {
        match self.await_message(MessageEvent::PsRdy, TimerType::VconnSourceOn) {
            Awaited::Received => {
                self.swap_hard_reset_counter.reset();
                State::VcsTurnOffVconn
            }
            Awaited::Expired => {
                let _ = self.swap_hard_reset_counter.increment();

                if self.swap_hard_reset_counter.is_exhausted() {
                    error!("VCONN swap failed repeatedly");
                    State::ErrorRecovery
                } else {
                    self.hard_reset_state()
                }
            }
            Awaited::Interrupted(state) => state,
        }
    }

    pub(super) fn vcs_turn_off_vconn(&mut self) -> State {
        self.set_vconn_source(false);
        self.ready_state()
    }

    pub(super) fn vcs_turn_on_vconn(&mut self) -> State {
        self.set_vconn_source(true);
        State::VcsSendPsRdy
    }

    pub(super) fn vcs_send_ps_rdy(&mut self) -> State {
        let ready = self.ready_state();
        self.send_control_or_soft_reset(ControlMessageType::PsRdy, ready)
    }

    fn set_vconn_source(&mut self, enable: bool) {
        self.vconn_source = enable;
        self.port_controller.set_vconn_source(enable);
        self.device_policy_manager
            .inform_event(Event::VconnSourceChanged(enable));
    }

    /// Fast role swap steps only notify the device policy manager, which sequences VBUS.
    ///
    /// The power role is left untouched.
    pub(super) fn fast_role_swap(&mut self) -> State {
        let (deferred, next) = match self.state {
            State::FrsSrcSnkEvaluateSwap => (
                Deferred::FastRoleSwapToSink(FastRoleSwapStep::Evaluate),
                State::FrsSrcSnkAcceptSwap,
            ),
            State::FrsSrcSnkAcceptSwap => (
                Deferred::FastRoleSwapToSink(FastRoleSwapStep::Accept),
                State::FrsSrcSnkTransitionToOff,
            ),
            State::FrsSrcSnkTransitionToOff => (
                Deferred::FastRoleSwapToSink(FastRoleSwapStep::TransitionToOff),
                State::FrsSrcSnkAssertRd,
            ),
            State::FrsSrcSnkAssertRd => (
                Deferred::FastRoleSwapToSink(FastRoleSwapStep::AssertPull),
                State::FrsSrcSnkWaitSourceOn,
            ),
            State::FrsSrcSnkWaitSourceOn => (
                Deferred::FastRoleSwapToSink(FastRoleSwapStep::WaitSourceOn),
                State::SrcReady,
            ),
            State::FrsSnkSrcStartAms => (
                Deferred::FastRoleSwapToSource(FastRoleSwapStep::Evaluate),
                State::FrsSnkSrcSendSwap,
            ),
            State::FrsSnkSrcSendSwap => (
                Deferred::FastRoleSwapToSource(FastRoleSwapStep::Accept),
                State::FrsSnkSrcTransitionToOff,
            ),
            State::FrsSnkSrcTransitionToOff => (
                Deferred::FastRoleSwapToSource(FastRoleSwapStep::TransitionToOff),
                State::FrsSnkSrcVbusApplied,
            ),
            State::FrsSnkSrcVbusApplied => (
                Deferred::FastRoleSwapToSource(FastRoleSwapStep::WaitSourceOn),
                State::FrsSnkSrcAssertRp,
            ),
            State::FrsSnkSrcAssertRp => (
                Deferred::FastRoleSwapToSource(FastRoleSwapStep::AssertPull),
                State::FrsSnkSrcSourceOn,
            ),
            _ => (
                Deferred::FastRoleSwapToSource(FastRoleSwapStep::SourceOn),
                State::SnkReady,
            ),
        };

        self.device_policy_manager.inform_event(Event::Deferred(deferred));
        next
    }
}
