//! Per link state of a running DSME-GTS handshake.
//!
//! The handshake itself (request, reply, notify) is driven by the negotiation layer.
//! [GtsData] only holds what that layer needs between the steps: the message it owns until the
//! send path takes it, the command in flight, a step timer and the confirm that is reported at the end.

use crate::sap::{
    dsme_gts::{Direction, DsmeGtsConfirm, ManagementType},
    Status,
};

/// The command frame identifiers of the DSME-GTS handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum GtsCommand {
    Request = 0x15,
    Reply = 0x16,
    Notify = 0x17,
}

impl TryFrom<u8> for GtsCommand {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x15 => Ok(Self::Request),
            0x16 => Ok(Self::Reply),
            0x17 => Ok(Self::Notify),
            _ => Err(value),
        }
    }
}

/// Where a link is in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum GtsStage {
    /// No handshake running
    Ready,
    /// A message is waiting to be handed to the send path
    Queued,
    /// The send path has the message
    Sending,
    WaitForReply,
    WaitForNotify,
}

enum State<M> {
    Ready,
    Queued { command: GtsCommand, message: M },
    Sending { command: GtsCommand },
    WaitForReply,
    WaitForNotify,
}

/// The transient handshake state of one link.
///
/// `M` is the outgoing message type of the MAC. A queued message is owned by this state only,
/// it leaves through [GtsData::submit] or [GtsData::abort] and never exists twice.
pub struct GtsData<M> {
    state: State<M>,
    multisuperframes_in_current_stage: u8,
    pending_confirm: DsmeGtsConfirm,
}

impl<M> GtsData<M> {
    pub const fn new() -> Self {
        Self {
            state: State::Ready,
            multisuperframes_in_current_stage: 0,
            pending_confirm: DsmeGtsConfirm {
                device_address: None,
                management_type: ManagementType::Allocation,
                direction: Direction::Transmit,
                prioritized_channel_access: false,
                num_slots: 0,
                preferred_superframe_id: 0,
                preferred_slot_id: 0,
                status: Status::Success,
            },
        }
    }

    pub fn stage(&self) -> GtsStage {
        match self.state {
            State::Ready => GtsStage::Ready,
            State::Queued { .. } => GtsStage::Queued,
            State::Sending { .. } => GtsStage::Sending,
            State::WaitForReply => GtsStage::WaitForReply,
            State::WaitForNotify => GtsStage::WaitForNotify,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Ready)
    }

    /// Start a handshake step with `message` carrying `command`.
    ///
    /// The confirm parameters are the ones reported when the handshake concludes.
    /// Fails with the message handed back if a handshake is already running on this link.
    pub fn begin(
        &mut self,
        command: GtsCommand,
        message: M,
        confirm: DsmeGtsConfirm,
    ) -> Result<(), M> {
        if !self.is_idle() {
            warn!(
                "Can't begin a {:?} handshake, link is in stage {:?}",
                command,
                self.stage()
            );
            return Err(message);
        }

        self.pending_confirm = confirm;
        self.enter(State::Queued { command, message });
        Ok(())
    }

    /// Queue the notify of a running handshake after the reply came in.
    ///
    /// Only the requester waiting for the reply has a follow-up message.
    /// Fails with the message handed back otherwise.
    pub fn queue(&mut self, command: GtsCommand, message: M) -> Result<(), M> {
        if !matches!(self.state, State::WaitForReply) {
            warn!(
                "Can't queue a {:?} command, link is in stage {:?}",
                command,
                self.stage()
            );
            return Err(message);
        }

        self.enter(State::Queued { command, message });
        Ok(())
    }

    /// Hand the queued message over to the send path
    pub fn submit(&mut self) -> Option<(GtsCommand, M)> {
        match core::mem::replace(&mut self.state, State::Ready) {
            State::Queued { command, message } => {
                self.enter(State::Sending { command });
                Some((command, message))
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// The command the send path is busy with. Only set while [GtsStage::Sending].
    pub fn in_flight_command(&self) -> Option<GtsCommand> {
        match self.state {
            State::Sending { command } => Some(command),
            _ => None,
        }
    }

    /// The send path finished the message successfully.
    ///
    /// A request now waits for the reply and a reply for the notify.
    /// A notify concludes the handshake and the confirm is returned.
    pub fn send_completed(&mut self) -> Option<DsmeGtsConfirm> {
        let State::Sending { command } = self.state else {
            warn!("Send completion while in stage {:?}", self.stage());
            return None;
        };

        match command {
            GtsCommand::Request => {
                self.enter(State::WaitForReply);
                None
            }
            GtsCommand::Reply => {
                self.enter(State::WaitForNotify);
                None
            }
            GtsCommand::Notify => Some(self.conclude(Status::Success)),
        }
    }

    /// The send path gave up on the message. Concludes the handshake with `status`.
    pub fn send_failed(&mut self, status: Status) -> Option<DsmeGtsConfirm> {
        if !matches!(self.state, State::Sending { .. }) {
            warn!("Send failure while in stage {:?}", self.stage());
            return None;
        }

        Some(self.conclude(status))
    }

    /// The awaited reply or notify arrived, or the negotiation layer gave up waiting for it.
    /// Concludes the handshake with `status`.
    pub fn resolve(&mut self, status: Status) -> Option<DsmeGtsConfirm> {
        if !matches!(self.state, State::WaitForReply | State::WaitForNotify) {
            warn!("Resolve while in stage {:?}", self.stage());
            return None;
        }

        Some(self.conclude(status))
    }

    /// Stop the handshake in whatever stage it is.
    ///
    /// A message that was still queued is handed back, so it can be freed or reused.
    /// Returns None for the confirm if no handshake was running.
    pub fn abort(&mut self, status: Status) -> (Option<M>, Option<DsmeGtsConfirm>) {
        match core::mem::replace(&mut self.state, State::Ready) {
            State::Ready => (None, None),
            State::Queued { message, .. } => (Some(message), Some(self.conclude(status))),
            _ => (None, Some(self.conclude(status))),
        }
    }

    /// Count one more multisuperframe for a running handshake step.
    ///
    /// Returns the amount of multisuperframes the current step is unresolved.
    /// The negotiation layer decides when that's too long.
    pub fn on_multisuperframe(&mut self) -> u8 {
        if !self.is_idle() {
            self.multisuperframes_in_current_stage =
                self.multisuperframes_in_current_stage.saturating_add(1);
        }
        self.multisuperframes_in_current_stage
    }

    pub fn multisuperframes_in_current_stage(&self) -> u8 {
        self.multisuperframes_in_current_stage
    }

    /// The confirm parameters of the running (or last) handshake
    pub fn pending_confirm(&self) -> &DsmeGtsConfirm {
        &self.pending_confirm
    }

    /// For completing the confirm parameters with what the reply tells us
    pub fn pending_confirm_mut(&mut self) -> &mut DsmeGtsConfirm {
        &mut self.pending_confirm
    }

    fn enter(&mut self, state: State<M>) {
        self.state = state;
        self.multisuperframes_in_current_stage = 0;
    }

    fn conclude(&mut self, status: Status) -> DsmeGtsConfirm {
        self.enter(State::Ready);
        self.pending_confirm.status = status;
        debug!(
            "DSME-GTS handshake with {:?} concluded: {:?}",
            self.pending_confirm.device_address,
            status
        );
        self.pending_confirm
    }
}

impl<M> Default for GtsData<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::ShortAddress;

    /// Deliberately not `Clone`
    #[derive(Debug, PartialEq, Eq)]
    struct Message(u8);

    fn confirm() -> DsmeGtsConfirm {
        DsmeGtsConfirm {
            device_address: Some(ShortAddress(0x0002)),
            management_type: ManagementType::Allocation,
            direction: Direction::Transmit,
            prioritized_channel_access: false,
            num_slots: 2,
            preferred_superframe_id: 1,
            preferred_slot_id: 4,
            status: Status::Success,
        }
    }

    #[test]
    fn command_identifiers() {
        assert_eq!(GtsCommand::Request as u8, 0x15);
        assert_eq!(GtsCommand::try_from(0x17), Ok(GtsCommand::Notify));
        assert_eq!(GtsCommand::try_from(0x18), Err(0x18));
    }

    #[test_log::test]
    fn requester_runs_the_full_handshake() {
        let mut gts = GtsData::new();
        gts.begin(GtsCommand::Request, Message(1), confirm()).unwrap();
        assert_eq!(gts.stage(), GtsStage::Queued);
        assert_eq!(gts.in_flight_command(), None);

        assert_eq!(gts.submit(), Some((GtsCommand::Request, Message(1))));
        assert_eq!(gts.in_flight_command(), Some(GtsCommand::Request));
        assert_eq!(gts.submit(), None);

        assert_eq!(gts.send_completed(), None);
        assert_eq!(gts.stage(), GtsStage::WaitForReply);
        assert_eq!(gts.in_flight_command(), None);

        // The reply assigns other slots than we preferred
        gts.pending_confirm_mut().preferred_slot_id = 6;
        gts.queue(GtsCommand::Notify, Message(2)).unwrap();
        assert_eq!(gts.submit(), Some((GtsCommand::Notify, Message(2))));

        let done = gts.send_completed().unwrap();
        assert_eq!(
            done,
            DsmeGtsConfirm {
                preferred_slot_id: 6,
                ..confirm()
            }
        );
        assert!(gts.is_idle());
    }

    #[test_log::test]
    fn responder_waits_for_the_notify() {
        let mut gts = GtsData::new();
        gts.begin(GtsCommand::Reply, Message(1), confirm()).unwrap();
        gts.submit().unwrap();

        assert_eq!(gts.send_completed(), None);
        assert_eq!(gts.stage(), GtsStage::WaitForNotify);

        // Nothing follows the reply on this side
        assert_eq!(gts.queue(GtsCommand::Notify, Message(2)), Err(Message(2)));
        assert_eq!(gts.stage(), GtsStage::WaitForNotify);

        let done = gts.resolve(Status::Success).unwrap();
        assert_eq!(done.status, Status::Success);
        assert!(gts.is_idle());
    }

    #[test_log::test]
    fn second_message_is_handed_back() {
        let mut gts = GtsData::new();
        gts.begin(GtsCommand::Request, Message(1), confirm()).unwrap();

        assert_eq!(
            gts.begin(GtsCommand::Request, Message(2), confirm()),
            Err(Message(2))
        );
        assert_eq!(gts.queue(GtsCommand::Notify, Message(3)), Err(Message(3)));

        // The first one is still the one that gets sent
        assert_eq!(gts.submit(), Some((GtsCommand::Request, Message(1))));
    }

    #[test_log::test]
    fn abort_returns_the_queued_message() {
        let mut gts = GtsData::new();
        gts.begin(GtsCommand::Request, Message(1), confirm()).unwrap();

        let (message, done) = gts.abort(Status::TransactionExpired);
        assert_eq!(message, Some(Message(1)));
        assert_eq!(done.unwrap().status, Status::TransactionExpired);
        assert!(gts.is_idle());

        assert_eq!(gts.abort(Status::TransactionExpired), (None, None));
    }

    #[test_log::test]
    fn abort_while_sending_leaves_the_message_with_the_send_path() {
        let mut gts = GtsData::new();
        gts.begin(GtsCommand::Request, Message(1), confirm()).unwrap();
        let _sent = gts.submit().unwrap();

        let (message, done) = gts.abort(Status::Denied);
        assert_eq!(message, None);
        assert_eq!(done.unwrap().status, Status::Denied);
    }

    #[test_log::test]
    fn failed_send_concludes_with_its_status() {
        let mut gts = GtsData::new();
        gts.begin(GtsCommand::Request, Message(1), confirm()).unwrap();

        // Not sending yet
        assert_eq!(gts.send_failed(Status::NoAck), None);

        gts.submit().unwrap();
        assert_eq!(gts.send_failed(Status::NoAck).unwrap().status, Status::NoAck);
        assert!(gts.is_idle());
    }

    #[test_log::test]
    fn step_counter_restarts_every_stage() {
        let mut gts = GtsData::new();
        assert_eq!(gts.on_multisuperframe(), 0);

        gts.begin(GtsCommand::Request, Message(1), confirm()).unwrap();
        assert_eq!(gts.on_multisuperframe(), 1);
        gts.submit().unwrap();
        gts.send_completed();

        assert_eq!(gts.multisuperframes_in_current_stage(), 0);
        for _ in 0..3 {
            gts.on_multisuperframe();
        }
        assert_eq!(gts.multisuperframes_in_current_stage(), 3);

        // The negotiation layer decides this took too long
        let done = gts.resolve(Status::NoData).unwrap();
        assert_eq!(done.status, Status::NoData);
        assert_eq!(gts.multisuperframes_in_current_stage(), 0);
    }

    #[test_log::test]
    fn out_of_stage_events_are_ignored() {
        let mut gts = GtsData::<Message>::new();

        assert_eq!(gts.send_completed(), None);
        assert_eq!(gts.resolve(Status::Success), None);
        assert!(gts.is_idle());
    }
}
