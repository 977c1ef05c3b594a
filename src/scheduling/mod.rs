//! Deciding how many DSME-GTSs every link should hold.
//!
//! A [GtsScheduling] implementation collects the traffic statistics of every neighbor and, once per
//! multisuperframe, tells the [NegotiationDriver] which links need more or fewer slots.
//! The handshakes that follow are entirely up to the driver.

use crate::ShortAddress;

mod tps;

pub use tps::{Tps, TpsConfig};

/// The negotiation layer that turns allocation decisions into DSME-GTS handshakes
pub trait NegotiationDriver {
    /// The number of TX slots currently allocated towards `address`
    fn allocated_slots(&self, address: ShortAddress) -> u16;

    /// `address` should get `slot_delta` more TX slots
    fn on_allocation_intent(&mut self, address: ShortAddress, slot_delta: u16);

    /// `address` can do with `slot_delta` fewer TX slots
    fn on_deallocation_intent(&mut self, address: ShortAddress, slot_delta: u16);
}

pub trait GtsScheduling {
    /// Record a finished transmission attempt towards `address`.
    ///
    /// - `success`: false if the message is still queued for another attempt
    /// - `service_time`: symbols between queueing and the end of the attempt
    /// - `queue_at_creation`: the length of the link queue when the message was queued
    fn register_outgoing_message(
        &mut self,
        address: ShortAddress,
        success: bool,
        service_time: u32,
        queue_at_creation: u8,
    );

    /// Record a message received from `address`
    fn register_incoming_message(&mut self, address: ShortAddress);

    /// Run the per multisuperframe allocation decisions
    fn multisuperframe_event<D: NegotiationDriver>(&mut self, driver: &mut D);

    /// The current transmit statistics of the link towards `address`, if it's tracked
    fn link_statistics(&self, address: ShortAddress) -> Option<LinkStatistics>;

    /// The current receive statistics of the link from `address`, if it's tracked
    fn receive_statistics(&self, address: ShortAddress) -> Option<ReceiveStatistics>;
}

/// Snapshot of what a scheduler knows about the transmissions towards a neighbor
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct LinkStatistics {
    /// Moving average of the messages queued per multisuperframe
    pub average_arrivals: f32,
    /// Messages queued so far in the current multisuperframe
    pub arrivals_this_multisuperframe: u16,
    /// Moving average of the service time divided by the queue length, in symbols
    pub service_time_per_queue_length: f32,
    /// Messages that were in the link queue at the last registration
    pub queue_depth: u16,
    /// Moving average of the difference between the desired and the allocated slots
    pub scheduling_error: f32,
    /// The multisuperframe of the last registration
    pub last_multisuperframe: u32,
}

impl LinkStatistics {
    /// The expected time in symbols a new message waits in the link queue
    pub fn estimated_queueing_delay(&self) -> f32 {
        self.service_time_per_queue_length * f32::from(self.queue_depth)
    }
}

/// Snapshot of what a scheduler knows about the receptions from a neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ReceiveStatistics {
    pub messages_this_multisuperframe: u16,
    pub messages_last_multisuperframe: u16,
    /// The multisuperframe in which the last message was received
    pub last_multisuperframe: u32,
}
