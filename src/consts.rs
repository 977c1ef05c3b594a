//! The constants defined in tables 51 and 70, plus the DSME slot layout of 5.1.10

/// The number of symbols forming a superframe slot
/// when the superframe order is equal to zero, as
/// described in 5.1.1.1.
#[doc(alias = "aBaseSlotDuration")]
pub const BASE_SLOT_DURATION: u32 = 60;

/// The number of symbols forming a superframe when
/// the superframe order is equal to zero.
#[doc(alias = "aBaseSuperframeDuration")]
pub const BASE_SUPERFRAME_DURATION: u32 = BASE_SLOT_DURATION * NUM_SUPERFRAME_SLOTS;

/// The number of slots contained in any superframe.
#[doc(alias = "aNumSuperframeSlots")]
pub const NUM_SUPERFRAME_SLOTS: u32 = 16;

/// The number of symbols forming the basic time period
/// used by the CSMA-CA algorithm.
#[doc(alias = "aUnitBackoffPeriod")]
pub const UNIT_BACKOFF_PERIOD: u32 = 20;

/// RX-to-TX or TX-to-RX turnaround time (in symbol periods), as
/// defined in 8.2.1 and 8.2.2.
#[doc(alias = "aTurnaroundTime")]
pub const TURNAROUND_TIME: u32 = 12;

/// The highest superframe order that still describes an active superframe.
/// Order 15 means the superframe is inactive.
pub const MAX_SUPERFRAME_ORDER: u8 = 14;

/// The number of DSME-GTS slots in the contention free period of one
/// superframe. The beacon slot and the 8 CAP slots take up the rest.
#[doc(alias = "aNumGTSSlots")]
pub const NUM_GTS_SLOTS: u16 = 7;

/// The duration of the synchronization header in symbols for the
/// O-QPSK 2450 MHz PHY.
#[doc(alias = "phySHRDuration")]
pub const SHR_DURATION: u32 = 10;

/// The number of symbols per octet for the O-QPSK 2450 MHz PHY.
#[doc(alias = "phySymbolsPerOctet")]
pub const SYMBOLS_PER_OCTET: u32 = 2;

/// The maximum number of symbols to wait for an acknowledgment frame to arrive following a transmitted data
/// frame. Derived from the PHY constants the same way as `macAckWaitDuration` in 6.4.3.
#[doc(alias = "macAckWaitDuration")]
pub const ACK_WAIT_DURATION: u32 =
    UNIT_BACKOFF_PERIOD + TURNAROUND_TIME + SHR_DURATION + 6 * SYMBOLS_PER_OCTET;

/// The number of symbols before a slot boundary at which the pre-slot event fires,
/// giving the MAC time to prepare the radio for the coming slot.
pub const PRE_SLOT_LEAD_TIME: u32 = 40;

/// The minimum distance between the current symbol count and a programmed compare value.
/// A closer compare value could already be in the past by the time the hardware is armed.
pub const MIN_COMPARE_HEADROOM: u32 = 2;
