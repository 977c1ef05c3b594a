#![cfg_attr(not(any(test, feature = "std")), no_std)]

// This must go FIRST so that all the other modules see its macros.
mod fmt;

pub mod consts;
pub mod dispatcher;
pub mod gts;
pub mod sap;
pub mod scheduling;
#[cfg(any(test, feature = "test_helpers"))]
pub mod test_helpers;
pub mod time;
pub mod timer;

use core::fmt::Display;

/// A 16-bit short address of a device in the PAN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct ShortAddress(pub u16);

impl ShortAddress {
    /// The broadcast address
    pub const BROADCAST: Self = Self(0xffff);
    /// Assigned to a device that is associated but has no short address
    pub const NONE: Self = Self(0xfffe);

    /// Only a unicast short address can hold GTS
    pub fn is_unicast(&self) -> bool {
        *self != Self::BROADCAST && *self != Self::NONE
    }
}

impl Display for ShortAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// A configuration value was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum ConfigError {
    /// Only orders 0 up to and including 14 describe an active superframe
    InvalidSuperframeOrder(u8),
    /// The pre-slot event must fire inside the previous slot
    PreSlotLeadTooLong { lead: u32, slot_duration: u32 },
    /// The EMA weight must be in the range (0, 1]
    AlphaOutOfRange,
    /// The deallocation threshold must be a positive number
    InvalidDeallocationThreshold,
    /// The staleness window must span at least one multisuperframe
    ZeroStalenessWindow,
    /// The minimum slot count is higher than the maximum
    InvalidSlotRange { min: u16, max: u16 },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl core::error::Error for ConfigError {}
