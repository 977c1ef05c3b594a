use crate::ShortAddress;

use super::Status;

/// The kind of DSME-GTS management, as carried in the DSME GTS Management field (5.3.11.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[repr(u8)]
pub enum ManagementType {
    Deallocation = 0,
    #[default]
    Allocation = 1,
    DuplicatedAllocationNotification = 2,
    ReduceRequest = 3,
    RestartRequest = 4,
    Expiration = 5,
}

impl TryFrom<u8> for ManagementType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Deallocation),
            1 => Ok(Self::Allocation),
            2 => Ok(Self::DuplicatedAllocationNotification),
            3 => Ok(Self::ReduceRequest),
            4 => Ok(Self::RestartRequest),
            5 => Ok(Self::Expiration),
            _ => Err(value),
        }
    }
}

/// The direction of a DSME-GTS, seen from the device that issued the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Direction {
    #[default]
    Transmit,
    Receive,
}

impl Direction {
    /// The direction of the same slots seen from the other end of the link
    pub fn reverse(self) -> Self {
        match self {
            Direction::Transmit => Direction::Receive,
            Direction::Receive => Direction::Transmit,
        }
    }
}

/// The MLME-DSME-GTS.confirm primitive reports the results of a request to allocate,
/// deallocate or otherwise manage DSME-GTSs.
///
/// The intermediate steps of the handshake don't carry the full result,
/// so the parameters are collected while the handshake runs and reported when it concludes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct DsmeGtsConfirm {
    /// The short address of the device the DSME-GTSs are managed with
    pub device_address: Option<ShortAddress>,
    pub management_type: ManagementType,
    pub direction: Direction,
    /// Whether the DSME-GTSs are used for high priority traffic
    pub prioritized_channel_access: bool,
    /// The number of DSME-GTSs requested
    pub num_slots: u8,
    /// The superframe the first requested slot is preferably placed in
    pub preferred_superframe_id: u16,
    /// The slot in the preferred superframe the first requested slot is preferably placed in
    pub preferred_slot_id: u8,
    pub status: Status,
}
