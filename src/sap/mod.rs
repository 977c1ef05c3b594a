//! The MLME service access point primitives the DSME core deals with

pub mod dsme_gts;

/// The status values of the MLME confirm primitives, as far as they apply to DSME-GTS
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Status {
    #[default]
    Success,
    NoAck,
    TransactionOverflow,
    TransactionExpired,
    ChannelAccessFailure,
    InvalidParameter,
    NoData,
    Denied,
    NoShortAddress,
    LimitReached,
}

impl Status {
    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }
}
