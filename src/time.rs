use core::{
    fmt::Display,
    ops::{Add, AddAssign, Sub, SubAssign},
};

/// The largest distance, in symbols, between two counts that can still be ordered.
///
/// Counts further apart than this are ambiguous on a 32-bit wrapping counter.
pub const MAX_SYMBOL_SPAN: u32 = i32::MAX as u32;

/// A value of the hardware symbol counter.
///
/// The counter is 32 bits wide and wraps modulo 2^32.
/// Every difference between two counts is taken with wrapping subtraction,
/// so the ordering of two counts less than [MAX_SYMBOL_SPAN] apart stays correct across the wrap.
///
/// At 62.5 ksymbol/s (O-QPSK 2450 MHz) it wraps every ~19 hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct SymbolCount(u32);

impl SymbolCount {
    pub const fn new(symbols: u32) -> Self {
        Self(symbols)
    }

    pub const fn symbols(&self) -> u32 {
        self.0
    }

    /// The amount of symbols from `earlier` to `self`, modulo 2^32.
    #[must_use]
    pub const fn wrapping_since(self, earlier: Self) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Is `self` strictly before `other` on the wrapping counter?
    #[must_use]
    pub const fn is_before(self, other: Self) -> bool {
        (self.0.wrapping_sub(other.0) as i32) < 0
    }

    /// Is `self` strictly after `other` on the wrapping counter?
    #[must_use]
    pub const fn is_after(self, other: Self) -> bool {
        other.is_before(self)
    }

    /// The later of the two counts
    #[must_use]
    pub const fn latest(self, other: Self) -> Self {
        if self.is_before(other) {
            other
        } else {
            self
        }
    }
}

impl Display for SymbolCount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} syms", self.0)
    }
}

impl Add<u32> for SymbolCount {
    type Output = SymbolCount;

    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for SymbolCount {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<u32> for SymbolCount {
    type Output = SymbolCount;

    fn sub(self, rhs: u32) -> Self::Output {
        Self(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<u32> for SymbolCount {
    fn sub_assign(&mut self, rhs: u32) {
        *self = *self - rhs;
    }
}

impl Sub<SymbolCount> for SymbolCount {
    type Output = u32;

    fn sub(self, rhs: SymbolCount) -> Self::Output {
        self.wrapping_since(rhs)
    }
}

impl From<u32> for SymbolCount {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// The platform's symbol counter and its single compare register.
///
/// Implementations are thin wrappers around the radio or MCU timer peripheral.
pub trait SymbolClock {
    /// Read the free running symbol counter
    fn now(&self) -> SymbolCount;

    /// Program the compare register. The platform must raise the alarm interrupt
    /// once the counter reaches `deadline`, and call the timer interrupt entry point from it.
    ///
    /// Writing a new value replaces the previous one, there is only ever one pending alarm.
    fn set_compare(&mut self, deadline: SymbolCount);
}
