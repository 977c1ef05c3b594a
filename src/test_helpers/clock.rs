use std::cell::Cell;

use crate::time::{SymbolClock, SymbolCount};

/// A symbol counter that only moves when told to.
///
/// Every compare value that's written is recorded. [SimulatedClock::jump_to_compare] moves the
/// counter to the programmed compare value, which is what the alarm interrupt would see.
#[derive(Debug, Default)]
pub struct SimulatedClock {
    now: Cell<u32>,
    read_drift: u32,
    compare_writes: Vec<SymbolCount>,
}

impl SimulatedClock {
    pub fn starting_at(symbols: u32) -> Self {
        Self {
            now: Cell::new(symbols),
            ..Default::default()
        }
    }

    /// Let the counter move `drift` symbols after every read, like a slow processor would see it
    pub fn with_read_drift(self, drift: u32) -> Self {
        Self {
            read_drift: drift,
            ..self
        }
    }

    pub fn set_now(&mut self, symbols: u32) {
        self.now.set(symbols);
    }

    pub fn advance(&mut self, symbols: u32) {
        self.now.set(self.now.get().wrapping_add(symbols));
    }

    /// The currently programmed compare value
    pub fn compare(&self) -> Option<SymbolCount> {
        self.compare_writes.last().copied()
    }

    /// Every compare value written so far, oldest first
    pub fn compare_writes(&self) -> &[SymbolCount] {
        &self.compare_writes
    }

    /// Move the counter to the programmed compare value and return it.
    ///
    /// Panics if nothing was ever programmed.
    pub fn jump_to_compare(&mut self) -> SymbolCount {
        let compare = self
            .compare()
            .expect("the compare register was never programmed");
        self.now.set(compare.symbols());
        compare
    }
}

impl SymbolClock for SimulatedClock {
    fn now(&self) -> SymbolCount {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.read_drift));
        SymbolCount::new(now)
    }

    fn set_compare(&mut self, deadline: SymbolCount) {
        self.compare_writes.push(deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_drift_the_counter() {
        let clock = SimulatedClock::starting_at(u32::MAX).with_read_drift(2);

        assert_eq!(clock.now(), SymbolCount::new(u32::MAX));
        assert_eq!(clock.now(), SymbolCount::new(1));
    }

    #[test]
    fn jumps_to_the_last_compare() {
        let mut clock = SimulatedClock::starting_at(10);
        clock.set_compare(SymbolCount::new(40));
        clock.set_compare(SymbolCount::new(30));

        assert_eq!(clock.jump_to_compare(), SymbolCount::new(30));
        assert_eq!(clock.now(), SymbolCount::new(30));
        assert_eq!(clock.compare_writes().len(), 2);
    }
}
