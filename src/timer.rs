//! One hardware compare register shared by a fixed set of logical timers.
//!
//! The multiplexer keeps every logical deadline relative to the symbol count of the last dispatch.
//! On each alarm interrupt it fires all due timers in the fixed order of [TimerId::ALL],
//! ages the remaining ones and programs the compare register for the nearest deadline left.
//!
//! There is no locking inside. Arming and stopping timers must happen in the interrupt
//! context itself, or in a context that can't be preempted by it
//! (see [crate::dispatcher::SharedEventDispatcher]).

use core::marker::PhantomData;

use crate::{
    consts::MIN_COMPARE_HEADROOM,
    time::{SymbolClock, SymbolCount},
};

/// How far ahead the compare register is parked when no logical timer is active.
///
/// The interrupt at the parking spot still moves the dispatch reference forward,
/// so a deadline that is armed less than this far ahead of the counter
/// can always be expressed relative to the reference.
pub const PARK_DISTANCE: u32 = 1 << 30;

/// The set of logical timers a [TimerMultiplexer] serves
pub trait TimerId: Copy + 'static {
    /// Every timer of the set, in dispatch order.
    /// Timers that are due in the same interrupt always fire in this order.
    const ALL: &'static [Self];

    /// The position of the timer in [Self::ALL].
    /// Must be below the length of [Self::ALL].
    fn index(self) -> usize;

    /// Name used in logging
    fn name(self) -> &'static str;
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer<H> {
    /// Symbols from the last dispatch until the timer is due
    remaining: u32,
    /// Symbols the deadline was already behind the last dispatch
    overdue: u32,
    handler: H,
}

/// Multiplexes `N` logical timers of set `T` onto one [SymbolClock] compare register.
///
/// Every armed timer carries a handler tag `H` that is given back when the timer fires.
pub struct TimerMultiplexer<T: TimerId, H, const N: usize> {
    last_dispatch: SymbolCount,
    timers: [Option<ArmedTimer<H>>; N],
    programmed_deadline: Option<SymbolCount>,
    _timer_id: PhantomData<T>,
}

impl<T: TimerId, H: Copy, const N: usize> TimerMultiplexer<T, H, N> {
    pub const fn new() -> Self {
        ::core::assert!(T::ALL.len() == N, "N must match the amount of timer ids");

        Self {
            last_dispatch: SymbolCount::new(0),
            timers: [None; N],
            programmed_deadline: None,
            _timer_id: PhantomData,
        }
    }

    /// Take the current symbol count as the reference point for all deadlines
    pub fn initialize(&mut self, clock: &impl SymbolClock) {
        self.last_dispatch = clock.now();
        trace!("Timer multiplexer reference set to {}", self.last_dispatch);
    }

    /// Arm `timer` to fire at the absolute `deadline`, replacing its previous deadline and handler.
    ///
    /// The deadline may not be behind the last dispatch. Such a deadline was computed from stale state
    /// and is a fatal error.
    ///
    /// The compare register is not touched, call [Self::reschedule] when not inside an interrupt.
    pub fn start_timer(&mut self, timer: T, deadline: SymbolCount, handler: H) {
        invariant!(
            !deadline.is_before(self.last_dispatch),
            "Deadline {} of the {} timer is behind the last dispatch at {}",
            deadline,
            timer.name(),
            self.last_dispatch
        );

        let remaining = deadline.wrapping_since(self.last_dispatch);
        trace!(
            "Arming the {} timer at {} ({} symbols after the last dispatch)",
            timer.name(),
            deadline,
            remaining
        );

        self.timers[Self::slot(timer)] = Some(ArmedTimer {
            remaining,
            overdue: 0,
            handler,
        });
    }

    /// Disarm `timer`. Stopping an inactive timer does nothing.
    pub fn stop_timer(&mut self, timer: T) {
        if self.timers[Self::slot(timer)].take().is_some() {
            trace!("Stopped the {} timer", timer.name());
        }
    }

    pub fn is_active(&self, timer: T) -> bool {
        self.timers[Self::slot(timer)].is_some()
    }

    /// The symbols between the last dispatch and the deadline of `timer`, if it's armed
    pub fn remaining(&self, timer: T) -> Option<u32> {
        self.timers[Self::slot(timer)].map(|armed| armed.remaining)
    }

    /// The symbol count all remaining times are relative to
    pub fn last_dispatch(&self) -> SymbolCount {
        self.last_dispatch
    }

    /// The compare value last programmed for an armed timer.
    /// None while the register is parked.
    pub fn programmed_deadline(&self) -> Option<SymbolCount> {
        self.programmed_deadline
    }

    /// Handle the alarm interrupt of the compare register.
    ///
    /// Every due timer is disarmed and `fire` is called with the multiplexer, the clock,
    /// the handler of the timer and its lateness in symbols.
    /// The handler may arm or stop timers, including the one that fired.
    ///
    /// After all handlers returned, the compare register is programmed for the next deadline.
    pub fn timer_interrupt<C, F>(&mut self, clock: &mut C, mut fire: F)
    where
        C: SymbolClock,
        F: FnMut(&mut Self, &mut C, H, u32),
    {
        self.dispatch(clock, &mut fire);
        self.reschedule(clock);
    }

    fn dispatch<C, F>(&mut self, clock: &mut C, fire: &mut F)
    where
        C: SymbolClock,
        F: FnMut(&mut Self, &mut C, H, u32),
    {
        let now = clock.now();
        let elapsed = now.wrapping_since(self.last_dispatch);

        for &timer in T::ALL {
            let index = Self::slot(timer);

            let Some(armed) = self.timers[index] else {
                continue;
            };

            if armed.remaining > elapsed {
                continue;
            }

            // Disarm before firing so the handler can arm it again
            self.timers[index] = None;

            let lateness = (elapsed - armed.remaining).saturating_add(armed.overdue);
            trace!("Firing the {} timer, {} symbols late", timer.name(), lateness);
            fire(self, clock, armed.handler, lateness);
        }

        // Timers armed by a handler are relative to the old reference too.
        // If one of them is already overdue, it becomes due right away and keeps its lateness.
        for armed in self.timers.iter_mut().flatten() {
            armed.overdue = armed
                .overdue
                .saturating_add(elapsed.saturating_sub(armed.remaining));
            armed.remaining = armed.remaining.saturating_sub(elapsed);
        }

        self.last_dispatch = now;
    }

    fn slot(timer: T) -> usize {
        let index = timer.index();
        debug_assert!(index < N, "Index {} of the {} timer is out of range", index, timer.name());
        index
    }

    /// Program the compare register for the nearest armed deadline.
    ///
    /// The compare value is kept at least [MIN_COMPARE_HEADROOM] symbols after the current count,
    /// so a deadline that passed during processing still raises an interrupt.
    /// Without armed timers the register is parked [PARK_DISTANCE] symbols ahead.
    pub fn reschedule(&mut self, clock: &mut impl SymbolClock) {
        let Some(remaining) = self.timers.iter().flatten().map(|armed| armed.remaining).min()
        else {
            let parking_spot = clock.now() + PARK_DISTANCE;
            trace!("No timer armed, parking the compare register at {}", parking_spot);

            clock.set_compare(parking_spot);
            self.programmed_deadline = None;
            return;
        };

        let earliest = clock.now() + MIN_COMPARE_HEADROOM;
        let deadline = (self.last_dispatch + remaining).latest(earliest);

        clock.set_compare(deadline);
        self.programmed_deadline = Some(deadline);

        let now = clock.now();
        invariant!(
            deadline.is_after(now),
            "Compare register programmed to {} which is not after now ({})",
            deadline,
            now
        );
    }
}

impl<T: TimerId, H: Copy, const N: usize> Default for TimerMultiplexer<T, H, N> {
    fn default() -> Self {
        Self::new()
    }
}
