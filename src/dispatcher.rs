//! The four DSME event timers on top of the [TimerMultiplexer].
//!
//! The dispatcher turns beacon and slot references into slot boundary deadlines
//! and forwards every fired timer, with its lateness, to the MAC state machine.
//! It never retries anything itself, that's up to the [MacEventHandler].

use core::cell::RefCell;

use critical_section::Mutex;

use crate::{
    consts::{ACK_WAIT_DURATION, BASE_SLOT_DURATION, MAX_SUPERFRAME_ORDER, PRE_SLOT_LEAD_TIME},
    time::{SymbolClock, SymbolCount},
    timer::{TimerId, TimerMultiplexer},
    ConfigError,
};

/// The logical timers of the dispatcher, in dispatch order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum EventTimer {
    /// Fires [SlotTiming::pre_slot_lead] symbols before the next slot boundary
    PreSlot,
    /// Fires at the slot boundary
    Slot,
    /// Fires when the CSMA-CA backoff is over
    Csma,
    /// Fires when no acknowledgment arrived in time
    Ack,
}

impl TimerId for EventTimer {
    const ALL: &'static [Self] = &[Self::PreSlot, Self::Slot, Self::Csma, Self::Ack];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            EventTimer::PreSlot => "pre-slot",
            EventTimer::Slot => "slot",
            EventTimer::Csma => "CSMA",
            EventTimer::Ack => "ACK",
        }
    }
}

impl EventTimer {
    /// Run the MAC handler this timer is bound to
    fn fire<C: SymbolClock>(
        self,
        mac: &mut impl MacEventHandler<C>,
        lateness: u32,
        timers: &mut SlotTimers<'_, C>,
    ) {
        match self {
            EventTimer::PreSlot => mac.on_pre_slot(lateness, timers),
            EventTimer::Slot => mac.on_slot(lateness, timers),
            EventTimer::Csma => mac.on_csma_expiry(lateness, timers),
            EventTimer::Ack => mac.on_ack_timeout(lateness, timers),
        }
    }
}

pub type EventMultiplexer = TimerMultiplexer<EventTimer, EventTimer, 4>;

/// The MAC state machine the fired events are forwarded to.
///
/// Every handler gets the lateness of the event in symbols and a [SlotTimers]
/// handle to arm the next events. Handlers run inside the alarm interrupt, so they must be short
/// and may not block: the compare register is only reprogrammed after all of them returned.
pub trait MacEventHandler<C: SymbolClock> {
    /// The next slot starts in [SlotTiming::pre_slot_lead] symbols, minus the lateness
    fn on_pre_slot(&mut self, lateness: u32, timers: &mut SlotTimers<'_, C>);
    /// A slot boundary was reached
    fn on_slot(&mut self, lateness: u32, timers: &mut SlotTimers<'_, C>);
    /// The CSMA-CA backoff period is over
    fn on_csma_expiry(&mut self, lateness: u32, timers: &mut SlotTimers<'_, C>);
    /// The acknowledgment wait duration passed without a call to [SlotTimers::stop_ack_timer]
    fn on_ack_timeout(&mut self, lateness: u32, timers: &mut SlotTimers<'_, C>);
}

/// The slot related durations, in symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct SlotTiming {
    slot_duration: u32,
    pre_slot_lead: u32,
    ack_wait_duration: u32,
}

impl SlotTiming {
    /// The timing of a superframe with the given order, with the default pre-slot lead
    /// and acknowledgment wait duration.
    pub fn new(superframe_order: u8) -> Result<Self, ConfigError> {
        if superframe_order > MAX_SUPERFRAME_ORDER {
            return Err(ConfigError::InvalidSuperframeOrder(superframe_order));
        }

        Self {
            slot_duration: BASE_SLOT_DURATION << superframe_order,
            pre_slot_lead: 0,
            ack_wait_duration: ACK_WAIT_DURATION,
        }
        .with_pre_slot_lead(PRE_SLOT_LEAD_TIME)
    }

    /// Use another pre-slot lead time. It must be shorter than a slot.
    pub fn with_pre_slot_lead(self, pre_slot_lead: u32) -> Result<Self, ConfigError> {
        if pre_slot_lead >= self.slot_duration {
            return Err(ConfigError::PreSlotLeadTooLong {
                lead: pre_slot_lead,
                slot_duration: self.slot_duration,
            });
        }

        Ok(Self {
            pre_slot_lead,
            ..self
        })
    }

    #[must_use]
    pub fn with_ack_wait_duration(self, ack_wait_duration: u32) -> Self {
        Self {
            ack_wait_duration,
            ..self
        }
    }

    /// `aBaseSlotDuration * 2^SO`
    pub fn slot_duration(&self) -> u32 {
        self.slot_duration
    }

    pub fn pre_slot_lead(&self) -> u32 {
        self.pre_slot_lead
    }

    pub fn ack_wait_duration(&self) -> u32 {
        self.ack_wait_duration
    }
}

/// Access to the event timers.
///
/// Handed to the [MacEventHandler] during dispatch. Arming a timer here doesn't touch the compare
/// register, that happens once at the end of the interrupt.
pub struct SlotTimers<'a, C> {
    multiplexer: &'a mut EventMultiplexer,
    clock: &'a mut C,
    timing: &'a SlotTiming,
    slot_start: &'a mut Option<SymbolCount>,
}

impl<C: SymbolClock> SlotTimers<'_, C> {
    pub fn now(&self) -> SymbolCount {
        self.clock.now()
    }

    pub fn timing(&self) -> &SlotTiming {
        self.timing
    }

    /// The last slot boundary the slot timer was armed for
    pub fn slot_start(&self) -> Option<SymbolCount> {
        *self.slot_start
    }

    /// Arm the slot timer for the boundary `slots_since_last_heard_beacon` slots after the beacon.
    ///
    /// The pre-slot timer is armed too, unless we're already in the pre-slot window
    /// (`within_pre_slot`). Returns the deadline of the slot.
    pub fn setup_slot_timer_from_beacon(
        &mut self,
        last_heard_beacon: SymbolCount,
        slots_since_last_heard_beacon: u16,
        within_pre_slot: bool,
    ) -> SymbolCount {
        let offset = u32::from(slots_since_last_heard_beacon).wrapping_mul(self.timing.slot_duration);
        let deadline = last_heard_beacon + offset;

        if !within_pre_slot {
            self.multiplexer.start_timer(
                EventTimer::PreSlot,
                deadline - self.timing.pre_slot_lead,
                EventTimer::PreSlot,
            );
        }
        self.start_slot(deadline);

        deadline
    }

    /// Arm the slot and pre-slot timers for the slot right after the one starting at `last_slot`.
    /// Returns the deadline of the slot.
    pub fn setup_next_slot_timer(&mut self, last_slot: SymbolCount) -> SymbolCount {
        let deadline = last_slot + self.timing.slot_duration;

        self.multiplexer.start_timer(
            EventTimer::PreSlot,
            deadline - self.timing.pre_slot_lead,
            EventTimer::PreSlot,
        );
        self.start_slot(deadline);

        deadline
    }

    fn start_slot(&mut self, deadline: SymbolCount) {
        self.multiplexer
            .start_timer(EventTimer::Slot, deadline, EventTimer::Slot);
        *self.slot_start = Some(deadline);
    }

    /// Arm the CSMA timer for the end of the backoff at `deadline`
    pub fn setup_csma_timer(&mut self, deadline: SymbolCount) {
        self.multiplexer
            .start_timer(EventTimer::Csma, deadline, EventTimer::Csma);
    }

    /// Arm the ACK timer to run out one acknowledgment wait duration from now
    pub fn setup_ack_timer(&mut self) {
        let deadline = self.clock.now() + self.timing.ack_wait_duration;
        self.multiplexer
            .start_timer(EventTimer::Ack, deadline, EventTimer::Ack);
    }

    /// The acknowledgment was received in time
    pub fn stop_ack_timer(&mut self) {
        self.multiplexer.stop_timer(EventTimer::Ack);
    }
}

/// Owner of the symbol clock and the event timers
pub struct EventDispatcher<C: SymbolClock> {
    clock: C,
    multiplexer: EventMultiplexer,
    timing: SlotTiming,
    slot_start: Option<SymbolCount>,
}

impl<C: SymbolClock> EventDispatcher<C> {
    pub const fn new(clock: C, timing: SlotTiming) -> Self {
        Self {
            clock,
            multiplexer: EventMultiplexer::new(),
            timing,
            slot_start: None,
        }
    }

    /// Take the current symbol count as reference and park the compare register
    pub fn initialize(&mut self) {
        self.multiplexer.initialize(&self.clock);
        self.multiplexer.reschedule(&mut self.clock);
        debug!(
            "Event dispatcher initialized at {} with {} symbol slots",
            self.multiplexer.last_dispatch(),
            self.timing.slot_duration
        );
    }

    /// Entry point for the alarm interrupt of the compare register
    pub fn timer_interrupt(&mut self, mac: &mut impl MacEventHandler<C>) {
        let Self {
            clock,
            multiplexer,
            timing,
            slot_start,
        } = self;
        let timing: &SlotTiming = timing;

        multiplexer.timer_interrupt(clock, |multiplexer, clock, timer, lateness| {
            let mut timers = SlotTimers {
                multiplexer,
                clock,
                timing,
                slot_start: &mut *slot_start,
            };
            timer.fire(mac, lateness, &mut timers);
        });
    }

    /// See [SlotTimers::setup_slot_timer_from_beacon]. The compare register is reprogrammed right away.
    pub fn setup_slot_timer_from_beacon(
        &mut self,
        last_heard_beacon: SymbolCount,
        slots_since_last_heard_beacon: u16,
        within_pre_slot: bool,
    ) -> SymbolCount {
        let deadline = self.timers().setup_slot_timer_from_beacon(
            last_heard_beacon,
            slots_since_last_heard_beacon,
            within_pre_slot,
        );
        self.reschedule();
        deadline
    }

    /// See [SlotTimers::setup_next_slot_timer]. The compare register is reprogrammed right away.
    pub fn setup_next_slot_timer(&mut self, last_slot: SymbolCount) -> SymbolCount {
        let deadline = self.timers().setup_next_slot_timer(last_slot);
        self.reschedule();
        deadline
    }

    pub fn setup_csma_timer(&mut self, deadline: SymbolCount) {
        self.timers().setup_csma_timer(deadline);
        self.reschedule();
    }

    pub fn setup_ack_timer(&mut self) {
        self.timers().setup_ack_timer();
        self.reschedule();
    }

    pub fn stop_ack_timer(&mut self) {
        self.timers().stop_ack_timer();
        self.reschedule();
    }

    pub fn now(&self) -> SymbolCount {
        self.clock.now()
    }

    pub fn timing(&self) -> &SlotTiming {
        &self.timing
    }

    /// The last slot boundary the slot timer was armed for
    pub fn slot_start(&self) -> Option<SymbolCount> {
        self.slot_start
    }

    pub fn multiplexer(&self) -> &EventMultiplexer {
        &self.multiplexer
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    fn timers(&mut self) -> SlotTimers<'_, C> {
        SlotTimers {
            multiplexer: &mut self.multiplexer,
            clock: &mut self.clock,
            timing: &self.timing,
            slot_start: &mut self.slot_start,
        }
    }

    fn reschedule(&mut self) {
        self.multiplexer.reschedule(&mut self.clock);
    }
}

/// An [EventDispatcher] that can be shared between the alarm interrupt and thread mode.
///
/// Every access runs in a critical section, so arming timers from thread mode
/// can never interleave with a dispatch.
pub struct SharedEventDispatcher<C: SymbolClock> {
    inner: Mutex<RefCell<EventDispatcher<C>>>,
}

impl<C: SymbolClock> SharedEventDispatcher<C> {
    pub const fn new(dispatcher: EventDispatcher<C>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(dispatcher)),
        }
    }

    /// Run `f` with exclusive access to the dispatcher
    pub fn lock<R>(&self, f: impl FnOnce(&mut EventDispatcher<C>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    /// Entry point for the alarm interrupt of the compare register
    pub fn timer_interrupt(&self, mac: &mut impl MacEventHandler<C>) {
        self.lock(|dispatcher| dispatcher.timer_interrupt(mac));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_helpers::{FiredEvent, RecordingMac, SimulatedClock};

    fn dispatcher_at(start: u32) -> EventDispatcher<SimulatedClock> {
        // 60 symbol slots, 40 symbol pre-slot lead
        let mut dispatcher = EventDispatcher::new(
            SimulatedClock::starting_at(start),
            SlotTiming::new(0).unwrap(),
        );
        dispatcher.initialize();
        dispatcher
    }

    fn fire_next(dispatcher: &mut EventDispatcher<SimulatedClock>, mac: &mut RecordingMac) {
        dispatcher.clock_mut().jump_to_compare();
        dispatcher.timer_interrupt(mac);
    }

    #[test]
    fn slot_timing_validation() {
        assert_eq!(SlotTiming::new(3).unwrap().slot_duration(), 480);
        assert_eq!(
            SlotTiming::new(15),
            Err(ConfigError::InvalidSuperframeOrder(15))
        );
        assert_eq!(
            SlotTiming::new(0).unwrap().with_pre_slot_lead(60),
            Err(ConfigError::PreSlotLeadTooLong {
                lead: 60,
                slot_duration: 60
            })
        );
        assert_eq!(
            SlotTiming::new(0)
                .unwrap()
                .with_ack_wait_duration(100)
                .ack_wait_duration(),
            100
        );
    }

    #[test_log::test]
    fn slot_from_beacon_arms_pre_slot_and_slot() {
        let mut dispatcher = dispatcher_at(1000);
        let mut mac = RecordingMac::new();

        let deadline = dispatcher.setup_slot_timer_from_beacon(SymbolCount::new(1000), 3, false);
        assert_eq!(deadline, SymbolCount::new(1180));
        assert_eq!(dispatcher.slot_start(), Some(deadline));
        assert_eq!(
            dispatcher.clock().compare(),
            Some(SymbolCount::new(1180 - 40))
        );

        fire_next(&mut dispatcher, &mut mac);
        fire_next(&mut dispatcher, &mut mac);

        assert_eq!(
            mac.events(),
            [
                FiredEvent {
                    timer: EventTimer::PreSlot,
                    lateness: 0,
                    at: SymbolCount::new(1140)
                },
                FiredEvent {
                    timer: EventTimer::Slot,
                    lateness: 0,
                    at: SymbolCount::new(1180)
                },
            ]
        );
    }

    #[test_log::test]
    fn within_pre_slot_only_arms_the_slot() {
        let mut dispatcher = dispatcher_at(1150);

        dispatcher.setup_slot_timer_from_beacon(SymbolCount::new(1000), 3, true);

        assert!(!dispatcher.multiplexer().is_active(EventTimer::PreSlot));
        assert_eq!(dispatcher.multiplexer().remaining(EventTimer::Slot), Some(30));
        assert_eq!(dispatcher.clock().compare(), Some(SymbolCount::new(1180)));
    }

    #[test_log::test]
    fn steady_state_slot_follows_the_last_one() {
        let mut dispatcher = dispatcher_at(0);

        let deadline = dispatcher.setup_next_slot_timer(SymbolCount::new(100));

        assert_eq!(deadline, SymbolCount::new(160));
        assert_eq!(dispatcher.multiplexer().remaining(EventTimer::Slot), Some(160));
        assert_eq!(
            dispatcher.multiplexer().remaining(EventTimer::PreSlot),
            Some(120)
        );
    }

    #[test_log::test]
    fn slot_handler_keeps_the_slots_going() {
        let mut dispatcher = dispatcher_at(0);
        let mut mac = RecordingMac::new().rearming_slots();

        dispatcher.setup_slot_timer_from_beacon(SymbolCount::new(0), 1, false);

        for _ in 0..10 {
            fire_next(&mut dispatcher, &mut mac);
        }

        let slots: Vec<_> = mac
            .events()
            .iter()
            .filter(|event| event.timer == EventTimer::Slot)
            .map(|event| event.at.symbols())
            .collect();
        assert_eq!(slots, [60, 120, 180, 240, 300]);
        assert!(mac.events().iter().all(|event| event.lateness == 0));
    }

    #[test_log::test]
    fn ack_received_in_time_cancels_the_timeout() {
        let mut dispatcher = dispatcher_at(0);
        let mut mac = RecordingMac::new();

        dispatcher.setup_ack_timer();
        assert_eq!(
            dispatcher.clock().compare(),
            Some(SymbolCount::new(ACK_WAIT_DURATION))
        );

        dispatcher.clock_mut().advance(ACK_WAIT_DURATION / 2);
        dispatcher.stop_ack_timer();
        assert_eq!(dispatcher.multiplexer().programmed_deadline(), None);

        fire_next(&mut dispatcher, &mut mac);
        assert!(mac.events().is_empty());
    }

    #[test_log::test]
    fn ack_timeout_after_csma() {
        let mut dispatcher = dispatcher_at(0);
        let mut mac = RecordingMac::new().arming_ack_after_csma();

        dispatcher.setup_csma_timer(SymbolCount::new(80));

        // The interrupt is handled 3 symbols late
        dispatcher.clock_mut().set_now(83);
        dispatcher.timer_interrupt(&mut mac);
        assert_eq!(
            dispatcher.clock().compare(),
            Some(SymbolCount::new(83 + ACK_WAIT_DURATION))
        );

        fire_next(&mut dispatcher, &mut mac);

        assert_eq!(
            mac.events(),
            [
                FiredEvent {
                    timer: EventTimer::Csma,
                    lateness: 3,
                    at: SymbolCount::new(83)
                },
                FiredEvent {
                    timer: EventTimer::Ack,
                    lateness: 0,
                    at: SymbolCount::new(83 + ACK_WAIT_DURATION)
                },
            ]
        );
    }

    #[test_log::test]
    fn shared_dispatcher_from_thread_mode_and_interrupt() {
        let shared = SharedEventDispatcher::new(EventDispatcher::new(
            SimulatedClock::starting_at(0),
            SlotTiming::new(1).unwrap(),
        ));
        let mut mac = RecordingMac::new();

        shared.lock(|dispatcher| {
            dispatcher.initialize();
            dispatcher.setup_csma_timer(SymbolCount::new(500));
            dispatcher.clock_mut().jump_to_compare();
        });
        shared.timer_interrupt(&mut mac);

        assert_eq!(mac.count(EventTimer::Csma), 1);
        assert_eq!(
            shared.lock(|dispatcher| dispatcher.multiplexer().last_dispatch()),
            SymbolCount::new(500)
        );
    }

    #[test_log::test]
    #[should_panic(expected = "invariant violated")]
    fn slot_from_stale_beacon_is_fatal() {
        let mut dispatcher = dispatcher_at(10_000);
        let mut mac = RecordingMac::new();

        dispatcher.clock_mut().set_now(10_100);
        dispatcher.setup_csma_timer(SymbolCount::new(10_100));
        fire_next(&mut dispatcher, &mut mac);

        // Slot 2 after a beacon heard long ago is behind the last dispatch
        dispatcher.setup_slot_timer_from_beacon(SymbolCount::new(5_000), 2, true);
    }
}
