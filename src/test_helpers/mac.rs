use crate::{
    dispatcher::{EventTimer, MacEventHandler, SlotTimers},
    time::{SymbolClock, SymbolCount},
};

/// One handler call seen by the [RecordingMac]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredEvent {
    pub timer: EventTimer,
    pub lateness: u32,
    /// The symbol count read by the handler
    pub at: SymbolCount,
}

/// A MAC state machine that records the events it gets
#[derive(Debug, Default)]
pub struct RecordingMac {
    events: Vec<FiredEvent>,
    rearm_slots: bool,
    ack_after_csma: bool,
}

impl RecordingMac {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the next slot from every slot event, the steady state of a synchronized device
    pub fn rearming_slots(self) -> Self {
        Self {
            rearm_slots: true,
            ..self
        }
    }

    /// Act as if a frame is sent at the end of every CSMA backoff, and wait for its ACK
    pub fn arming_ack_after_csma(self) -> Self {
        Self {
            ack_after_csma: true,
            ..self
        }
    }

    pub fn events(&self) -> &[FiredEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<FiredEvent> {
        std::mem::take(&mut self.events)
    }

    /// How often `timer` fired
    pub fn count(&self, timer: EventTimer) -> usize {
        self.events
            .iter()
            .filter(|event| event.timer == timer)
            .count()
    }

    fn record<C: SymbolClock>(&mut self, timer: EventTimer, lateness: u32, timers: &SlotTimers<'_, C>) {
        self.events.push(FiredEvent {
            timer,
            lateness,
            at: timers.now(),
        });
    }
}

impl<C: SymbolClock> MacEventHandler<C> for RecordingMac {
    fn on_pre_slot(&mut self, lateness: u32, timers: &mut SlotTimers<'_, C>) {
        self.record(EventTimer::PreSlot, lateness, timers);
    }

    fn on_slot(&mut self, lateness: u32, timers: &mut SlotTimers<'_, C>) {
        self.record(EventTimer::Slot, lateness, timers);

        if self.rearm_slots {
            let slot = timers
                .slot_start()
                .expect("a slot fired without a slot start");
            timers.setup_next_slot_timer(slot);
        }
    }

    fn on_csma_expiry(&mut self, lateness: u32, timers: &mut SlotTimers<'_, C>) {
        self.record(EventTimer::Csma, lateness, timers);

        if self.ack_after_csma {
            timers.setup_ack_timer();
        }
    }

    fn on_ack_timeout(&mut self, lateness: u32, timers: &mut SlotTimers<'_, C>) {
        self.record(EventTimer::Ack, lateness, timers);
    }
}
