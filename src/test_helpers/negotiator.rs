use std::collections::BTreeMap;

use crate::{scheduling::NegotiationDriver, ShortAddress};

/// An intent the scheduler handed to the [SimulatedNegotiator]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Allocate { address: ShortAddress, slots: u16 },
    Deallocate { address: ShortAddress, slots: u16 },
}

impl Intent {
    pub fn address(&self) -> ShortAddress {
        match self {
            Intent::Allocate { address, .. } | Intent::Deallocate { address, .. } => *address,
        }
    }
}

/// A negotiation layer whose handshakes conclude instantly.
///
/// Deallocations always succeed. Allocations are granted up to the optional grant cap,
/// to model a neighbor that doesn't have all the requested slots free.
#[derive(Debug, Default)]
pub struct SimulatedNegotiator {
    allocated: BTreeMap<ShortAddress, u16>,
    intents: Vec<Intent>,
    grant_cap: Option<u16>,
}

impl SimulatedNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant at most `cap` slots per allocation intent
    pub fn with_grant_cap(self, cap: u16) -> Self {
        Self {
            grant_cap: Some(cap),
            ..self
        }
    }

    pub fn allocated(&self, address: ShortAddress) -> u16 {
        self.allocated.get(&address).copied().unwrap_or(0)
    }

    pub fn set_allocated(&mut self, address: ShortAddress, slots: u16) {
        self.allocated.insert(address, slots);
    }

    pub fn intents(&self) -> &[Intent] {
        &self.intents
    }

    pub fn take_intents(&mut self) -> Vec<Intent> {
        std::mem::take(&mut self.intents)
    }
}

impl NegotiationDriver for SimulatedNegotiator {
    fn allocated_slots(&self, address: ShortAddress) -> u16 {
        self.allocated(address)
    }

    fn on_allocation_intent(&mut self, address: ShortAddress, slot_delta: u16) {
        self.intents.push(Intent::Allocate {
            address,
            slots: slot_delta,
        });

        let granted = slot_delta.min(self.grant_cap.unwrap_or(u16::MAX));
        *self.allocated.entry(address).or_default() += granted;
    }

    fn on_deallocation_intent(&mut self, address: ShortAddress, slot_delta: u16) {
        self.intents.push(Intent::Deallocate {
            address,
            slots: slot_delta,
        });

        let allocated = self.allocated.entry(address).or_default();
        *allocated = allocated.saturating_sub(slot_delta);
    }
}
