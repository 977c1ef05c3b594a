//! Simulation doubles for the platform and the MAC layers around the DSME core
//!
//! Everything in here runs on the host. The clock only moves when the test moves it,
//! so timing scenarios are fully deterministic.

mod clock;
mod mac;
mod negotiator;

pub use clock::SimulatedClock;
pub use mac::{FiredEvent, RecordingMac};
pub use negotiator::{Intent, SimulatedNegotiator};
