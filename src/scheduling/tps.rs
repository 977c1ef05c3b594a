//! Traffic proportional scheduling.
//!
//! Every link gets as many TX slots per multisuperframe as it queues messages per multisuperframe,
//! averaged over time. Allocation follows the load right away, deallocation only once the surplus
//! persisted long enough to push the scheduling error over a threshold. That keeps the slot count
//! from flapping when the load hovers around a slot boundary or when the negotiation layer can
//! only partially satisfy a request.

use heapless::FnvIndexMap;

use super::{GtsScheduling, LinkStatistics, NegotiationDriver, ReceiveStatistics};
use crate::{consts::NUM_GTS_SLOTS, ConfigError, ShortAddress};

/// The default amount of neighbors a [Tps] scheduler tracks
pub const DEFAULT_NEIGHBOR_CAPACITY: usize = 16;

/// Loads this little above a whole number of messages don't claim another slot
const LOAD_TOLERANCE: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct TpsConfig {
    /// The weight of a new sample in all moving averages, in the range (0, 1]
    pub alpha: f32,
    /// Links without registered messages for more than this many multisuperframes are forgotten
    pub staleness_window: u32,
    /// How negative the scheduling error must get before slots are given back
    pub deallocation_threshold: f32,
    pub min_slots: u16,
    pub max_slots: u16,
    /// Never size a link with queued messages down to zero slots
    pub guarantee_backlog: bool,
}

impl TpsConfig {
    /// The default configuration for a multisuperframe made up of `superframes_per_multisuperframe` superframes.
    ///
    /// A link can at most hold every GTS of every superframe.
    pub fn new(superframes_per_multisuperframe: u16) -> Self {
        Self {
            alpha: 0.1,
            staleness_window: 8,
            deallocation_threshold: 0.5,
            min_slots: 0,
            max_slots: NUM_GTS_SLOTS.saturating_mul(superframes_per_multisuperframe),
            guarantee_backlog: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConfigError::AlphaOutOfRange);
        }

        if !(self.deallocation_threshold > 0.0) {
            return Err(ConfigError::InvalidDeallocationThreshold);
        }

        if self.staleness_window == 0 {
            return Err(ConfigError::ZeroStalenessWindow);
        }

        if self.min_slots > self.max_slots {
            return Err(ConfigError::InvalidSlotRange {
                min: self.min_slots,
                max: self.max_slots,
            });
        }

        Ok(())
    }

    /// The amount of slots a link needs to carry `packets_per_multisuperframe` messages.
    ///
    /// Monotonic in the load and always within `min_slots..=max_slots`.
    /// No load (or a nonsensical one) gets `min_slots`.
    pub fn slots_for_load(&self, packets_per_multisuperframe: f32) -> u16 {
        #[allow(unused_imports)]
        use micromath::F32Ext;

        if !(packets_per_multisuperframe > 0.0) {
            return self.min_slots;
        }

        // Float to int casts saturate
        let slots = (packets_per_multisuperframe - LOAD_TOLERANCE).ceil() as u16;
        slots.max(self.min_slots).min(self.max_slots)
    }

    fn desired_slots(&self, data: &TpsTxData) -> u16 {
        let slots = self.slots_for_load(data.avg_in.unwrap_or(0.0));

        if self.guarantee_backlog && data.total_in_system > 0 {
            slots.max(1).min(self.max_slots)
        } else {
            slots
        }
    }
}

impl Default for TpsConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

#[derive(Debug, Clone)]
struct TpsTxData {
    /// None until the first multisuperframe was counted
    avg_in: Option<f32>,
    arrivals: u16,
    total_in_system: u16,
    /// None until the first message was registered
    ma_service_time_per_queue_length: Option<f32>,
    last_multisuperframe: u32,
    ma_error: f32,
}

impl TpsTxData {
    fn new(multisuperframe: u32) -> Self {
        Self {
            avg_in: None,
            arrivals: 0,
            total_in_system: 0,
            ma_service_time_per_queue_length: None,
            last_multisuperframe: multisuperframe,
            ma_error: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct TpsRxData {
    messages: u16,
    messages_last_multisuperframe: u16,
    last_multisuperframe: u32,
}

/// The traffic proportional GTS scheduler, tracking at most `N` neighbors per direction.
///
/// `N` must be a power of two.
pub struct Tps<const N: usize = DEFAULT_NEIGHBOR_CAPACITY> {
    config: TpsConfig,
    current_multisuperframe: u32,
    tx: FnvIndexMap<ShortAddress, TpsTxData, N>,
    rx: FnvIndexMap<ShortAddress, TpsRxData, N>,
}

impl<const N: usize> Tps<N> {
    pub fn new(config: TpsConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            config,
            current_multisuperframe: 0,
            tx: FnvIndexMap::new(),
            rx: FnvIndexMap::new(),
        })
    }

    pub fn config(&self) -> &TpsConfig {
        &self.config
    }

    /// The number of multisuperframe events seen so far
    pub fn current_multisuperframe(&self) -> u32 {
        self.current_multisuperframe
    }

    /// The number of neighbors with transmit statistics
    pub fn tracked_neighbors(&self) -> usize {
        self.tx.len()
    }

    /// The expected time in symbols a new message towards `address` waits in the link queue
    pub fn estimated_queueing_delay(&self, address: ShortAddress) -> Option<f32> {
        self.link_statistics(address)
            .map(|statistics| statistics.estimated_queueing_delay())
    }

    fn evict_stale(&mut self) {
        let current = self.current_multisuperframe;
        let window = self.config.staleness_window;
        let is_stale = |last: u32| current.wrapping_sub(last) > window;

        let mut stale = heapless::Vec::<ShortAddress, N>::new();

        stale.extend(
            self.tx
                .iter()
                .filter(|(_, data)| is_stale(data.last_multisuperframe))
                .map(|(address, _)| *address),
        );
        for address in stale.iter() {
            debug!("Forgetting stale TX link to {}", address);
            self.tx.remove(address);
        }

        stale.clear();
        stale.extend(
            self.rx
                .iter()
                .filter(|(_, data)| is_stale(data.last_multisuperframe))
                .map(|(address, _)| *address),
        );
        for address in stale.iter() {
            debug!("Forgetting stale RX link from {}", address);
            self.rx.remove(address);
        }
    }
}

/// Exponential moving average, the first sample is taken as is
fn moving_average(average: Option<f32>, sample: f32, alpha: f32) -> f32 {
    match average {
        Some(average) => alpha * sample + (1.0 - alpha) * average,
        None => sample,
    }
}

/// Look up the entry of `address`, creating it if there's room left
fn entry<'m, V, const N: usize>(
    map: &'m mut FnvIndexMap<ShortAddress, V, N>,
    address: ShortAddress,
    new: impl FnOnce() -> V,
) -> Option<&'m mut V> {
    if !map.contains_key(&address) && map.insert(address, new()).is_err() {
        warn!("Neighbor table full, not tracking {}", address);
        return None;
    }

    map.get_mut(&address)
}

impl<const N: usize> GtsScheduling for Tps<N> {
    fn register_outgoing_message(
        &mut self,
        address: ShortAddress,
        success: bool,
        service_time: u32,
        queue_at_creation: u8,
    ) {
        let current = self.current_multisuperframe;
        let alpha = self.config.alpha;

        let Some(data) = entry(&mut self.tx, address, || TpsTxData::new(current)) else {
            return;
        };

        data.arrivals = data.arrivals.saturating_add(1);

        // A failed message is still in the queue
        data.total_in_system = u16::from(if success {
            queue_at_creation.saturating_sub(1)
        } else {
            queue_at_creation
        });

        let per_queue_length = service_time as f32 / f32::from(queue_at_creation.max(1));
        data.ma_service_time_per_queue_length = Some(moving_average(
            data.ma_service_time_per_queue_length,
            per_queue_length,
            alpha,
        ));

        data.last_multisuperframe = current;
    }

    fn register_incoming_message(&mut self, address: ShortAddress) {
        let current = self.current_multisuperframe;

        let Some(data) = entry(&mut self.rx, address, || TpsRxData {
            messages: 0,
            messages_last_multisuperframe: 0,
            last_multisuperframe: current,
        }) else {
            return;
        };

        data.messages = data.messages.saturating_add(1);
        data.last_multisuperframe = current;
    }

    fn multisuperframe_event<D: NegotiationDriver>(&mut self, driver: &mut D) {
        self.current_multisuperframe = self.current_multisuperframe.wrapping_add(1);
        self.evict_stale();

        let Self { config, tx, rx, .. } = self;

        for (address, data) in tx.iter_mut() {
            let address = *address;

            data.avg_in = Some(moving_average(
                data.avg_in,
                f32::from(data.arrivals),
                config.alpha,
            ));
            data.arrivals = 0;

            let desired = config.desired_slots(data);
            let allocated = driver.allocated_slots(address);

            let error = f32::from(desired) - f32::from(allocated);
            data.ma_error = moving_average(Some(data.ma_error), error, config.alpha);

            trace!(
                "Link to {}: load {:?}, {} slots desired, {} allocated, error {}",
                address,
                data.avg_in,
                desired,
                allocated,
                data.ma_error
            );

            if desired > allocated {
                debug!("Requesting {} more slots towards {}", desired - allocated, address);
                driver.on_allocation_intent(address, desired - allocated);
            } else if desired < allocated && data.ma_error <= -config.deallocation_threshold {
                debug!("Releasing {} slots towards {}", allocated - desired, address);
                driver.on_deallocation_intent(address, allocated - desired);
                data.ma_error = 0.0;
            }
        }

        for (_, data) in rx.iter_mut() {
            data.messages_last_multisuperframe = data.messages;
            data.messages = 0;
        }
    }

    fn link_statistics(&self, address: ShortAddress) -> Option<LinkStatistics> {
        self.tx.get(&address).map(|data| LinkStatistics {
            average_arrivals: data.avg_in.unwrap_or(0.0),
            arrivals_this_multisuperframe: data.arrivals,
            service_time_per_queue_length: data.ma_service_time_per_queue_length.unwrap_or(0.0),
            queue_depth: data.total_in_system,
            scheduling_error: data.ma_error,
            last_multisuperframe: data.last_multisuperframe,
        })
    }

    fn receive_statistics(&self, address: ShortAddress) -> Option<ReceiveStatistics> {
        self.rx.get(&address).map(|data| ReceiveStatistics {
            messages_this_multisuperframe: data.messages,
            messages_last_multisuperframe: data.messages_last_multisuperframe,
            last_multisuperframe: data.last_multisuperframe,
        })
    }
}
