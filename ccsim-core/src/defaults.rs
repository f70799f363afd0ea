use crate::time::SimTime;
use std::ops::RangeInclusive;

/// Default capacity of the queue discipline a stack puts on every new
/// interface, in packets.
pub const DEFAULT_QUEUE_LIMIT: u64 = 1000;

/// Retransmission timeout used before any round trip has been measured.
///
/// ```
/// # use ccsim_core::defaults::*;
/// assert_eq!(INITIAL_RTO.to_string(), "1");
/// ```
pub const INITIAL_RTO: SimTime = SimTime::from_secs(1);

/// Lower bound of the retransmission timeout.
pub const MIN_RTO: SimTime = SimTime::from_millis(200);

/// Upper bound of the retransmission timeout, reached by exponential
/// backoff.
pub const MAX_RTO: SimTime = SimTime::from_secs(60);

/// Acceptable standing delay of a CoDel queue.
///
/// ```
/// # use ccsim_core::defaults::*;
/// assert_eq!(CODEL_TARGET.to_string(), "0.005");
/// ```
pub const CODEL_TARGET: SimTime = SimTime::from_millis(5);

/// Sliding window of a CoDel queue.
pub const CODEL_INTERVAL: SimTime = SimTime::from_millis(100);

/// Initial congestion window of the simulated stack, in segments.
pub const SIMULATED_INITIAL_CWND: u32 = 1;

/// Initial congestion window of the kernel stack, in segments.
pub const KERNEL_INITIAL_CWND: u32 = 10;

/// Prefix of the interface names (`sim0`, `sim1`, ...).
pub const INTERFACE_PREFIX: &str = "sim";

/// First ephemeral port of the simulated stack, handed out sequentially.
pub const SIMULATED_EPHEMERAL_PORT: u16 = 49153;

/// Ephemeral port range of the kernel stack, picked at random.
pub const KERNEL_EPHEMERAL_PORTS: RangeInclusive<u16> = 32768..=60999;

/// Congestion control the kernel stack uses until told otherwise.
pub const KERNEL_DEFAULT_CONGESTION_CONTROL: &str = "cubic";

/// Maximum transmission unit of every interface, in bytes.
pub const DEFAULT_MTU: u32 = 1500;
