//! Bottleneck queue sizing.
//!
//! The queue holds twice the bandwidth-delay product of the path, measured
//! at the slower of the two links:
//!
//! ```text
//! capacity = min(access_bw, bottleneck_bw) / 8 * 2 * (access_delay + bottleneck_delay)
//! ```
//!
//! Everything is computed on integers (bits per second times microseconds)
//! so the result does not depend on float rounding.

use crate::{queue::QueueDiscKind, topology::LinkParams};
use ccsim_core::queue_disc::{QueueSize, QueueSizeUnit};

const MICROS_PER_SEC: u128 = 1_000_000;

/// Queue capacity in bytes for the given access and bottleneck links.
///
/// ```
/// # use ccsim::{buffer::bottleneck_capacity_bytes, topology::LinkParams};
/// # use ccsim_core::{DataRate, SimTime};
/// let access = LinkParams::new(DataRate::from_mbps(10), SimTime::from_millis(45));
/// let bottleneck = LinkParams::new(DataRate::from_mbps(50), SimTime::from_millis(1));
/// assert_eq!(bottleneck_capacity_bytes(access, bottleneck), 115_000);
/// ```
pub fn bottleneck_capacity_bytes(access: LinkParams, bottleneck: LinkParams) -> u64 {
    let rate = access
        .data_rate
        .bits_per_sec()
        .min(bottleneck.data_rate.bits_per_sec()) as u128;
    let round_trip = 2 * (access.delay.as_micros() as u128 + bottleneck.delay.as_micros() as u128);

    let bytes = rate * round_trip / (8 * MICROS_PER_SEC);
    u64::try_from(bytes).unwrap_or(u64::MAX)
}

/// Number of `mtu` sized packets that fit in `bytes`.
#[inline]
pub fn capacity_packets(bytes: u64, mtu: u32) -> u64 {
    bytes / u64::from(mtu.max(1))
}

/// The capacity in the unit `kind` counts its queue in.
pub fn queue_size(kind: QueueDiscKind, bytes: u64, mtu: u32) -> QueueSize {
    match kind.unit() {
        QueueSizeUnit::Packets => QueueSize::packets(capacity_packets(bytes, mtu)),
        QueueSizeUnit::Bytes => QueueSize::bytes(bytes),
    }
}
