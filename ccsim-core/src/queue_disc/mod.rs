//! Queue disciplines: the policies deciding how an interface's outbound
//! queue accepts, orders and drops packets.
//!
//! A [`QueueDisc`] is attached to an interface with
//! [`Network::attach_queue_disc`]. The network is the only writer: it
//! enqueues packets handed to the interface and dequeues them whenever the
//! transmitter is idle. Everybody else reads the live [`QueueDiscStats`]
//! and the current depth.
//!
//! [`Network::attach_queue_disc`]: crate::network::Network::attach_queue_disc

mod codel;
mod pfifo_fast;

pub use self::{
    codel::{CoDel, CoDelConfig},
    pfifo_fast::PfifoFast,
};
use crate::{packet::Packet, time::SimTime};
use std::fmt;
use thiserror::Error;

/// Unit a queue discipline counts its capacity in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueSizeUnit {
    Packets,
    Bytes,
}

/// A queue capacity, or a queue depth.
///
/// ```
/// # use ccsim_core::queue_disc::QueueSize;
/// assert_eq!(QueueSize::packets(568).to_string(), "568p");
/// assert_eq!(QueueSize::bytes(227_500).to_string(), "227500B");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueSize {
    unit: QueueSizeUnit,
    value: u64,
}

impl QueueSize {
    pub const fn packets(value: u64) -> Self {
        Self {
            unit: QueueSizeUnit::Packets,
            value,
        }
    }

    pub const fn bytes(value: u64) -> Self {
        Self {
            unit: QueueSizeUnit::Bytes,
            value,
        }
    }

    #[inline]
    pub fn unit(&self) -> QueueSizeUnit {
        self.unit
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }
}

impl fmt::Display for QueueSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            QueueSizeUnit::Packets => write!(f, "{}p", self.value),
            QueueSizeUnit::Bytes => write!(f, "{}B", self.value),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueDiscError {
    #[error("{name} counts its capacity in {expected:?}, got {got}")]
    UnitMismatch {
        name: &'static str,
        expected: QueueSizeUnit,
        got: QueueSize,
    },
    #[error("{name} needs a non zero capacity")]
    ZeroLimit { name: &'static str },
}

/// Live counters of a queue discipline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDiscStats {
    pub enqueued_packets: u64,
    pub enqueued_bytes: u64,
    pub sent_packets: u64,
    pub sent_bytes: u64,
    /// Packets refused because the queue was full.
    pub dropped_before_enqueue: u64,
    /// Packets accepted then dropped by the active queue management.
    pub dropped_after_dequeue: u64,
    pub dropped_bytes: u64,
    /// Packets marked with congestion experienced instead of dropped.
    pub marked_packets: u64,
    /// Largest backlog observed, in packets.
    pub max_packets: u64,
    /// Largest backlog observed, in bytes.
    pub max_bytes: u64,
}

impl QueueDiscStats {
    pub fn dropped_packets(&self) -> u64 {
        self.dropped_before_enqueue + self.dropped_after_dequeue
    }

    pub(crate) fn record_enqueue(&mut self, size: u32, backlog_packets: u64, backlog_bytes: u64) {
        self.enqueued_packets += 1;
        self.enqueued_bytes += size as u64;
        self.max_packets = self.max_packets.max(backlog_packets);
        self.max_bytes = self.max_bytes.max(backlog_bytes);
    }

    pub(crate) fn record_sent(&mut self, size: u32) {
        self.sent_packets += 1;
        self.sent_bytes += size as u64;
    }

    pub(crate) fn record_drop_before_enqueue(&mut self, size: u32) {
        self.dropped_before_enqueue += 1;
        self.dropped_bytes += size as u64;
    }

    pub(crate) fn record_drop_after_dequeue(&mut self, size: u32) {
        self.dropped_after_dequeue += 1;
        self.dropped_bytes += size as u64;
    }
}

impl fmt::Display for QueueDiscStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Packets/Bytes enqueued: {} / {}",
            self.enqueued_packets, self.enqueued_bytes
        )?;
        writeln!(
            f,
            "Packets/Bytes sent: {} / {}",
            self.sent_packets, self.sent_bytes
        )?;
        writeln!(
            f,
            "Packets/Bytes dropped: {} / {} (before enqueue: {}, after dequeue: {})",
            self.dropped_packets(),
            self.dropped_bytes,
            self.dropped_before_enqueue,
            self.dropped_after_dequeue
        )?;
        writeln!(f, "Packets marked: {}", self.marked_packets)?;
        write!(
            f,
            "Max backlog: {} packets / {} bytes",
            self.max_packets, self.max_bytes
        )
    }
}

/// A queuing policy attached to one interface.
pub trait QueueDisc: fmt::Debug {
    /// Policy name, as used on the command line and in run records.
    fn name(&self) -> &'static str;

    /// Maximum capacity, read once at construction.
    fn limit(&self) -> QueueSize;

    /// Offer a packet to the queue. A refused packet is handed back.
    fn enqueue(&mut self, packet: Packet, now: SimTime) -> Result<(), Packet>;

    /// Take the next packet to transmit, if any.
    fn dequeue(&mut self, now: SimTime) -> Option<Packet>;

    fn len_packets(&self) -> u64;

    fn len_bytes(&self) -> u64;

    fn stats(&self) -> &QueueDiscStats;

    fn is_empty(&self) -> bool {
        self.len_packets() == 0
    }

    /// Current backlog, in the unit the capacity is counted in.
    fn current_size(&self) -> QueueSize {
        match self.limit().unit() {
            QueueSizeUnit::Packets => QueueSize::packets(self.len_packets()),
            QueueSizeUnit::Bytes => QueueSize::bytes(self.len_bytes()),
        }
    }
}
