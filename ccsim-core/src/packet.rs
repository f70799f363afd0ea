use crate::time::SimTime;
use std::{fmt, net::SocketAddrV4};

/// Size of the IPv4 plus TCP headers carried by every packet.
pub const HEADER_BYTES: u32 = 40;

/// # [`Packet`] Identifier
///
/// During the lifetime of the simulation, this identifier can uniquely
/// identify the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(u64);

impl PacketId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// ECN codepoint of the IP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ecn {
    #[default]
    NotEct,
    /// ECN capable transport
    Ect,
    /// congestion experienced
    Ce,
}

impl Ecn {
    pub(crate) fn bits(self) -> u8 {
        match self {
            Ecn::NotEct => 0b00,
            Ecn::Ect => 0b10,
            Ecn::Ce => 0b11,
        }
    }
}

/// What a packet carries at the transport layer.
///
/// Sequence and acknowledgement numbers count bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    Syn,
    SynAck,
    Data {
        seq: u64,
        len: u32,
    },
    Ack {
        ack: u64,
        /// ECN echo
        ece: bool,
        /// send time of the segment being acknowledged
        echo: SimTime,
    },
}

/// A packet travelling through the simulated network.
#[derive(Debug, Clone)]
pub struct Packet {
    id: PacketId,
    src: SocketAddrV4,
    dst: SocketAddrV4,
    size: u32,
    priority: u8,
    ecn: Ecn,
    segment: Segment,
    sent_at: SimTime,
}

impl Packet {
    pub(crate) fn new(
        id: PacketId,
        src: SocketAddrV4,
        dst: SocketAddrV4,
        segment: Segment,
        sent_at: SimTime,
    ) -> Self {
        let size = match segment {
            Segment::Data { len, .. } => HEADER_BYTES + len,
            _ => HEADER_BYTES,
        };
        Self {
            id,
            src,
            dst,
            size,
            priority: 0,
            ecn: Ecn::NotEct,
            segment,
            sent_at,
        }
    }

    pub(crate) fn with_ecn(mut self, ecn: Ecn) -> Self {
        self.ecn = ecn;
        self
    }

    /// Set the socket priority (`0..=15`), used by priority queue
    /// disciplines to pick a band.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority & 0x0f;
        self
    }

    #[inline]
    pub fn id(&self) -> PacketId {
        self.id
    }

    #[inline]
    pub fn src(&self) -> SocketAddrV4 {
        self.src
    }

    #[inline]
    pub fn dst(&self) -> SocketAddrV4 {
        self.dst
    }

    /// Size on the wire, headers included.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    #[inline]
    pub fn ecn(&self) -> Ecn {
        self.ecn
    }

    #[inline]
    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    #[inline]
    pub fn sent_at(&self) -> SimTime {
        self.sent_at
    }

    /// Mark the packet as having experienced congestion.
    ///
    /// Returns `false` (and leaves the packet untouched) when the
    /// transport is not ECN capable.
    pub fn mark_ce(&mut self) -> bool {
        match self.ecn {
            Ecn::NotEct => false,
            Ecn::Ect | Ecn::Ce => {
                self.ecn = Ecn::Ce;
                true
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::{test_util::data_packet, *};

    #[test]
    fn sizes_include_headers() {
        assert_eq!(data_packet(1, 360).size(), 400);

        let ack = Packet::new(
            PacketId::new(2),
            data_packet(1, 360).dst(),
            data_packet(1, 360).src(),
            Segment::Ack {
                ack: 360,
                ece: false,
                echo: SimTime::ZERO,
            },
            SimTime::ZERO,
        );
        assert_eq!(ack.size(), HEADER_BYTES);
    }

    #[test]
    fn marking_needs_ect() {
        let mut packet = data_packet(1, 100);
        assert!(!packet.mark_ce());
        assert_eq!(packet.ecn(), Ecn::NotEct);

        let mut packet = data_packet(1, 100).with_ecn(Ecn::Ect);
        assert!(packet.mark_ce());
        assert_eq!(packet.ecn(), Ecn::Ce);
    }

    #[test]
    fn priority_is_four_bits() {
        assert_eq!(data_packet(1, 1).with_priority(0x16).priority(), 6);
    }
}
