use super::{QueueDisc, QueueDiscError, QueueDiscStats, QueueSize, QueueSizeUnit};
use crate::{defaults::DEFAULT_QUEUE_LIMIT, packet::Packet, time::SimTime};
use std::collections::VecDeque;

const BANDS: usize = 3;

/// Band of each socket priority, band 0 being served first.
const PRIO2BAND: [usize; 16] = [1, 2, 2, 2, 1, 2, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1];

/// Three band priority FIFO, capacity counted in packets.
///
/// Packets are sorted in a band from their priority and the bands are
/// served in strict order. The capacity is shared by the three bands; a
/// packet arriving on a full queue is refused (tail drop).
#[derive(Debug)]
pub struct PfifoFast {
    bands: [VecDeque<Packet>; BANDS],
    limit: u64,
    packets: u64,
    bytes: u64,
    stats: QueueDiscStats,
}

impl PfifoFast {
    pub const NAME: &'static str = "pfifo_fast";

    pub fn new(limit: QueueSize) -> Result<Self, QueueDiscError> {
        if limit.unit() != QueueSizeUnit::Packets {
            return Err(QueueDiscError::UnitMismatch {
                name: Self::NAME,
                expected: QueueSizeUnit::Packets,
                got: limit,
            });
        }
        if limit.value() == 0 {
            return Err(QueueDiscError::ZeroLimit { name: Self::NAME });
        }

        Ok(Self::with_limit(limit.value()))
    }

    fn with_limit(limit: u64) -> Self {
        Self {
            bands: Default::default(),
            limit,
            packets: 0,
            bytes: 0,
            stats: QueueDiscStats::default(),
        }
    }

    fn band(packet: &Packet) -> usize {
        PRIO2BAND[(packet.priority() & 0x0f) as usize]
    }
}

/// The discipline a stack puts on every interface it is installed on:
/// [`DEFAULT_QUEUE_LIMIT`] packets.
impl Default for PfifoFast {
    fn default() -> Self {
        Self::with_limit(DEFAULT_QUEUE_LIMIT)
    }
}

impl QueueDisc for PfifoFast {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn limit(&self) -> QueueSize {
        QueueSize::packets(self.limit)
    }

    fn enqueue(&mut self, packet: Packet, _now: SimTime) -> Result<(), Packet> {
        if self.packets >= self.limit {
            self.stats.record_drop_before_enqueue(packet.size());
            return Err(packet);
        }

        self.packets += 1;
        self.bytes += packet.size() as u64;
        self.stats
            .record_enqueue(packet.size(), self.packets, self.bytes);
        self.bands[Self::band(&packet)].push_back(packet);
        Ok(())
    }

    fn dequeue(&mut self, _now: SimTime) -> Option<Packet> {
        let packet = self.bands.iter_mut().find_map(|band| band.pop_front())?;
        self.packets -= 1;
        self.bytes -= packet.size() as u64;
        self.stats.record_sent(packet.size());
        Some(packet)
    }

    fn len_packets(&self) -> u64 {
        self.packets
    }

    fn len_bytes(&self) -> u64 {
        self.bytes
    }

    fn stats(&self) -> &QueueDiscStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::test_util::data_packet;

    #[test]
    fn rejects_byte_limits() {
        assert!(matches!(
            PfifoFast::new(QueueSize::bytes(1000)),
            Err(QueueDiscError::UnitMismatch { .. })
        ));
        assert!(matches!(
            PfifoFast::new(QueueSize::packets(0)),
            Err(QueueDiscError::ZeroLimit { .. })
        ));
    }

    #[test]
    fn tail_drop() {
        let mut queue = PfifoFast::new(QueueSize::packets(2)).unwrap();
        let now = SimTime::ZERO;

        queue.enqueue(data_packet(1, 360), now).unwrap();
        queue.enqueue(data_packet(2, 360), now).unwrap();
        let refused = queue.enqueue(data_packet(3, 360), now).unwrap_err();
        assert_eq!(refused.id().value(), 3);

        assert_eq!(queue.current_size(), QueueSize::packets(2));
        assert_eq!(queue.len_bytes(), 800);
        assert_eq!(queue.stats().dropped_before_enqueue, 1);
        assert_eq!(queue.stats().max_packets, 2);

        assert_eq!(queue.dequeue(now).unwrap().id().value(), 1);
        assert_eq!(queue.dequeue(now).unwrap().id().value(), 2);
        assert!(queue.dequeue(now).is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.stats().sent_packets, 2);
    }

    #[test]
    fn bands_are_served_in_order() {
        let mut queue = PfifoFast::new(QueueSize::packets(10)).unwrap();
        let now = SimTime::ZERO;

        // priority 1 goes to band 2, 0 to band 1, 6 to band 0
        queue.enqueue(data_packet(1, 10).with_priority(1), now).unwrap();
        queue.enqueue(data_packet(2, 10), now).unwrap();
        queue.enqueue(data_packet(3, 10).with_priority(6), now).unwrap();

        let order: Vec<u64> = std::iter::from_fn(|| queue.dequeue(now))
            .map(|p| p.id().value())
            .collect();
        assert_eq!(order, vec![3, 2, 1]);
    }
}
