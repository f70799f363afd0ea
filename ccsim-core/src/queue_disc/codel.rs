use super::{QueueDisc, QueueDiscError, QueueDiscStats, QueueSize, QueueSizeUnit};
use crate::{
    defaults::{CODEL_INTERVAL, CODEL_TARGET},
    packet::Packet,
    time::SimTime,
};
use std::collections::VecDeque;
use tracing::trace;

/// Parameters of a [`CoDel`] queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoDelConfig {
    /// Capacity, in bytes.
    pub limit: QueueSize,
    /// Acceptable standing queue delay.
    pub target: SimTime,
    /// Window over which the delay must stay above `target` before the
    /// queue starts dropping.
    pub interval: SimTime,
    /// Backlog (bytes) under which the queue never drops, usually one MTU.
    pub min_bytes: u64,
    /// Mark ECN capable packets instead of dropping them.
    pub use_ecn: bool,
}

impl CoDelConfig {
    pub fn new(limit: QueueSize) -> Self {
        Self {
            limit,
            target: CODEL_TARGET,
            interval: CODEL_INTERVAL,
            min_bytes: 1500,
            use_ecn: false,
        }
    }

    pub fn with_min_bytes(mut self, min_bytes: u64) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    pub fn with_ecn(mut self, use_ecn: bool) -> Self {
        self.use_ecn = use_ecn;
        self
    }
}

/// Controlled delay active queue management, capacity counted in bytes.
///
/// Every packet is timestamped on enqueue. Once the sojourn time of the
/// packets leaving the queue stays above `target` for a whole `interval`
/// the queue enters its dropping state, dropping (or marking) one packet
/// at intervals shrinking with the square root of the number of drops.
#[derive(Debug)]
pub struct CoDel {
    config: CoDelConfig,
    queue: VecDeque<(SimTime, Packet)>,
    bytes: u64,

    first_above_time: Option<SimTime>,
    drop_next: SimTime,
    count: u32,
    last_count: u32,
    dropping: bool,

    stats: QueueDiscStats,
}

impl CoDel {
    pub const NAME: &'static str = "codel";

    pub fn new(config: CoDelConfig) -> Result<Self, QueueDiscError> {
        if config.limit.unit() != QueueSizeUnit::Bytes {
            return Err(QueueDiscError::UnitMismatch {
                name: Self::NAME,
                expected: QueueSizeUnit::Bytes,
                got: config.limit,
            });
        }
        if config.limit.value() == 0 {
            return Err(QueueDiscError::ZeroLimit { name: Self::NAME });
        }

        Ok(Self {
            config,
            queue: VecDeque::new(),
            bytes: 0,
            first_above_time: None,
            drop_next: SimTime::ZERO,
            count: 0,
            last_count: 0,
            dropping: false,
            stats: QueueDiscStats::default(),
        })
    }

    pub fn config(&self) -> &CoDelConfig {
        &self.config
    }

    /// Whether the queue is currently in its dropping state.
    pub fn is_dropping(&self) -> bool {
        self.dropping
    }

    fn control_law(&self, t: SimTime) -> SimTime {
        let count = self.count.max(1) as f64;
        let step = self.config.interval.as_micros() as f64 / count.sqrt();
        t + SimTime::from_micros(step as u64)
    }

    /// Pop the head and tell whether the queue has been above target for
    /// long enough to drop it.
    fn dequeue_head(&mut self, now: SimTime) -> (Option<Packet>, bool) {
        let Some((enqueued_at, packet)) = self.queue.pop_front() else {
            self.first_above_time = None;
            return (None, false);
        };
        self.bytes -= packet.size() as u64;

        let sojourn = now.saturating_sub(enqueued_at);
        let mut ok_to_drop = false;
        if sojourn < self.config.target || self.bytes <= self.config.min_bytes {
            self.first_above_time = None;
        } else {
            match self.first_above_time {
                None => self.first_above_time = Some(now + self.config.interval),
                Some(first_above) if now >= first_above => ok_to_drop = true,
                Some(_) => {}
            }
        }

        (Some(packet), ok_to_drop)
    }

    /// Drop `packet`, or hand it back marked if ECN allows.
    fn drop_or_mark(&mut self, mut packet: Packet) -> Option<Packet> {
        if self.config.use_ecn && packet.mark_ce() {
            self.stats.marked_packets += 1;
            trace!(packet = %packet.id(), "codel mark");
            Some(packet)
        } else {
            self.stats.record_drop_after_dequeue(packet.size());
            trace!(packet = %packet.id(), "codel drop");
            None
        }
    }
}

impl QueueDisc for CoDel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn limit(&self) -> QueueSize {
        self.config.limit
    }

    fn enqueue(&mut self, packet: Packet, now: SimTime) -> Result<(), Packet> {
        if self.bytes + packet.size() as u64 > self.config.limit.value() {
            self.stats.record_drop_before_enqueue(packet.size());
            return Err(packet);
        }

        self.bytes += packet.size() as u64;
        self.stats
            .record_enqueue(packet.size(), self.queue.len() as u64 + 1, self.bytes);
        self.queue.push_back((now, packet));
        Ok(())
    }

    fn dequeue(&mut self, now: SimTime) -> Option<Packet> {
        let (mut next, ok_to_drop) = self.dequeue_head(now);
        if next.is_none() {
            self.dropping = false;
            return None;
        }

        if self.dropping {
            if !ok_to_drop {
                self.dropping = false;
            }
            while self.dropping && now >= self.drop_next {
                let Some(packet) = next.take() else {
                    break;
                };
                self.count += 1;
                if let Some(marked) = self.drop_or_mark(packet) {
                    self.drop_next = self.control_law(self.drop_next);
                    next = Some(marked);
                    break;
                }

                let (head, ok_to_drop) = self.dequeue_head(now);
                next = head;
                if ok_to_drop {
                    self.drop_next = self.control_law(self.drop_next);
                } else {
                    self.dropping = false;
                }
            }
        } else if ok_to_drop && let Some(packet) = next.take() {
            next = match self.drop_or_mark(packet) {
                Some(marked) => Some(marked),
                None => self.dequeue_head(now).0,
            };
            self.dropping = true;

            // start from the previous drop rate if the last dropping state
            // ended recently
            let delta = self.count.saturating_sub(self.last_count);
            self.count = if delta > 1
                && now.saturating_sub(self.drop_next) < self.config.interval * 16
            {
                delta
            } else {
                1
            };
            self.drop_next = self.control_law(now);
            self.last_count = self.count;
        }

        if let Some(packet) = &next {
            self.stats.record_sent(packet.size());
        }
        next
    }

    fn len_packets(&self) -> u64 {
        self.queue.len() as u64
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
    use crate::packet::{Ecn, test_util::data_packet};

    fn codel(limit: u64) -> CoDel {
        CoDel::new(CoDelConfig::new(QueueSize::bytes(limit)).with_min_bytes(400)).unwrap()
    }

    #[test]
    fn rejects_packet_limits() {
        assert!(CoDel::new(CoDelConfig::new(QueueSize::packets(10))).is_err());
        assert!(CoDel::new(CoDelConfig::new(QueueSize::bytes(0))).is_err());
    }

    #[test]
    fn byte_limit() {
        let mut queue = codel(1000);
        queue.enqueue(data_packet(1, 360), SimTime::ZERO).unwrap();
        queue.enqueue(data_packet(2, 360), SimTime::ZERO).unwrap();
        assert!(queue.enqueue(data_packet(3, 360), SimTime::ZERO).is_err());
        assert_eq!(queue.current_size(), QueueSize::bytes(800));
        assert_eq!(queue.stats().dropped_before_enqueue, 1);
    }

    #[test]
    fn short_sojourn_never_drops() {
        let mut queue = codel(100_000);
        for i in 0..10 {
            queue.enqueue(data_packet(i, 360), SimTime::ZERO).unwrap();
        }
        let now = SimTime::from_millis(1);
        let mut sent = 0;
        while queue.dequeue(now).is_some() {
            sent += 1;
        }
        assert_eq!(sent, 10);
        assert_eq!(queue.stats().dropped_after_dequeue, 0);
        assert!(!queue.is_dropping());
    }

    fn standing_queue(queue: &mut CoDel, ecn: bool) {
        // a standing queue of 50 packets, each waiting 20ms, served once
        // every 10ms for a second
        let mut id = 0;
        for _ in 0..50 {
            let packet = data_packet(id, 360);
            let packet = if ecn { packet.with_ecn(Ecn::Ect) } else { packet };
            queue.enqueue(packet, SimTime::ZERO).unwrap();
            id += 1;
        }
        for step in 1..=100u64 {
            let now = SimTime::from_millis(10 * step);
            queue.dequeue(now);
            let packet = data_packet(id, 360);
            let packet = if ecn { packet.with_ecn(Ecn::Ect) } else { packet };
            let _ = queue.enqueue(packet, now.saturating_sub(SimTime::from_millis(20)));
            id += 1;
        }
    }

    #[test]
    fn standing_queue_is_dropped() {
        let mut queue = codel(1_000_000);
        standing_queue(&mut queue, false);
        assert!(queue.stats().dropped_after_dequeue > 0);
        assert_eq!(queue.stats().marked_packets, 0);
    }

    #[test]
    fn standing_queue_is_marked_with_ecn() {
        let mut queue = CoDel::new(
            CoDelConfig::new(QueueSize::bytes(1_000_000))
                .with_min_bytes(400)
                .with_ecn(true),
        )
        .unwrap();
        standing_queue(&mut queue, true);
        assert!(queue.stats().marked_packets > 0);
        assert_eq!(queue.stats().dropped_after_dequeue, 0);
    }
}
