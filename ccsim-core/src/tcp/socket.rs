use super::{
    CongestionAlgorithm, SocketId, TcpInfo, TcpState, TcpVariant,
    estimator::{BandwidthEstimator, RttEstimator},
};
use crate::{
    node::NodeId,
    packet::{HEADER_BYTES, Segment},
    time::SimTime,
};
use std::{collections::BTreeMap, net::SocketAddrV4};
use tracing::{debug, trace};

/// What a socket asks the network to do after handling an event.
#[derive(Debug, Default)]
pub(crate) struct Output {
    pub(crate) segments: Vec<Segment>,
    /// Deadline and generation of the retransmission timer to arm.
    pub(crate) timer: Option<(SimTime, u64)>,
}

/// Parameters a stack hands to the sockets it opens.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SocketConfig {
    pub(crate) variant: TcpVariant,
    pub(crate) ecn: bool,
    pub(crate) mtu: u32,
    pub(crate) initial_cwnd: u32,
}

impl SocketConfig {
    fn mss(&self) -> u64 {
        self.mtu.saturating_sub(HEADER_BYTES).max(1) as u64
    }
}

#[derive(Debug)]
pub(crate) struct TcpSocket {
    id: SocketId,
    node: NodeId,
    local: SocketAddrV4,
    remote: SocketAddrV4,
    state: TcpState,
    config: SocketConfig,
    endpoint: Endpoint,
}

#[derive(Debug)]
enum Endpoint {
    Sender(Sender),
    Receiver(Receiver),
}

#[derive(Debug)]
struct Sender {
    mss: u64,
    beta_permille: u64,

    snd_una: u64,
    snd_nxt: u64,
    high_tx: u64,
    cwnd: u64,
    ssthresh: u64,
    dupacks: u32,
    recover: Option<u64>,
    ece_holdoff: SimTime,

    rtt: RttEstimator,
    bandwidth: Option<BandwidthEstimator>,

    syn_sent_at: SimTime,
    syn_retries: u32,
    timer_generation: u64,
    timer_armed: bool,

    segments_out: u64,
    retransmits: u64,
    cwnd_trace: Option<Vec<(SimTime, u64)>>,
}

#[derive(Debug, Default)]
struct Receiver {
    rcv_nxt: u64,
    out_of_order: BTreeMap<u64, u32>,
    segments_out: u64,
}

impl TcpSocket {
    /// Active open: the returned output carries the SYN.
    pub(crate) fn connect(
        id: SocketId,
        node: NodeId,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        config: SocketConfig,
        now: SimTime,
    ) -> (Self, Output) {
        let mut sender = Sender::new(&config, now);
        let mut out = Output::default();
        out.segments.push(Segment::Syn);
        sender.arm_timer(now, &mut out);

        let socket = Self {
            id,
            node,
            local,
            remote,
            state: TcpState::SynSent,
            config,
            endpoint: Endpoint::Sender(sender),
        };
        (socket, out)
    }

    /// Passive open on a listener: the returned output carries the SYN-ACK.
    pub(crate) fn accept(
        id: SocketId,
        node: NodeId,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        config: SocketConfig,
    ) -> (Self, Output) {
        let mut out = Output::default();
        out.segments.push(Segment::SynAck);

        let socket = Self {
            id,
            node,
            local,
            remote,
            state: TcpState::Established,
            config,
            endpoint: Endpoint::Receiver(Receiver {
                segments_out: 1,
                ..Receiver::default()
            }),
        };
        (socket, out)
    }

    #[inline]
    pub(crate) fn id(&self) -> SocketId {
        self.id
    }

    #[inline]
    pub(crate) fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub(crate) fn local(&self) -> SocketAddrV4 {
        self.local
    }

    #[inline]
    pub(crate) fn remote(&self) -> SocketAddrV4 {
        self.remote
    }

    #[inline]
    pub(crate) fn state(&self) -> TcpState {
        self.state
    }

    /// Whether the data segments of this socket are ECN capable.
    #[inline]
    pub(crate) fn ecn(&self) -> bool {
        self.config.ecn
    }

    /// In order bytes delivered to this socket.
    pub(crate) fn bytes_received(&self) -> u64 {
        match &self.endpoint {
            Endpoint::Receiver(receiver) => receiver.rcv_nxt,
            Endpoint::Sender(_) => 0,
        }
    }

    pub(crate) fn on_segment(
        &mut self,
        now: SimTime,
        segment: &Segment,
        ce: bool,
        sent_at: SimTime,
    ) -> Output {
        let mut out = Output::default();
        if self.state == TcpState::Closed {
            return out;
        }

        match (&mut self.endpoint, *segment) {
            (Endpoint::Sender(sender), Segment::SynAck) => {
                if self.state == TcpState::SynSent {
                    self.state = TcpState::Established;
                    if sender.syn_retries == 0 {
                        sender.rtt.sample(now.saturating_sub(sender.syn_sent_at));
                    }
                    debug!(socket = %self.id, %now, "established");
                    sender.disarm_timer();
                    sender.fill_window(now, &mut out);
                }
            }
            (Endpoint::Sender(sender), Segment::Ack { ack, ece, echo })
                if self.state == TcpState::Established =>
            {
                sender.on_ack(now, ack, ece, echo, &mut out);
            }
            (Endpoint::Receiver(receiver), Segment::Syn) => {
                // our SYN-ACK got lost, or the peer retried
                receiver.segments_out += 1;
                out.segments.push(Segment::SynAck);
            }
            (Endpoint::Receiver(receiver), Segment::Data { seq, len }) => {
                receiver.on_data(seq, len);
                receiver.segments_out += 1;
                out.segments.push(Segment::Ack {
                    ack: receiver.rcv_nxt,
                    ece: ce,
                    echo: sent_at,
                });
            }
            (_, segment) => {
                trace!(socket = %self.id, ?segment, "ignored segment");
            }
        }
        out
    }

    pub(crate) fn on_timer(&mut self, now: SimTime, generation: u64) -> Output {
        let mut out = Output::default();
        let Endpoint::Sender(sender) = &mut self.endpoint else {
            return out;
        };
        if self.state == TcpState::Closed
            || !sender.timer_armed
            || sender.timer_generation != generation
        {
            return out;
        }
        sender.timer_armed = false;
        sender.rtt.backoff();

        match self.state {
            TcpState::SynSent => {
                sender.syn_retries += 1;
                sender.syn_sent_at = now;
                debug!(socket = %self.id, %now, retries = sender.syn_retries, "SYN retransmission");
                out.segments.push(Segment::Syn);
                sender.arm_timer(now, &mut out);
            }
            TcpState::Established => sender.on_timeout(now, &mut out),
            TcpState::Closed => {}
        }
        out
    }

    /// Stop sending and receiving. Timers firing afterwards are ignored.
    pub(crate) fn close(&mut self) {
        self.state = TcpState::Closed;
        if let Endpoint::Sender(sender) = &mut self.endpoint {
            sender.disarm_timer();
        }
    }

    /// Record every congestion window change from now on.
    pub(crate) fn enable_cwnd_trace(&mut self, now: SimTime) {
        if let Endpoint::Sender(sender) = &mut self.endpoint
            && sender.cwnd_trace.is_none()
        {
            sender.cwnd_trace = Some(vec![(now, sender.cwnd)]);
        }
    }

    pub(crate) fn cwnd_trace(&self) -> Option<&[(SimTime, u64)]> {
        match &self.endpoint {
            Endpoint::Sender(sender) => sender.cwnd_trace.as_deref(),
            Endpoint::Receiver(_) => None,
        }
    }

    pub(crate) fn info(&self) -> TcpInfo {
        let mss = self.config.mss();
        let mut info = TcpInfo {
            id: self.id,
            local: self.local,
            remote: self.remote,
            state: self.state,
            variant: self.config.variant,
            ecn: self.config.ecn,
            mss: mss as u32,
            cwnd: 0,
            ssthresh: None,
            srtt: None,
            rttvar: SimTime::ZERO,
            rto: SimTime::ZERO,
            bytes_acked: 0,
            bytes_received: 0,
            segments_out: 0,
            retransmits: 0,
        };

        match &self.endpoint {
            Endpoint::Sender(sender) => {
                info.cwnd = sender.cwnd / mss;
                info.ssthresh = (sender.ssthresh != u64::MAX).then(|| sender.ssthresh / mss);
                info.srtt = sender.rtt.srtt();
                info.rttvar = sender.rtt.rttvar();
                info.rto = sender.rtt.rto();
                info.bytes_acked = sender.snd_una;
                info.segments_out = sender.segments_out;
                info.retransmits = sender.retransmits;
            }
            Endpoint::Receiver(receiver) => {
                info.bytes_received = receiver.rcv_nxt;
                info.segments_out = receiver.segments_out;
            }
        }
        info
    }
}

impl Sender {
    fn new(config: &SocketConfig, now: SimTime) -> Self {
        let mss = config.mss();
        let bandwidth = (config.variant.algorithm == CongestionAlgorithm::Westwood)
            .then(|| BandwidthEstimator::new(config.variant.mode));

        Self {
            mss,
            beta_permille: config.variant.algorithm.beta_permille(),
            snd_una: 0,
            snd_nxt: 0,
            high_tx: 0,
            cwnd: mss * config.initial_cwnd.max(1) as u64,
            ssthresh: u64::MAX,
            dupacks: 0,
            recover: None,
            ece_holdoff: SimTime::ZERO,
            rtt: RttEstimator::new(),
            bandwidth,
            syn_sent_at: now,
            syn_retries: 0,
            timer_generation: 0,
            timer_armed: false,
            segments_out: 1,
            retransmits: 0,
            cwnd_trace: None,
        }
    }

    fn flight(&self) -> u64 {
        self.snd_nxt - self.snd_una
    }

    fn arm_timer(&mut self, now: SimTime, out: &mut Output) {
        self.timer_generation += 1;
        self.timer_armed = true;
        out.timer = Some((now + self.rtt.rto(), self.timer_generation));
    }

    fn disarm_timer(&mut self) {
        self.timer_generation += 1;
        self.timer_armed = false;
    }

    fn set_cwnd(&mut self, now: SimTime, cwnd: u64) {
        let cwnd = cwnd.max(self.mss);
        if cwnd == self.cwnd {
            return;
        }
        self.cwnd = cwnd;
        if let Some(trace) = &mut self.cwnd_trace {
            trace.push((now, cwnd));
        }
    }

    fn send_data(&mut self, seq: u64, out: &mut Output) {
        if seq < self.high_tx {
            self.retransmits += 1;
        }
        self.high_tx = self.high_tx.max(seq + self.mss);
        self.segments_out += 1;
        out.segments.push(Segment::Data {
            seq,
            len: self.mss as u32,
        });
    }

    fn fill_window(&mut self, now: SimTime, out: &mut Output) {
        while self.flight() + self.mss <= self.cwnd {
            let seq = self.snd_nxt;
            self.snd_nxt += self.mss;
            self.send_data(seq, out);
        }
        if !self.timer_armed && self.flight() > 0 {
            self.arm_timer(now, out);
        }
    }

    /// Slow start threshold after a congestion signal.
    fn reduced_ssthresh(&self) -> u64 {
        let estimate = self
            .bandwidth
            .as_ref()
            .zip(self.rtt.min_rtt())
            .and_then(|(bandwidth, rtt)| bandwidth.window(rtt));
        let target = estimate.unwrap_or(self.flight().max(self.mss) * self.beta_permille / 1000);
        target.max(2 * self.mss)
    }

    fn on_ack(&mut self, now: SimTime, ack: u64, ece: bool, echo: SimTime, out: &mut Output) {
        if ack > self.snd_una {
            let acked = ack - self.snd_una;
            self.snd_una = ack;
            self.snd_nxt = self.snd_nxt.max(ack);
            if echo <= now {
                self.rtt.sample(now - echo);
            }
            let srtt = self.rtt.srtt();
            if let Some(bandwidth) = &mut self.bandwidth {
                bandwidth.on_ack(now, acked, srtt);
            }

            match self.recover {
                Some(recover) if ack < recover => {
                    // partial acknowledgement: the next hole is lost too
                    self.send_data(self.snd_una, out);
                    let deflated = self.cwnd.saturating_sub(acked) + self.mss;
                    self.set_cwnd(now, deflated);
                }
                Some(_) => {
                    self.recover = None;
                    self.dupacks = 0;
                    self.set_cwnd(now, self.ssthresh);
                }
                None => {
                    self.dupacks = 0;
                    let cwnd = if self.cwnd < self.ssthresh {
                        self.cwnd + acked.min(self.mss)
                    } else {
                        self.cwnd + (self.mss * self.mss / self.cwnd).max(1)
                    };
                    self.set_cwnd(now, cwnd);
                }
            }

            if ece {
                self.on_congestion_echo(now);
            }

            if self.flight() == 0 {
                self.disarm_timer();
            } else {
                self.arm_timer(now, out);
            }
            self.fill_window(now, out);
        } else if ack == self.snd_una && self.flight() > 0 {
            self.dupacks += 1;
            if self.recover.is_some() {
                let inflated = self.cwnd + self.mss;
                self.set_cwnd(now, inflated);
                self.fill_window(now, out);
            } else if self.dupacks == 3 {
                self.ssthresh = self.reduced_ssthresh();
                self.recover = Some(self.snd_nxt);
                debug!(%now, seq = self.snd_una, ssthresh = self.ssthresh, "fast retransmit");
                self.send_data(self.snd_una, out);
                self.set_cwnd(now, self.ssthresh + 3 * self.mss);
                self.ece_holdoff = now + self.rtt.srtt().unwrap_or(self.rtt.rto());
                self.fill_window(now, out);
            }
        }
    }

    /// React to an ECN echo, at most once per round trip and never while
    /// already recovering from a loss.
    fn on_congestion_echo(&mut self, now: SimTime) {
        if self.recover.is_some() || now < self.ece_holdoff {
            return;
        }
        self.ssthresh = self.reduced_ssthresh();
        self.set_cwnd(now, self.ssthresh);
        self.ece_holdoff = now + self.rtt.srtt().unwrap_or(self.rtt.rto());
        trace!(%now, cwnd = self.cwnd, "congestion echo");
    }

    fn on_timeout(&mut self, now: SimTime, out: &mut Output) {
        if self.flight() == 0 {
            return;
        }
        self.ssthresh = self.reduced_ssthresh();
        debug!(%now, seq = self.snd_una, ssthresh = self.ssthresh, "retransmission timeout");

        self.snd_nxt = self.snd_una;
        self.recover = None;
        self.dupacks = 0;
        self.set_cwnd(now, self.mss);
        self.fill_window(now, out);
    }
}

impl Receiver {
    fn on_data(&mut self, seq: u64, len: u32) {
        let end = seq + len as u64;
        if end <= self.rcv_nxt {
            return;
        }
        if seq > self.rcv_nxt {
            self.out_of_order.insert(seq, len);
            return;
        }

        self.rcv_nxt = end;
        while let Some((&seq, &len)) = self.out_of_order.first_key_value() {
            if seq > self.rcv_nxt {
                break;
            }
            self.out_of_order.pop_first();
            self.rcv_nxt = self.rcv_nxt.max(seq + len as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const MSS: u64 = 360;

    fn config(algorithm: CongestionAlgorithm) -> SocketConfig {
        SocketConfig {
            variant: TcpVariant::new(algorithm),
            ecn: true,
            mtu: 400,
            initial_cwnd: 1,
        }
    }

    fn addrs() -> (SocketAddrV4, SocketAddrV4) {
        (
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 49153),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 1, 2), 50000),
        )
    }

    fn established(algorithm: CongestionAlgorithm) -> TcpSocket {
        let (local, remote) = addrs();
        let (mut socket, out) = TcpSocket::connect(
            SocketId::new(0),
            NodeId::ZERO,
            local,
            remote,
            config(algorithm),
            SimTime::ZERO,
        );
        assert_eq!(out.segments, vec![Segment::Syn]);
        assert!(out.timer.is_some());

        let out = socket.on_segment(
            SimTime::from_millis(100),
            &Segment::SynAck,
            false,
            SimTime::ZERO,
        );
        assert_eq!(socket.state(), TcpState::Established);
        assert_eq!(out.segments, vec![Segment::Data { seq: 0, len: 360 }]);
        socket
    }

    fn ack(ack: u64, ece: bool) -> Segment {
        Segment::Ack {
            ack,
            ece,
            echo: SimTime::from_millis(100),
        }
    }

    #[test]
    fn slow_start() {
        let mut socket = established(CongestionAlgorithm::NewReno);
        let out = socket.on_segment(SimTime::from_millis(200), &ack(MSS, false), false, SimTime::ZERO);
        // window of two segments
        assert_eq!(out.segments.len(), 2);
        assert_eq!(socket.info().cwnd, 2);
        assert_eq!(socket.info().bytes_acked, MSS);
    }

    #[test]
    fn fast_retransmit_applies_beta() {
        let mut socket = established(CongestionAlgorithm::Cubic);
        let mut now = SimTime::from_millis(200);
        // grow the window to 8 segments
        let mut acked = 0;
        for _ in 0..7 {
            acked += MSS;
            socket.on_segment(now, &ack(acked, false), false, SimTime::ZERO);
            now += SimTime::from_millis(1);
        }
        let info = socket.info();
        assert_eq!(info.cwnd, 8);

        let out = (0..3)
            .map(|_| socket.on_segment(now, &ack(acked, false), false, SimTime::ZERO))
            .last()
            .unwrap();
        assert!(out.segments.contains(&Segment::Data {
            seq: acked,
            len: MSS as u32
        }));
        let info = socket.info();
        assert_eq!(info.retransmits, 1);
        // 8 segments in flight, reduced by 0.7
        assert_eq!(info.ssthresh, Some(8 * 7 / 10));
    }

    #[test]
    fn timeout_goes_back() {
        let (local, remote) = addrs();
        let (mut socket, out) = TcpSocket::connect(
            SocketId::new(0),
            NodeId::ZERO,
            local,
            remote,
            config(CongestionAlgorithm::NewReno),
            SimTime::ZERO,
        );
        let (deadline, generation) = out.timer.unwrap();
        assert_eq!(deadline, SimTime::from_secs(1));

        // SYN lost
        let out = socket.on_timer(deadline, generation);
        assert_eq!(out.segments, vec![Segment::Syn]);
        let (deadline, generation) = out.timer.unwrap();
        assert_eq!(deadline, SimTime::from_secs(3));

        let out = socket.on_segment(deadline, &Segment::SynAck, false, SimTime::ZERO);
        let (deadline, generation_data) = out.timer.unwrap();
        assert_ne!(generation, generation_data);

        // stale timer
        assert!(socket.on_timer(deadline, generation).segments.is_empty());

        let out = socket.on_timer(deadline, generation_data);
        assert_eq!(out.segments, vec![Segment::Data { seq: 0, len: 360 }]);
        assert_eq!(socket.info().retransmits, 1);
        assert_eq!(socket.info().cwnd, 1);
    }

    #[test]
    fn closed_socket_is_silent() {
        let mut socket = established(CongestionAlgorithm::NewReno);
        socket.close();
        let out = socket.on_segment(SimTime::from_millis(200), &ack(MSS, false), false, SimTime::ZERO);
        assert!(out.segments.is_empty());
        assert_eq!(socket.state(), TcpState::Closed);
    }

    #[test]
    fn congestion_echo_once_per_rtt() {
        let mut socket = established(CongestionAlgorithm::NewReno);
        let mut now = SimTime::from_millis(200);
        let mut acked = 0;
        for _ in 0..7 {
            acked += MSS;
            socket.on_segment(now, &ack(acked, false), false, SimTime::ZERO);
            now += SimTime::from_millis(1);
        }
        assert_eq!(socket.info().cwnd, 8);

        acked += MSS;
        socket.on_segment(now, &ack(acked, true), false, SimTime::ZERO);
        let reduced = socket.info().cwnd;
        assert!(reduced < 8);

        acked += MSS;
        socket.on_segment(now, &ack(acked, true), false, SimTime::ZERO);
        assert!(socket.info().cwnd >= reduced);
    }

    #[test]
    fn receiver_reassembles() {
        let (local, remote) = addrs();
        let (mut socket, out) = TcpSocket::accept(
            SocketId::new(1),
            NodeId::ZERO,
            remote,
            local,
            config(CongestionAlgorithm::NewReno),
        );
        assert_eq!(out.segments, vec![Segment::SynAck]);

        let data = |seq| Segment::Data { seq, len: 360 };
        let sent_at = SimTime::from_millis(3);
        let now = SimTime::from_millis(10);

        socket.on_segment(now, &data(0), false, sent_at);
        let out = socket.on_segment(now, &data(720), true, sent_at);
        assert_eq!(
            out.segments,
            vec![Segment::Ack {
                ack: 360,
                ece: true,
                echo: sent_at
            }]
        );

        let out = socket.on_segment(now, &data(360), false, sent_at);
        assert_eq!(
            out.segments,
            vec![Segment::Ack {
                ack: 1080,
                ece: false,
                echo: sent_at
            }]
        );
        assert_eq!(socket.bytes_received(), 1080);

        // duplicate
        socket.on_segment(now, &data(0), false, sent_at);
        assert_eq!(socket.bytes_received(), 1080);
    }

    #[test]
    fn cwnd_trace_records_changes() {
        let mut socket = established(CongestionAlgorithm::NewReno);
        socket.enable_cwnd_trace(SimTime::from_millis(100));
        socket.on_segment(SimTime::from_millis(200), &ack(MSS, false), false, SimTime::ZERO);
        assert_eq!(
            socket.cwnd_trace().unwrap(),
            &[
                (SimTime::from_millis(100), MSS),
                (SimTime::from_millis(200), 2 * MSS)
            ]
        );
    }
}
