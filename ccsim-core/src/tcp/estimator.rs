use super::OperatingMode;
use crate::{
    defaults::{INITIAL_RTO, MAX_RTO, MIN_RTO},
    time::SimTime,
};

/// Smoothed round trip time and retransmission timeout, as in RFC 6298.
#[derive(Debug, Clone)]
pub(super) struct RttEstimator {
    srtt: Option<u64>,
    rttvar: u64,
    min_rtt: Option<u64>,
    rto: SimTime,
}

impl RttEstimator {
    pub(super) fn new() -> Self {
        Self {
            srtt: None,
            rttvar: 0,
            min_rtt: None,
            rto: INITIAL_RTO,
        }
    }

    pub(super) fn sample(&mut self, rtt: SimTime) {
        let r = rtt.as_micros();
        match self.srtt {
            None => {
                self.srtt = Some(r);
                self.rttvar = r / 2;
            }
            Some(srtt) => {
                self.rttvar = (3 * self.rttvar + srtt.abs_diff(r)) / 4;
                self.srtt = Some((7 * srtt + r) / 8);
            }
        }
        self.min_rtt = Some(self.min_rtt.map_or(r, |min| min.min(r)));

        let srtt = self.srtt.unwrap_or(r);
        let rto = SimTime::from_micros(srtt.saturating_add(4 * self.rttvar));
        self.rto = rto.max(MIN_RTO).min(MAX_RTO);
    }

    pub(super) fn backoff(&mut self) {
        self.rto = (self.rto * 2).min(MAX_RTO);
    }

    pub(super) fn rto(&self) -> SimTime {
        self.rto
    }

    pub(super) fn srtt(&self) -> Option<SimTime> {
        self.srtt.map(SimTime::from_micros)
    }

    pub(super) fn rttvar(&self) -> SimTime {
        SimTime::from_micros(self.rttvar)
    }

    pub(super) fn min_rtt(&self) -> Option<SimTime> {
        self.min_rtt.map(SimTime::from_micros)
    }
}

/// Westwood's estimate of the bandwidth available to the flow.
///
/// In [`OperatingMode::Standard`] every acknowledgement produces a sample;
/// in [`OperatingMode::WestwoodPlus`] the acknowledged bytes are
/// accumulated and sampled once per round trip.
#[derive(Debug, Clone)]
pub(super) struct BandwidthEstimator {
    mode: OperatingMode,
    /// bytes per second
    estimate: Option<u64>,
    acked: u64,
    since: Option<SimTime>,
}

impl BandwidthEstimator {
    pub(super) fn new(mode: OperatingMode) -> Self {
        Self {
            mode,
            estimate: None,
            acked: 0,
            since: None,
        }
    }

    pub(super) fn on_ack(&mut self, now: SimTime, acked: u64, srtt: Option<SimTime>) {
        let Some(since) = self.since else {
            self.since = Some(now);
            return;
        };
        self.acked += acked;

        let elapsed = now.saturating_sub(since);
        let window = match self.mode {
            OperatingMode::Standard => SimTime::from_micros(1),
            OperatingMode::WestwoodPlus => srtt.unwrap_or(SimTime::from_micros(1)),
        };
        if elapsed.is_zero() || elapsed < window {
            return;
        }

        let sample = self.acked.saturating_mul(1_000_000) / elapsed.as_micros();
        self.estimate = Some(match self.estimate {
            None => sample,
            // low pass filter, 7/8 of history
            Some(estimate) => (7 * estimate + sample) / 8,
        });
        self.acked = 0;
        self.since = Some(now);
    }

    /// Bytes the path can hold over `rtt` at the estimated rate.
    pub(super) fn window(&self, rtt: SimTime) -> Option<u64> {
        let estimate = self.estimate?;
        Some((estimate as u128 * rtt.as_micros() as u128 / 1_000_000) as u64)
    }
}
