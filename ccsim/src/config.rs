//! Experiment configuration and its validation.
//!
//! [`ExperimentConfig`] holds the choices as the user made them, names
//! included. [`ExperimentConfig::validate`] is the one place they are
//! checked and resolved; nothing is built before it succeeds.

use crate::{
    buffer::{bottleneck_capacity_bytes, queue_size},
    congestion::CongestionControl,
    defaults::*,
    error::ConfigError,
    instrument::PollMode,
    queue::QueueDiscKind,
    topology::LinkParams,
};
use ccsim_core::{SimTime, packet::HEADER_BYTES, queue_disc::QueueSize, stack::StackMode};
use std::path::PathBuf;

/// Largest MTU the simulated links carry.
const MAX_MTU: u32 = 65_535;

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
    /// `ns3` (simulated) or `linux` (kernel).
    pub stack: String,
    pub transport_prot: String,
    pub queue_disc: String,

    pub access: LinkParams,
    pub bottleneck: LinkParams,
    pub mtu: u32,

    /// The applications run in `[start_time, stop_time)`.
    pub start_time: SimTime,
    pub stop_time: SimTime,

    pub ecn: bool,
    pub pcap: bool,
    /// Fill the IPv4 and TCP checksums of captured packets.
    pub checksum: bool,
    /// Trace the congestion window of the sender.
    pub tracing: bool,

    pub sample_interval: SimTime,
    pub poll_interval: SimTime,
    pub poll_mode: String,

    pub output_dir: PathBuf,
    /// Prefix of the capture and congestion window trace files.
    pub prefix: String,
    pub seed: u64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            stack: DEFAULT_STACK.to_owned(),
            transport_prot: DEFAULT_TRANSPORT_PROT.to_owned(),
            queue_disc: DEFAULT_QUEUE_DISC.to_owned(),
            access: LinkParams::new(DEFAULT_ACCESS_BANDWIDTH, DEFAULT_ACCESS_DELAY),
            bottleneck: LinkParams::new(DEFAULT_BOTTLENECK_BANDWIDTH, DEFAULT_BOTTLENECK_DELAY),
            mtu: DEFAULT_MTU,
            start_time: DEFAULT_START_TIME,
            stop_time: DEFAULT_START_TIME + DEFAULT_DURATION,
            ecn: true,
            pcap: true,
            checksum: true,
            tracing: true,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_mode: PollMode::default().to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            prefix: DEFAULT_PREFIX.to_owned(),
            seed: 0,
        }
    }
}

/// The choices of an [`ExperimentConfig`], resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub stack: StackMode,
    pub congestion: CongestionControl,
    pub queue_disc: QueueDiscKind,
    /// Capacity of the bottleneck queue, in the unit of `queue_disc`.
    pub queue_limit: QueueSize,
    pub poll_mode: PollMode,
}

impl ExperimentConfig {
    /// Check every parameter and resolve the names.
    ///
    /// ```
    /// # use ccsim::config::ExperimentConfig;
    /// # use ccsim_core::queue_disc::QueueSize;
    /// let settings = ExperimentConfig::default().validate().unwrap();
    /// assert_eq!(settings.queue_limit, QueueSize::packets(56));
    /// ```
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let stack: StackMode = self.stack.parse()?;
        let queue_disc: QueueDiscKind = self.queue_disc.parse()?;
        let poll_mode: PollMode = self.poll_mode.parse()?;
        let congestion = CongestionControl::resolve(stack, &self.transport_prot)?;

        if self.stop_time < self.start_time {
            return Err(ConfigError::StopBeforeStart {
                start: self.start_time,
                stop: self.stop_time,
            });
        }
        let deadline = stack.configuration_deadline();
        if self.start_time < deadline {
            return Err(ConfigError::StartBeforeStackReady {
                start: self.start_time,
                mode: stack,
                deadline,
            });
        }

        if self.mtu <= HEADER_BYTES || self.mtu > MAX_MTU {
            return Err(ConfigError::InvalidMtu(self.mtu));
        }
        if self.access.data_rate.is_zero() {
            return Err(ConfigError::ZeroBandwidth("access"));
        }
        if self.bottleneck.data_rate.is_zero() {
            return Err(ConfigError::ZeroBandwidth("bottleneck"));
        }
        if self.sample_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("sample"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("poll"));
        }

        let bytes = bottleneck_capacity_bytes(self.access, self.bottleneck);
        let queue_limit = queue_size(queue_disc, bytes, self.mtu);
        if queue_limit.value() == 0 {
            return Err(ConfigError::ZeroQueueCapacity(queue_limit));
        }

        Ok(Settings {
            stack,
            congestion,
            queue_disc,
            queue_limit,
            poll_mode,
        })
    }
}
