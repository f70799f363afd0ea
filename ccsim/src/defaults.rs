use ccsim_core::{DataRate, SimTime};

/// Default bottleneck link rate.
///
/// ```
/// # use ccsim::defaults::*;
/// assert_eq!(DEFAULT_BOTTLENECK_BANDWIDTH.to_string(), "2Mbps");
/// ```
pub const DEFAULT_BOTTLENECK_BANDWIDTH: DataRate = DataRate::from_mbps(2);

/// Default bottleneck propagation delay.
pub const DEFAULT_BOTTLENECK_DELAY: SimTime = SimTime::from_micros(10);

/// Default access link rate.
pub const DEFAULT_ACCESS_BANDWIDTH: DataRate = DataRate::from_mbps(10);

/// Default access propagation delay.
pub const DEFAULT_ACCESS_DELAY: SimTime = SimTime::from_millis(45);

/// Default maximum packet size, in bytes. Also the unit packet counted
/// queues are sized with.
pub const DEFAULT_MTU: u32 = 400;

/// Time the traffic starts at.
///
/// ```
/// # use ccsim::defaults::*;
/// assert_eq!(DEFAULT_START_TIME.to_string(), "10.1");
/// ```
pub const DEFAULT_START_TIME: SimTime = SimTime::from_millis(10_100);

/// How long the traffic runs for.
pub const DEFAULT_DURATION: SimTime = SimTime::from_secs(10);

pub const DEFAULT_STACK: &str = "linux";
pub const DEFAULT_TRANSPORT_PROT: &str = "cubic";
pub const DEFAULT_QUEUE_DISC: &str = "pfifo_fast";

/// Spacing of the queue occupancy samples.
pub const DEFAULT_SAMPLE_INTERVAL: SimTime = SimTime::from_millis(100);

/// Spacing of the socket state probes.
pub const DEFAULT_POLL_INTERVAL: SimTime = SimTime::from_millis(100);

/// Port the sink listens on.
pub const SINK_PORT: u16 = 50000;

pub const DEFAULT_OUTPUT_DIR: &str = "Plots";

/// Prefix of the capture and congestion window trace files.
pub const DEFAULT_PREFIX: &str = "TcpVariantsComparison";

/// `strftime` format of the per-run directory name.
pub const RUN_DIR_FORMAT: &str = "%d-%m-%Y-%H-%M-%S";

pub const PCAP_DIR: &str = "pcap";
pub const QUEUE_TRACE_DIR: &str = "queueTraces";
pub const QUEUE_TRACE_FILE: &str = "A.plotme";
pub const SS_TRACE_DIR: &str = "ssTraces";
pub const CWND_TRACE_DIR: &str = "cwndTraces";
pub const CONFIG_FILE: &str = "config.txt";

/// Arguments of the socket state probe.
pub const SS_ARGS: &str = "-a -e -i";
