use anyhow::{Context as _, Result};
use ccsim::{ConfigError, Experiment, ExperimentConfig, defaults::*, topology::LinkParams};
use ccsim_core::{DataRate, SimTime};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Compare TCP congestion controls over a single bottleneck.
#[derive(Debug, Parser)]
#[command(name = "ccsim", version, about)]
struct Args {
    /// Write pcap traces of both links.
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pcap: bool,

    /// Network stack of the sender and the receiver: `ns3` or `linux`.
    #[arg(long, default_value = DEFAULT_STACK)]
    stack: String,

    /// Congestion control, e.g. `cubic`, `TcpHybla` or `westwood-plus`.
    #[arg(long, default_value = DEFAULT_TRANSPORT_PROT)]
    transport_prot: String,

    /// Bottleneck bandwidth.
    #[arg(long, default_value = "2Mbps")]
    bandwidth: DataRate,

    /// Bottleneck delay.
    #[arg(long, default_value = "0.01ms")]
    delay: SimTime,

    /// Access link bandwidth.
    #[arg(long, default_value = "10Mbps")]
    access_bandwidth: DataRate,

    /// Access link delay.
    #[arg(long, default_value = "45ms")]
    access_delay: SimTime,

    /// Size of IP packets, in bytes.
    #[arg(long, default_value_t = DEFAULT_MTU)]
    mtu: u32,

    /// When the application starts, in seconds.
    #[arg(long, default_value_t = DEFAULT_START_TIME.as_secs_f64())]
    start_time: f64,

    /// Trace the congestion window of the sender.
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    tracing: bool,

    /// How long the application runs, in seconds.
    #[arg(long, default_value_t = DEFAULT_DURATION.as_secs_f64())]
    duration: f64,

    /// Bottleneck queue discipline: `pfifo_fast` or `codel`.
    #[arg(long, default_value = DEFAULT_QUEUE_DISC)]
    queue_disc_type: String,

    /// Directory the run directories are created in.
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Prefix of the capture and congestion window files.
    #[arg(long, default_value = DEFAULT_PREFIX)]
    prefix: String,

    /// Seconds between two queue depth samples.
    #[arg(long, default_value_t = DEFAULT_SAMPLE_INTERVAL.as_secs_f64())]
    sample_interval: f64,

    /// Seconds between two socket state probes.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs_f64())]
    poll_interval: f64,

    /// Probe sockets on kernel stacks only (`kernel-only`) or on both
    /// stacks (`uniform`).
    #[arg(long, default_value = "kernel-only")]
    poll_mode: String,

    /// Negotiate ECN, and let CoDel mark instead of drop.
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    ecn: bool,

    /// Fill the checksums of captured packets.
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    checksum: bool,

    /// Seed of the random number generator.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn seconds(name: &'static str, secs: f64) -> Result<SimTime, ConfigError> {
    SimTime::try_from_secs_f64(secs).map_err(|source| ConfigError::InvalidTime { name, source })
}

impl Args {
    fn into_config(self) -> Result<ExperimentConfig, ConfigError> {
        let start_time = seconds("start time", self.start_time)?;
        let duration = seconds("duration", self.duration)?;

        Ok(ExperimentConfig {
            stack: self.stack,
            transport_prot: self.transport_prot,
            queue_disc: self.queue_disc_type,
            access: LinkParams::new(self.access_bandwidth, self.access_delay),
            bottleneck: LinkParams::new(self.bandwidth, self.delay),
            mtu: self.mtu,
            start_time,
            stop_time: start_time + duration,
            ecn: self.ecn,
            pcap: self.pcap,
            checksum: self.checksum,
            tracing: self.tracing,
            sample_interval: seconds("sample interval", self.sample_interval)?,
            poll_interval: seconds("poll interval", self.poll_interval)?,
            poll_mode: self.poll_mode,
            output_dir: self.output_dir,
            prefix: self.prefix,
            seed: self.seed,
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Args::parse()
        .into_config()
        .context("Invalid command line")?;
    let experiment = Experiment::new(config).context("Invalid configuration")?;
    let report = experiment.run().context("Experiment failed")?;

    println!("{report}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory as _;

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_match_the_library() {
        let config = Args::parse_from(["ccsim"]).into_config().unwrap();
        assert_eq!(config, ExperimentConfig::default());
    }

    #[test]
    fn flags() {
        let config = Args::parse_from([
            "ccsim",
            "--stack",
            "ns3",
            "--transport-prot",
            "TcpVegas",
            "--bandwidth",
            "50Mbps",
            "--delay",
            "1ms",
            "--start-time",
            "1",
            "--duration",
            "2.5",
            "--pcap",
            "false",
            "--queue-disc-type",
            "codel",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.stack, "ns3");
        assert_eq!(config.bottleneck.data_rate, DataRate::from_mbps(50));
        assert_eq!(config.bottleneck.delay, SimTime::from_millis(1));
        assert_eq!(config.stop_time, SimTime::from_millis(3500));
        assert!(!config.pcap);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn negative_times_are_rejected() {
        let error = Args::parse_from(["ccsim", "--duration=-1"])
            .into_config()
            .unwrap_err();
        assert!(matches!(error, ConfigError::InvalidTime { name: "duration", .. }));
    }
}
