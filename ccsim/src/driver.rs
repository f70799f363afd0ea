//! The run driver: builds one experiment, runs the clock, and writes what
//! the run produced.

use crate::{
    config::{ExperimentConfig, Settings},
    defaults::{
        CWND_TRACE_DIR, PCAP_DIR, QUEUE_TRACE_DIR, QUEUE_TRACE_FILE, SINK_PORT, SS_TRACE_DIR,
    },
    error::{ConfigError, RunError},
    instrument::{QueueSampler, SampleLog, SocketPoller},
    output::{OutputDir, RunConfig},
    queue::install_queue_disc,
    stack::select_stacks,
    topology::Topology,
    traffic::{BulkSender, PacketSink, SenderHandle},
};
use ccsim_core::{
    SimError, SimTime,
    address::Ipv4AddressAllocator,
    clock::{Clock, RunSummary},
    network::Network,
    queue_disc::QueueDiscStats,
    stats::NetworkStats,
};
use chrono::Local;
use std::{
    cell::RefCell,
    fmt::{self, Write as _},
    fs,
    net::SocketAddrV4,
    path::{Path, PathBuf},
    rc::Rc,
};
use tracing::{info, warn};

/// A validated experiment, ready to [`run`](Experiment::run).
#[derive(Debug, Clone)]
pub struct Experiment {
    config: ExperimentConfig,
    settings: Settings,
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub output_dir: PathBuf,
    pub summary: RunSummary,
    /// Final counters of the bottleneck queue.
    pub queue_stats: Option<QueueDiscStats>,
    pub network: NetworkStats,
    /// Bytes the sink received in order.
    pub bytes_received: u64,
    pub samples: usize,
    /// Socket state probes that ran.
    pub probes: u64,
    pub captures: Vec<PathBuf>,
    pub cwnd_trace: Option<PathBuf>,
    pub config_file: PathBuf,
}

impl Experiment {
    pub fn new(config: ExperimentConfig) -> Result<Self, ConfigError> {
        let settings = config.validate()?;
        Ok(Self { config, settings })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Build the experiment, run it until the stop time and write the
    /// traces and the run record.
    ///
    /// # Errors
    ///
    /// A fault while the clock runs halts the run: the traces written so
    /// far are kept but no run record is written.
    pub fn run(self) -> Result<RunReport, RunError> {
        let Self { config, settings } = self;
        let output = OutputDir::create(&config.output_dir, Local::now())?;

        let mut network = Network::new();
        network.set_seed(config.seed);
        network.set_mtu(config.mtu);
        network.set_checksum(config.checksum);
        let mut clock = Clock::new();

        let topology = Topology::build(
            &mut network,
            &mut Ipv4AddressAllocator::default(),
            config.access,
            config.bottleneck,
        )?;
        let layout = select_stacks(&mut network, clock.scheduler(), &topology, settings.stack)?;
        let queue = install_queue_disc(
            &mut network,
            topology.bottleneck_egress(),
            settings.queue_disc,
            settings.queue_limit,
            config.ecn,
        )?;
        settings.congestion.apply(&mut network, &topology, config.ecn)?;

        let mut captures = Vec::new();
        if config.pcap {
            let dir = output.subdir(PCAP_DIR)?;
            for link in [topology.access, topology.bottleneck] {
                captures.extend(network.enable_pcap(link, &dir, &config.prefix)?);
            }
        }

        let sink = PacketSink {
            node: topology.receiver,
            factory: layout.factory,
            port: SINK_PORT,
            start: config.start_time,
            stop: config.stop_time,
        }
        .install(clock.scheduler())?;
        let sender = BulkSender {
            node: topology.sender,
            factory: layout.factory,
            remote: SocketAddrV4::new(topology.receiver_address(), SINK_PORT),
            start: config.start_time,
            stop: config.stop_time,
            trace_cwnd: config.tracing,
        }
        .install(clock.scheduler())?;

        let samples = Rc::new(RefCell::new(SampleLog::new(
            output.path(QUEUE_TRACE_DIR).join(QUEUE_TRACE_FILE),
        )));
        QueueSampler {
            interface: queue.interface,
            interval: config.sample_interval,
            log: Rc::clone(&samples),
        }
        .schedule(clock.scheduler());
        let poller = SocketPoller {
            node: topology.sender,
            stack: settings.stack,
            poll_mode: settings.poll_mode,
            start: config.start_time,
            stop: config.stop_time,
            step: config.poll_interval,
            dir: output.path(SS_TRACE_DIR),
        }
        .schedule(clock.scheduler());

        info!(
            stack = %settings.stack,
            congestion_control = %settings.congestion,
            queue_disc = %settings.queue_disc,
            limit = %settings.queue_limit,
            start = %config.start_time,
            stop = %config.stop_time,
            "experiment starting"
        );
        clock.stop_at(config.stop_time);
        let run = clock.run(&mut network);
        let time = clock.now();
        clock.halt();

        let samples_path = samples.borrow().path().to_owned();
        samples
            .borrow_mut()
            .flush()
            .map_err(RunError::output(samples_path))?;
        let summary = run.map_err(|source| RunError::Sim { time, source })?;

        let queue_stats = queue.stats(&network);
        if let Some(stats) = &queue_stats
            && stats.dropped_packets() > 0
        {
            warn!(dropped = stats.dropped_packets(), "bottleneck queue dropped packets");
        }
        if config.pcap {
            network
                .flush_captures()
                .map_err(RunError::output(output.path(PCAP_DIR)))?;
        }

        let cwnd_trace = if config.tracing {
            write_cwnd_trace(&network, &sender, &output, &config.prefix)?
        } else {
            None
        };

        let config_file = RunConfig {
            use_ecn: config.ecn,
            queue_disc_type: settings.queue_disc,
            transport_prot: settings.congestion.name().to_owned(),
            stop_time: config.stop_time,
        }
        .write(&output)?;

        let report = RunReport {
            output_dir: output.root().to_owned(),
            summary,
            queue_stats,
            network: network.stats(),
            bytes_received: sink.bytes_received(&network),
            samples: samples.borrow().records().len(),
            probes: poller.fired(),
            captures,
            cwnd_trace,
            config_file,
        };
        info!(
            bytes_received = report.bytes_received,
            events = report.summary.executed,
            dir = %report.output_dir.display(),
            "experiment done"
        );
        Ok(report)
    }
}

/// `<prefix>-cwnd.data`: one `<seconds> <cwnd bytes>` line per change.
fn write_cwnd_trace(
    network: &Network,
    sender: &SenderHandle,
    output: &OutputDir,
    prefix: &str,
) -> Result<Option<PathBuf>, RunError> {
    let Some(socket) = sender.socket() else {
        return Ok(None);
    };
    let Some(trace) = network.cwnd_trace(socket).map_err(SimError::from)? else {
        return Ok(None);
    };

    let mut data = String::new();
    for (time, cwnd) in trace {
        let _ = writeln!(data, "{time} {cwnd}");
    }
    let path = output
        .subdir(CWND_TRACE_DIR)?
        .join(format!("{prefix}-cwnd.data"));
    fs::write(&path, data).map_err(RunError::output(&path))?;
    Ok(Some(path))
}

impl RunReport {
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Time the clock stopped at.
    pub fn end_time(&self) -> SimTime {
        self.summary.end_time
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Output: {}", self.output_dir.display())?;
        writeln!(
            f,
            "Stopped at {}s after {} events",
            self.summary.end_time, self.summary.executed
        )?;
        writeln!(f, "Bytes received: {}", self.bytes_received)?;
        writeln!(f, "Queue samples: {}, socket probes: {}", self.samples, self.probes)?;
        if self.network.undeliverable > 0 {
            writeln!(f, "Undeliverable packets: {}", self.network.undeliverable)?;
        }
        match &self.queue_stats {
            Some(stats) => write!(f, "{stats}"),
            None => write!(f, "No queue discipline on the bottleneck"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::scratch_dir;
    use ccsim_core::stack::KernelError;

    fn short(name: &str, stack: &str, transport_prot: &str) -> ExperimentConfig {
        ExperimentConfig {
            stack: stack.to_owned(),
            transport_prot: transport_prot.to_owned(),
            start_time: SimTime::from_millis(100),
            stop_time: SimTime::from_millis(1100),
            output_dir: scratch_dir(name),
            ..Default::default()
        }
    }

    /// The only run directory under `base`.
    fn run_dir(base: &Path) -> PathBuf {
        let mut dirs: Vec<PathBuf> = fs::read_dir(base)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(dirs.len(), 1);
        dirs.remove(0)
    }

    #[test]
    fn simulated_run() {
        let config = short("driver-sim", "ns3", "cubic");
        let base = config.output_dir.clone();
        let report = Experiment::new(config).unwrap().run().unwrap();
        let dir = run_dir(&base);
        assert_eq!(report.output_dir(), dir);
        assert_eq!(report.end_time(), SimTime::from_millis(1100));
        assert!(report.bytes_received > 0);

        // one sample every 100ms from zero, none at the stop time
        let samples = fs::read_to_string(dir.join("queueTraces/A.plotme")).unwrap();
        let times: Vec<&str> = samples
            .lines()
            .map(|line| line.split(' ').next().unwrap())
            .collect();
        assert_eq!(
            times,
            ["0", "0.1", "0.2", "0.3", "0.4", "0.5", "0.6", "0.7", "0.8", "0.9", "1"]
        );
        assert_eq!(report.samples, 11);

        // no kernel to poll
        assert_eq!(report.probes, 0);
        assert!(!dir.join("ssTraces").exists());

        assert_eq!(report.captures.len(), 4);
        for capture in &report.captures {
            assert!(fs::metadata(capture).unwrap().len() > 24);
        }
        assert!(dir.join("pcap/TcpVariantsComparison-1-1.pcap").exists());
        assert!(report.cwnd_trace.as_ref().is_some_and(|path| path.exists()));

        assert_eq!(
            fs::read_to_string(&report.config_file).unwrap(),
            "useEcn 1\nqueue_disc_type pfifo_fast\ntransport_prot cubic\nstopTime 1.1\n"
        );
        fs::remove_dir_all(base).unwrap();
    }

    #[test]
    fn run_record_holds_resolved_names() {
        for (name, transport_prot, queue_disc) in [
            ("driver-record", "TcpCubic", "ns3::PfifoFastQueueDisc"),
            ("driver-record-spaced", " CUBIC ", "PFIFO_FAST"),
        ] {
            let config = ExperimentConfig {
                pcap: false,
                tracing: false,
                queue_disc: queue_disc.to_owned(),
                stop_time: SimTime::from_millis(300),
                ..short(name, "ns3", transport_prot)
            };
            let base = config.output_dir.clone();
            let report = Experiment::new(config).unwrap().run().unwrap();

            assert_eq!(
                fs::read_to_string(&report.config_file).unwrap(),
                "useEcn 1\nqueue_disc_type pfifo_fast\ntransport_prot cubic\nstopTime 0.3\n"
            );
            fs::remove_dir_all(base).unwrap();
        }
    }

    #[test]
    fn kernel_run_polls_the_sender() {
        let config = ExperimentConfig {
            pcap: false,
            tracing: false,
            ..short("driver-kernel", "linux", "Hybla")
        };
        let base = config.output_dir.clone();
        let report = Experiment::new(config).unwrap().run().unwrap();
        let dir = run_dir(&base);

        assert!(report.bytes_received > 0);
        assert_eq!(report.probes, 10);
        let trace = fs::read_to_string(dir.join("ssTraces/node-0.txt")).unwrap();
        assert_eq!(trace.lines().filter(|l| l.starts_with("# ")).count(), 10);
        assert!(trace.contains("hybla"));

        assert!(!dir.join("pcap").exists());
        assert!(!dir.join("cwndTraces").exists());
        assert!(report.captures.is_empty());
        fs::remove_dir_all(base).unwrap();
    }

    #[test]
    fn unsupported_kernel_protocol_halts_before_any_sample() {
        let config = short("driver-ledbat", "linux", "ledbat");
        let base = config.output_dir.clone();
        let error = Experiment::new(config).unwrap().run().unwrap_err();

        assert!(matches!(
            &error,
            RunError::Sim {
                time: SimTime::ZERO,
                source: SimError::Kernel(KernelError::UnsupportedCongestionControl(name)),
            } if name == "ledbat"
        ));
        let dir = run_dir(&base);
        assert!(!dir.join("queueTraces/A.plotme").exists());
        assert!(!dir.join("config.txt").exists());
        fs::remove_dir_all(base).unwrap();
    }

    #[test]
    fn unknown_queue_disc_builds_nothing() {
        let config = ExperimentConfig {
            queue_disc: "red".to_owned(),
            ..short("driver-red", "ns3", "cubic")
        };
        let base = config.output_dir.clone();
        assert_eq!(
            Experiment::new(config).unwrap_err(),
            ConfigError::UnknownQueueDisc("red".to_owned())
        );
        assert!(!base.exists());
    }

    #[test]
    fn stop_before_start_builds_nothing() {
        let config = ExperimentConfig {
            start_time: SimTime::from_secs(2),
            stop_time: SimTime::from_secs(1),
            ..short("driver-window", "ns3", "cubic")
        };
        let base = config.output_dir.clone();
        assert!(matches!(
            Experiment::new(config),
            Err(ConfigError::StopBeforeStart { .. })
        ));
        assert!(!base.exists());
    }

    #[test]
    fn small_bottleneck_queue_drops() {
        // 56 packets of queue for a window that keeps growing
        let config = ExperimentConfig {
            pcap: false,
            stop_time: SimTime::from_secs(5),
            ..short("driver-drops", "ns3", "newreno")
        };
        let base = config.output_dir.clone();
        let experiment = Experiment::new(config).unwrap();
        let limit = experiment.settings().queue_limit;
        let report = experiment.run().unwrap();

        let stats = report.queue_stats.unwrap();
        assert!(stats.dropped_packets() > 0);
        assert!(stats.max_packets <= limit.value());
        assert!(report.bytes_received > 0);
        fs::remove_dir_all(base).unwrap();
    }
}
