//! Instrumentation driven by the clock: the bottleneck queue sampler and
//! the socket state poller.
//!
//! Both only read the network.

mod queue_sampler;
mod socket_poller;

pub use self::{
    queue_sampler::QueueSampler,
    socket_poller::{PollerHandle, SocketPoller},
};
use crate::error::ConfigError;
use ccsim_core::SimTime;
use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Write as _},
    path::{Path, PathBuf},
    str::FromStr,
};

/// One queue depth sample, in the unit of the sampled discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRecord {
    pub time: SimTime,
    pub depth: u64,
}

impl fmt::Display for SampleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.time, self.depth)
    }
}

/// Append only log of [`SampleRecord`]s, mirrored line by line into a
/// file.
///
/// The file is created with the first record: a run that never samples
/// leaves no file behind.
#[derive(Debug)]
pub struct SampleLog {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    records: Vec<SampleRecord>,
}

impl SampleLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            out: None,
            records: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn append(&mut self, record: SampleRecord) -> io::Result<()> {
        if self.out.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            self.out = Some(BufWriter::new(File::create(&self.path)?));
        }
        if let Some(out) = &mut self.out {
            writeln!(out, "{record}")?;
        }
        self.records.push(record);
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match &mut self.out {
            Some(out) => out.flush(),
            None => Ok(()),
        }
    }
}

/// Whether the socket state poller runs when there is no kernel to probe.
///
/// ```
/// # use ccsim::instrument::PollMode;
/// assert_eq!("uniform".parse::<PollMode>().unwrap(), PollMode::Uniform);
/// assert_eq!(PollMode::default().to_string(), "kernel-only");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PollMode {
    /// Probes are only scheduled on kernel stacks.
    #[default]
    KernelOnly,
    /// The same probe cadence in both modes; probes of a simulated stack
    /// do nothing.
    Uniform,
}

impl fmt::Display for PollMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KernelOnly => f.write_str("kernel-only"),
            Self::Uniform => f.write_str("uniform"),
        }
    }
}

impl FromStr for PollMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kernel-only" | "kernel_only" | "kernel" => Ok(Self::KernelOnly),
            "uniform" | "always" => Ok(Self::Uniform),
            _ => Err(ConfigError::UnknownPollMode(s.to_owned())),
        }
    }
}

#[cfg(test)]
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ccsim-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_is_created_on_first_record() {
        let dir = scratch_dir("sample-log");
        let path = dir.join("queueTraces").join("A.plotme");
        let mut log = SampleLog::new(&path);
        log.flush().unwrap();
        assert!(!path.exists());

        log.append(SampleRecord {
            time: SimTime::ZERO,
            depth: 0,
        })
        .unwrap();
        log.append(SampleRecord {
            time: SimTime::from_millis(100),
            depth: 12,
        })
        .unwrap();
        log.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0 0\n0.1 12\n");
        assert_eq!(log.records().len(), 2);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn poll_modes() {
        for name in ["kernel-only", "KERNEL_ONLY", "kernel"] {
            assert_eq!(name.parse::<PollMode>().unwrap(), PollMode::KernelOnly);
        }
        assert_eq!(
            "sometimes".parse::<PollMode>(),
            Err(ConfigError::UnknownPollMode("sometimes".to_owned()))
        );
    }
}
