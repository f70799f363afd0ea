use ccsim_core::{
    SimError, SimTime, TimeParseError,
    queue_disc::{QueueDiscError, QueueSize},
    stack::{StackMode, UnknownStackMode},
};
use std::{io, path::PathBuf};
use thiserror::Error;

/// A configuration that must not run.
///
/// All of these are detected before the topology is built.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{0}")]
    UnknownStackMode(#[from] UnknownStackMode),
    #[error("Unknown queue discipline `{0}', expected `pfifo_fast' or `codel'")]
    UnknownQueueDisc(String),
    #[error("Unknown transport protocol `{0}'")]
    UnknownProtocol(String),
    #[error("Poll mode `{0}' is neither `kernel-only' nor `uniform'")]
    UnknownPollMode(String),
    #[error("The traffic stops ({stop}s) before it starts ({start}s)")]
    StopBeforeStart { start: SimTime, stop: SimTime },
    #[error(
        "The traffic starts at {start}s but the {mode} stack is only configured at {deadline}s"
    )]
    StartBeforeStackReady {
        start: SimTime,
        mode: StackMode,
        deadline: SimTime,
    },
    #[error("An MTU of {0} bytes cannot carry a TCP segment")]
    InvalidMtu(u32),
    #[error("The {0} link has no bandwidth")]
    ZeroBandwidth(&'static str),
    #[error("The {0} interval must be positive")]
    ZeroInterval(&'static str),
    #[error("The bottleneck queue would hold nothing ({0})")]
    ZeroQueueCapacity(QueueSize),
    #[error("Invalid {name}: {source}")]
    InvalidTime {
        name: &'static str,
        #[source]
        source: TimeParseError,
    },
}

/// Why an experiment did not complete.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to build the experiment: {0}")]
    Setup(#[from] SimError),
    #[error("Failed to install the queue discipline: {0}")]
    QueueDisc(#[from] QueueDiscError),
    /// A fatal fault halted the clock.
    #[error("Simulation failed at {time}s: {source}")]
    Sim {
        time: SimTime,
        #[source]
        source: SimError,
    },
    #[error("Failed to write `{}': {source}", .path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RunError {
    pub(crate) fn output(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Output { path, source }
    }
}
