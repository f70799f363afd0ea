//! The per-run output directory and the run record written into it.

use crate::{
    defaults::{CONFIG_FILE, RUN_DIR_FORMAT},
    error::RunError,
    queue::QueueDiscKind,
};
use ccsim_core::SimTime;
use chrono::{DateTime, Local};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};
use tracing::info;

/// `<base>/<dd-mm-YYYY-HH-MM-SS>/`, with its subdirectories created on
/// demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDir {
    root: PathBuf,
}

impl OutputDir {
    /// Create the directory of a run started at `now`.
    pub fn create(base: impl AsRef<Path>, now: DateTime<Local>) -> Result<Self, RunError> {
        let root = base
            .as_ref()
            .join(now.format(RUN_DIR_FORMAT).to_string());
        fs::create_dir_all(&root).map_err(RunError::output(&root))?;
        info!(dir = %root.display(), "output directory created");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `name` under the run directory. Nothing is created.
    pub fn path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.root.join(name)
    }

    /// Create the subdirectory `name` if needed.
    pub fn subdir(&self, name: &str) -> Result<PathBuf, RunError> {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir).map_err(RunError::output(&dir))?;
        Ok(dir)
    }
}

/// What a completed run was configured with.
///
/// ```
/// # use ccsim::{output::RunConfig, queue::QueueDiscKind};
/// # use ccsim_core::SimTime;
/// let config = RunConfig {
///     use_ecn: true,
///     queue_disc_type: QueueDiscKind::PfifoFast,
///     transport_prot: "cubic".to_owned(),
///     stop_time: SimTime::from_millis(20_100),
/// };
/// assert_eq!(
///     config.to_string(),
///     "useEcn 1\nqueue_disc_type pfifo_fast\ntransport_prot cubic\nstopTime 20.1\n"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub use_ecn: bool,
    pub queue_disc_type: QueueDiscKind,
    pub transport_prot: String,
    pub stop_time: SimTime,
}

impl RunConfig {
    /// Write the record to `config.txt` in `dir`.
    pub fn write(&self, dir: &OutputDir) -> Result<PathBuf, RunError> {
        let path = dir.path(CONFIG_FILE);
        fs::write(&path, self.to_string()).map_err(RunError::output(&path))?;
        Ok(path)
    }
}

impl fmt::Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "useEcn {}", u8::from(self.use_ecn))?;
        writeln!(f, "queue_disc_type {}", self.queue_disc_type)?;
        writeln!(f, "transport_prot {}", self.transport_prot)?;
        writeln!(f, "stopTime {}", self.stop_time)
    }
}
