use super::PollMode;
use crate::defaults::SS_ARGS;
use ccsim_core::{SimTime, clock::Scheduler, network::Network, node::NodeId, stack::StackMode};
use std::{
    cell::Cell,
    fs::{self, OpenOptions},
    io::Write as _,
    path::PathBuf,
    rc::Rc,
};
use tracing::debug;

/// Probes the socket table of `node` with `ss` at every
/// `start + i * step` before `stop`.
///
/// Each probe appends its output to `<dir>/node-<id>.txt`, under a
/// `# <seconds>` header.
#[derive(Debug, Clone)]
pub struct SocketPoller {
    pub node: NodeId,
    pub stack: StackMode,
    pub poll_mode: PollMode,
    pub start: SimTime,
    pub stop: SimTime,
    pub step: SimTime,
    pub dir: PathBuf,
}

/// What an installed [`SocketPoller`] did.
#[derive(Debug, Clone, Default)]
pub struct PollerHandle {
    scheduled: usize,
    fired: Rc<Cell<u64>>,
}

impl PollerHandle {
    /// Number of probes registered on the scheduler.
    pub fn scheduled(&self) -> usize {
        self.scheduled
    }

    /// Number of probes that ran.
    pub fn fired(&self) -> u64 {
        self.fired.get()
    }
}

impl SocketPoller {
    /// Probe times, computed as exact multiples of `step` from `start`.
    pub fn probe_times(&self) -> impl Iterator<Item = SimTime> + '_ {
        let step = self.step.max(SimTime::from_micros(1));
        (0u64..)
            .map_while(move |i| step.checked_mul(i).and_then(|d| self.start.checked_add(d)))
            .take_while(move |at| *at < self.stop)
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(format!("node-{}.txt", self.node))
    }

    /// Register the probes. Under [`PollMode::KernelOnly`] nothing is
    /// registered for a simulated stack.
    pub fn schedule(self, scheduler: &mut Scheduler<Network>) -> PollerHandle {
        let mut handle = PollerHandle::default();
        let probe = match (self.stack, self.poll_mode) {
            (StackMode::Kernel, _) => true,
            (StackMode::Simulated, PollMode::Uniform) => false,
            (StackMode::Simulated, PollMode::KernelOnly) => {
                debug!(node = %self.node, "no kernel to poll");
                return handle;
            }
        };

        let times: Vec<SimTime> = self.probe_times().collect();
        let path = Rc::new(self.log_path());
        for at in times {
            let fired = Rc::clone(&handle.fired);
            let path = Rc::clone(&path);
            let (node, dir) = (self.node, self.dir.clone());

            scheduler.schedule(at, "ss-probe", move |scheduler, network| {
                fired.set(fired.get() + 1);
                if probe {
                    let process = network.launch(node, "ss", SS_ARGS)?;
                    fs::create_dir_all(&dir)?;
                    let mut out = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path.as_path())?;
                    writeln!(out, "# {}", scheduler.now())?;
                    out.write_all(process.stdout.as_bytes())?;
                }
                Ok(())
            });
            handle.scheduled += 1;
        }
        debug!(node = %self.node, probes = handle.scheduled, probe, "socket poller scheduled");
        handle
    }
}
