//! The queue discipline of the bottleneck egress interface.

use crate::error::{ConfigError, RunError};
use ccsim_core::{
    SimError,
    interface::InterfaceId,
    network::Network,
    queue_disc::{
        CoDel, CoDelConfig, PfifoFast, QueueDisc, QueueDiscStats, QueueSize, QueueSizeUnit,
    },
};
use std::{fmt, str::FromStr};
use tracing::info;

/// The queuing policies the bottleneck can run.
///
/// ```
/// # use ccsim::queue::QueueDiscKind;
/// assert_eq!("pfifo_fast".parse::<QueueDiscKind>().unwrap(), QueueDiscKind::PfifoFast);
/// assert_eq!("ns3::CoDelQueueDisc".parse::<QueueDiscKind>().unwrap(), QueueDiscKind::CoDel);
/// assert!("red".parse::<QueueDiscKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueDiscKind {
    /// Priority FIFO, counted in packets.
    PfifoFast,
    /// Controlled delay AQM, counted in bytes.
    CoDel,
}

impl QueueDiscKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::PfifoFast => PfifoFast::NAME,
            Self::CoDel => CoDel::NAME,
        }
    }

    pub fn unit(self) -> QueueSizeUnit {
        match self {
            Self::PfifoFast => QueueSizeUnit::Packets,
            Self::CoDel => QueueSizeUnit::Bytes,
        }
    }

    fn build(self, limit: QueueSize, mtu: u32, ecn: bool) -> Result<Box<dyn QueueDisc>, RunError> {
        Ok(match self {
            Self::PfifoFast => Box::new(PfifoFast::new(limit)?),
            Self::CoDel => {
                let config = CoDelConfig::new(limit)
                    .with_min_bytes(u64::from(mtu))
                    .with_ecn(ecn);
                Box::new(CoDel::new(config)?)
            }
        })
    }
}

impl fmt::Display for QueueDiscKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueueDiscKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let name = name.strip_prefix("ns3::").unwrap_or(&name);
        let name = name.strip_suffix("queuedisc").unwrap_or(name);

        match name {
            "pfifo_fast" | "pfifo-fast" | "pfifofast" | "fifo" => Ok(Self::PfifoFast),
            "codel" => Ok(Self::CoDel),
            _ => Err(ConfigError::UnknownQueueDisc(s.to_owned())),
        }
    }
}

/// Handle on the discipline [`install_queue_disc`] attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstalledQueueDisc {
    pub interface: InterfaceId,
    pub kind: QueueDiscKind,
    pub limit: QueueSize,
}

impl InstalledQueueDisc {
    fn get<'a>(&self, network: &'a Network) -> Option<&'a dyn QueueDisc> {
        network.queue_disc(self.interface)
    }

    /// Current depth, in the unit of the discipline.
    pub fn depth(&self, network: &Network) -> Option<u64> {
        self.get(network).map(|qd| qd.current_size().value())
    }

    pub fn stats(&self, network: &Network) -> Option<QueueDiscStats> {
        self.get(network).map(|qd| qd.stats().clone())
    }
}

/// Replace whatever discipline `interface` has with a `kind` one holding
/// `limit`.
///
/// # Errors
///
/// `limit` must be non zero and counted in the unit of `kind`.
pub fn install_queue_disc(
    network: &mut Network,
    interface: InterfaceId,
    kind: QueueDiscKind,
    limit: QueueSize,
    ecn: bool,
) -> Result<InstalledQueueDisc, RunError> {
    let queue_disc = kind.build(limit, network.mtu(), ecn)?;

    let previous = network
        .detach_queue_disc(interface)
        .map_err(SimError::from)?;
    network
        .attach_queue_disc(interface, queue_disc)
        .map_err(SimError::from)?;

    info!(
        iface = %interface,
        queue_disc = %kind,
        %limit,
        replaced = previous.as_ref().map(|qd| qd.name()),
        "bottleneck queue installed"
    );
    Ok(InstalledQueueDisc {
        interface,
        kind,
        limit,
    })
}
