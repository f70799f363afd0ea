//! Congestion control selection.
//!
//! The same protocol name configures two very different things depending
//! on the [`StackMode`]: a [`TcpVariant`] handed to the simulated stacks,
//! or a `tcp_congestion_control` sysctl string submitted to the kernel
//! stacks. The kernel only validates that string when it boots.

use crate::{error::ConfigError, topology::Topology};
use ccsim_core::{
    SimError,
    network::Network,
    stack::{SYSCTL_CONGESTION_CONTROL, SYSCTL_ECN, StackError, StackMode},
    tcp::{CongestionAlgorithm, OperatingMode, TcpVariant},
};
use std::fmt;
use tracing::info;

/// The protocols the simulated stack knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    NewReno,
    Cubic,
    Bic,
    HighSpeed,
    Htcp,
    Hybla,
    Illinois,
    Ledbat,
    Lp,
    Scalable,
    Vegas,
    Veno,
    Westwood,
    /// Westwood with the bandwidth estimate sampled once per round trip.
    WestwoodPlus,
    Yeah,
}

impl Protocol {
    pub const ALL: [Self; 15] = [
        Self::NewReno,
        Self::Cubic,
        Self::Bic,
        Self::HighSpeed,
        Self::Htcp,
        Self::Hybla,
        Self::Illinois,
        Self::Ledbat,
        Self::Lp,
        Self::Scalable,
        Self::Vegas,
        Self::Veno,
        Self::Westwood,
        Self::WestwoodPlus,
        Self::Yeah,
    ];

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Self::NewReno => "newreno",
            Self::Cubic => "cubic",
            Self::Bic => "bic",
            Self::HighSpeed => "highspeed",
            Self::Htcp => "htcp",
            Self::Hybla => "hybla",
            Self::Illinois => "illinois",
            Self::Ledbat => "ledbat",
            Self::Lp => "lp",
            Self::Scalable => "scalable",
            Self::Vegas => "vegas",
            Self::Veno => "veno",
            Self::Westwood => "westwood",
            Self::WestwoodPlus => "westwood-plus",
            Self::Yeah => "yeah",
        }
    }

    /// Look a protocol up by name, ignoring case and an optional `Tcp`
    /// prefix.
    ///
    /// ```
    /// # use ccsim::congestion::Protocol;
    /// assert_eq!(Protocol::parse("TcpCubic"), Some(Protocol::Cubic));
    /// assert_eq!(Protocol::parse("westwood-plus"), Some(Protocol::WestwoodPlus));
    /// assert_eq!(Protocol::parse("bbr"), None);
    /// ```
    pub fn parse(name: &str) -> Option<Self> {
        let name = strip_prefixes(name);
        Self::ALL.into_iter().find(|protocol| {
            protocol.name() == name || protocol.name().replace('-', "") == name
        })
    }

    /// The variant the simulated stack runs for this protocol.
    pub fn variant(self) -> TcpVariant {
        let algorithm = match self {
            Self::NewReno => CongestionAlgorithm::NewReno,
            Self::Cubic => CongestionAlgorithm::Cubic,
            Self::Bic => CongestionAlgorithm::Bic,
            Self::HighSpeed => CongestionAlgorithm::HighSpeed,
            Self::Htcp => CongestionAlgorithm::Htcp,
            Self::Hybla => CongestionAlgorithm::Hybla,
            Self::Illinois => CongestionAlgorithm::Illinois,
            Self::Ledbat => CongestionAlgorithm::Ledbat,
            Self::Lp => CongestionAlgorithm::Lp,
            Self::Scalable => CongestionAlgorithm::Scalable,
            Self::Vegas => CongestionAlgorithm::Vegas,
            Self::Veno => CongestionAlgorithm::Veno,
            Self::Westwood | Self::WestwoodPlus => CongestionAlgorithm::Westwood,
            Self::Yeah => CongestionAlgorithm::Yeah,
        };
        let mode = match self {
            Self::WestwoodPlus => OperatingMode::WestwoodPlus,
            _ => OperatingMode::Standard,
        };
        TcpVariant::new(algorithm).with_mode(mode)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lowercase `name` and drop the `ns3::` and `tcp` prefixes:
/// `ns3::TcpHybla`, `TcpHybla` and `hybla` are the same protocol.
fn strip_prefixes(name: &str) -> String {
    let name = name.trim().to_ascii_lowercase();
    let name = name.strip_prefix("ns3::").unwrap_or(&name);
    name.strip_prefix("tcp").unwrap_or(name).to_owned()
}

/// A protocol name resolved for one stack mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CongestionControl {
    Simulated(Protocol),
    /// Value of the kernel's `tcp_congestion_control`, not validated yet.
    Kernel(String),
}

impl CongestionControl {
    /// Resolve `name` for `mode`.
    ///
    /// # Errors
    ///
    /// In [`StackMode::Simulated`] an unknown name is an error. Kernel
    /// names are only checked when the kernel boots.
    pub fn resolve(mode: StackMode, name: &str) -> Result<Self, ConfigError> {
        match mode {
            StackMode::Simulated => Protocol::parse(name)
                .map(Self::Simulated)
                .ok_or_else(|| ConfigError::UnknownProtocol(name.to_owned())),
            StackMode::Kernel => Ok(Self::Kernel(strip_prefixes(name))),
        }
    }

    /// The resolved name: the canonical protocol name, or the string
    /// submitted to the kernel.
    ///
    /// ```
    /// # use ccsim::congestion::CongestionControl;
    /// # use ccsim_core::stack::StackMode;
    /// let cc = CongestionControl::resolve(StackMode::Simulated, " TcpWestwoodPlus ").unwrap();
    /// assert_eq!(cc.name(), "westwood-plus");
    /// let cc = CongestionControl::resolve(StackMode::Kernel, "TcpBbr").unwrap();
    /// assert_eq!(cc.name(), "bbr");
    /// ```
    pub fn name(&self) -> &str {
        match self {
            Self::Simulated(protocol) => protocol.name(),
            Self::Kernel(name) => name,
        }
    }

    pub fn mode(&self) -> StackMode {
        match self {
            Self::Simulated(_) => StackMode::Simulated,
            Self::Kernel(_) => StackMode::Kernel,
        }
    }

    /// Configure both leaves of `topology`. The stacks must have been
    /// installed already and must all run in [`Self::mode`].
    pub fn apply(
        &self,
        network: &mut Network,
        topology: &Topology,
        ecn: bool,
    ) -> Result<(), SimError> {
        for node in [topology.sender, topology.receiver] {
            match self {
                Self::Simulated(protocol) => {
                    let stack = network.stack_mut(node)?;
                    let actual = stack.mode();
                    let stack = stack.as_simulated_mut().ok_or(StackError::WrongMode {
                        node,
                        expected: StackMode::Simulated,
                        actual,
                    })?;
                    stack.set_variant(protocol.variant());
                    stack.set_ecn(ecn);
                }
                Self::Kernel(name) => {
                    network.sysctl_set(node, SYSCTL_CONGESTION_CONTROL, name)?;
                    if ecn {
                        network.sysctl_set(node, SYSCTL_ECN, "1")?;
                    }
                }
            }
        }
        info!(congestion_control = %self, ecn, "congestion control configured");
        Ok(())
    }
}

impl fmt::Display for CongestionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
