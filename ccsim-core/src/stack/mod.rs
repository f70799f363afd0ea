//! Network stacks installed on the nodes.
//!
//! A node runs either the simulated [`InternetStack`] or a [`KernelStack`].
//! The choice is made once, when the stack is installed, and never changes
//! afterwards.

mod internet;
mod kernel;
mod route;

pub use self::{
    internet::InternetStack,
    kernel::{
        AVAILABLE_CONGESTION_CONTROL, IpCommand, KernelError, KernelStack,
        SYSCTL_AVAILABLE_CONGESTION_CONTROL, SYSCTL_CONGESTION_CONTROL, SYSCTL_DEFAULT_FORWARDING,
        SYSCTL_ECN, SYSCTL_IP_FORWARD, SsOptions,
    },
    route::{Route, RoutingTable},
};
pub(crate) use self::kernel::ss_report;
use crate::{
    defaults::{KERNEL_INITIAL_CWND, SIMULATED_INITIAL_CWND},
    node::NodeId,
    tcp::{SocketConfig, TcpVariant},
    time::SimTime,
};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown stack mode `{0}', expected `ns3' or `linux'")]
pub struct UnknownStackMode(pub String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("Node {0} already has a network stack")]
    AlreadyInstalled(NodeId),
    #[error("Node {0} has no network stack")]
    NotInstalled(NodeId),
    #[error("Node {node} runs a {actual} stack, not a {expected} one")]
    WrongMode {
        node: NodeId,
        expected: StackMode,
        actual: StackMode,
    },
    #[error("Socket factory {factory} cannot open sockets on node {node}, which runs a {mode} stack")]
    FactoryMismatch {
        node: NodeId,
        factory: SocketFactory,
        mode: StackMode,
    },
    #[error("The network stack of node {0} is not up yet")]
    NotReady(NodeId),
}

/// Which network stack the nodes run.
///
/// ```
/// # use ccsim_core::stack::StackMode;
/// assert_eq!("ns3".parse::<StackMode>().unwrap(), StackMode::Simulated);
/// assert_eq!("Linux".parse::<StackMode>().unwrap(), StackMode::Kernel);
/// assert!("dce".parse::<StackMode>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackMode {
    Simulated,
    Kernel,
}

impl StackMode {
    /// Time at which the stack configuration (routes, sysctls) is complete
    /// and applications may start.
    pub fn configuration_deadline(self) -> SimTime {
        match self {
            Self::Simulated => SimTime::ZERO,
            Self::Kernel => SimTime::from_millis(100),
        }
    }

    pub fn socket_factory(self) -> SocketFactory {
        match self {
            Self::Simulated => SocketFactory::Simulated,
            Self::Kernel => SocketFactory::Kernel,
        }
    }

    /// Name used on the command line and in run records.
    pub fn name(self) -> &'static str {
        match self {
            Self::Simulated => "ns3",
            Self::Kernel => "linux",
        }
    }
}

impl fmt::Display for StackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StackMode {
    type Err = UnknownStackMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ns3" | "sim" | "simulated" => Ok(Self::Simulated),
            "linux" | "kernel" => Ok(Self::Kernel),
            _ => Err(UnknownStackMode(s.to_owned())),
        }
    }
}

/// The kind of sockets an application opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketFactory {
    Simulated,
    Kernel,
}

impl SocketFactory {
    pub fn mode(self) -> StackMode {
        match self {
            Self::Simulated => StackMode::Simulated,
            Self::Kernel => StackMode::Kernel,
        }
    }
}

impl fmt::Display for SocketFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulated => f.write_str("TcpSocketFactory"),
            Self::Kernel => f.write_str("LinuxTcpSocketFactory"),
        }
    }
}

/// The network stack of a node.
#[derive(Debug, Clone)]
pub enum Stack {
    Simulated(InternetStack),
    Kernel(KernelStack),
}

impl Stack {
    pub fn mode(&self) -> StackMode {
        match self {
            Self::Simulated(_) => StackMode::Simulated,
            Self::Kernel(_) => StackMode::Kernel,
        }
    }

    pub fn routes(&self) -> &RoutingTable {
        match self {
            Self::Simulated(stack) => stack.routes(),
            Self::Kernel(stack) => stack.routes(),
        }
    }

    pub fn routes_mut(&mut self) -> &mut RoutingTable {
        match self {
            Self::Simulated(stack) => stack.routes_mut(),
            Self::Kernel(stack) => stack.routes_mut(),
        }
    }

    pub fn forwarding(&self) -> bool {
        match self {
            Self::Simulated(stack) => stack.forwarding(),
            Self::Kernel(stack) => stack.forwarding(),
        }
    }

    /// Whether the stack can open sockets and move packets.
    pub fn is_ready(&self) -> bool {
        match self {
            Self::Simulated(_) => true,
            Self::Kernel(stack) => stack.is_booted(),
        }
    }

    pub fn as_simulated(&self) -> Option<&InternetStack> {
        match self {
            Self::Simulated(stack) => Some(stack),
            Self::Kernel(_) => None,
        }
    }

    pub fn as_simulated_mut(&mut self) -> Option<&mut InternetStack> {
        match self {
            Self::Simulated(stack) => Some(stack),
            Self::Kernel(_) => None,
        }
    }

    pub fn as_kernel(&self) -> Option<&KernelStack> {
        match self {
            Self::Kernel(stack) => Some(stack),
            Self::Simulated(_) => None,
        }
    }

    pub fn as_kernel_mut(&mut self) -> Option<&mut KernelStack> {
        match self {
            Self::Kernel(stack) => Some(stack),
            Self::Simulated(_) => None,
        }
    }

    pub(crate) fn socket_config(&self, mtu: u32) -> SocketConfig {
        match self {
            Self::Simulated(stack) => SocketConfig {
                variant: stack.variant(),
                ecn: stack.ecn(),
                mtu,
                initial_cwnd: SIMULATED_INITIAL_CWND,
            },
            Self::Kernel(stack) => SocketConfig {
                variant: TcpVariant::new(stack.congestion_algorithm()),
                ecn: stack.ecn(),
                mtu,
                initial_cwnd: KERNEL_INITIAL_CWND,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes() {
        for name in ["ns3", "NS3", "sim", "simulated"] {
            assert_eq!(name.parse::<StackMode>().unwrap(), StackMode::Simulated);
        }
        for name in ["linux", "kernel", " Linux "] {
            assert_eq!(name.parse::<StackMode>().unwrap(), StackMode::Kernel);
        }
        assert_eq!(
            "dce".parse::<StackMode>(),
            Err(UnknownStackMode("dce".to_owned()))
        );
    }

    #[test]
    fn error_messages_name_the_node() {
        let error = StackError::WrongMode {
            node: NodeId::new(2),
            expected: StackMode::Simulated,
            actual: StackMode::Kernel,
        };
        assert_eq!(
            error.to_string(),
            "Node 2 runs a linux stack, not a ns3 one"
        );
        assert_eq!(
            StackError::AlreadyInstalled(NodeId::ZERO).to_string(),
            "Node 0 already has a network stack"
        );
    }

    #[test]
    fn deadlines() {
        assert_eq!(StackMode::Simulated.configuration_deadline(), SimTime::ZERO);
        assert_eq!(
            StackMode::Kernel.configuration_deadline(),
            SimTime::from_millis(100)
        );
    }

    #[test]
    fn factories_follow_modes() {
        for mode in [StackMode::Simulated, StackMode::Kernel] {
            assert_eq!(mode.socket_factory().mode(), mode);
        }
    }

    #[test]
    fn kernel_is_ready_once_booted() {
        let mut stack = Stack::Kernel(KernelStack::new());
        assert!(!stack.is_ready());
        stack.as_kernel_mut().unwrap().boot().unwrap();
        assert!(stack.is_ready());
        assert!(Stack::Simulated(InternetStack::new()).is_ready());
    }

    #[test]
    fn socket_config_per_mode() {
        let stack = Stack::Simulated(InternetStack::new());
        assert_eq!(stack.socket_config(400).initial_cwnd, SIMULATED_INITIAL_CWND);

        let stack = Stack::Kernel(KernelStack::new());
        let config = stack.socket_config(400);
        assert_eq!(config.initial_cwnd, KERNEL_INITIAL_CWND);
        assert_eq!(config.variant.algorithm, crate::tcp::CongestionAlgorithm::Cubic);
    }
}
