use crate::{
    address::AddressError, network::RouteError, stack::KernelError, stack::StackError,
    tcp::SocketError,
};
use thiserror::Error;

/// Faults raised while the clock is running.
///
/// Any of these returned by an action halts the [`Clock`].
///
/// [`Clock`]: crate::clock::Clock
#[derive(Debug, Error)]
pub enum SimError {
    #[error("{0}")]
    Kernel(#[from] KernelError),
    #[error("{0}")]
    Stack(#[from] StackError),
    #[error("{0}")]
    Route(#[from] RouteError),
    #[error("{0}")]
    Socket(#[from] SocketError),
    #[error("{0}")]
    Address(#[from] AddressError),
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("Simulation halted: {0}")]
    Halted(String),
}
