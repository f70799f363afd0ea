//! Deterministic discrete-event substrate for congestion control
//! experiments.
//!
//! A [`Network`] of nodes joined by point-to-point links is driven by a
//! [`Clock`] in virtual time. Nodes run either the simulated
//! [`InternetStack`] or a [`KernelStack`]; TCP sockets opened on them push
//! packets through the queue discipline of each egress interface, which is
//! where the congestion of a bottleneck shows.
//!
//! Everything runs on one thread and the only source of randomness is the
//! seeded generator of the [`Network`]: two runs of the same configuration
//! produce the same packets at the same instants.
//!
//! [`Network`]: network::Network
//! [`Clock`]: clock::Clock
//! [`InternetStack`]: stack::InternetStack
//! [`KernelStack`]: stack::KernelStack

pub mod address;
pub mod clock;
mod data_rate;
pub mod defaults;
mod error;
pub mod interface;
pub mod link;
pub mod network;
pub mod node;
pub mod packet;
pub mod pcap;
pub mod queue_disc;
pub mod stack;
pub mod stats;
pub mod tcp;
mod time;

pub use self::{
    data_rate::{DataRate, DataRateParseError},
    error::SimError,
    time::{SimTime, TimeParseError},
};
