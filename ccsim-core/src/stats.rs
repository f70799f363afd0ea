//! Network statistics and observability types.
//!
//! [`NetworkStats`] provides a point-in-time snapshot of the network state.
//! Obtain one via [`Network::stats`](crate::network::Network::stats).

use crate::{
    data_rate::DataRate,
    interface::{InterfaceId, InterfaceStats},
    link::LinkId,
    node::NodeId,
    queue_disc::QueueDiscStats,
    stack::StackMode,
    time::SimTime,
};

/// Snapshot of statistics for a single node.
#[derive(Debug, Clone)]
pub struct NodeStats {
    /// The node's identifier.
    pub id: NodeId,
    pub name: String,
    /// The installed stack, if any.
    pub stack: Option<StackMode>,
    /// Open TCP sockets on this node, listeners excluded.
    pub sockets: usize,
}

/// Snapshot of statistics for a single link.
#[derive(Debug, Clone)]
pub struct LinkStats {
    pub id: LinkId,
    pub data_rate: DataRate,
    pub delay: SimTime,
    pub ends: [InterfaceId; 2],
}

/// Snapshot of statistics for a single interface.
#[derive(Debug, Clone)]
pub struct InterfaceSnapshot {
    pub id: InterfaceId,
    pub node: NodeId,
    pub name: String,
    pub counters: InterfaceStats,
    /// Counters of the attached queue discipline.
    pub queue_disc: Option<(&'static str, QueueDiscStats)>,
}

/// Point-in-time snapshot of the entire network state.
#[derive(Debug, Clone)]
pub struct NetworkStats {
    pub nodes: Vec<NodeStats>,
    pub links: Vec<LinkStats>,
    pub interfaces: Vec<InterfaceSnapshot>,
    /// Packets dropped because no stack could take them: no route, no
    /// listening socket or a stack that is not up.
    pub undeliverable: u64,
}

impl NetworkStats {
    /// Total packets dropped by every queue discipline.
    pub fn queue_drops(&self) -> u64 {
        self.interfaces
            .iter()
            .filter_map(|iface| iface.queue_disc.as_ref())
            .map(|(_, stats)| stats.dropped_packets())
            .sum()
    }
}
