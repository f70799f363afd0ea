use crate::{link::LinkId, node::NodeId, queue_disc::QueueDisc};
use std::{fmt, net::Ipv4Addr};

/// # Interface Identifier
///
/// Unique across the whole [`Network`], unlike the interface name which is
/// only unique on its node.
///
/// [`Network`]: crate::network::Network
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceId(u32);

impl InterfaceId {
    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "iface#{}", self.0)
    }
}

/// Packet and byte counters of an interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    /// Packets that could not be queued for transmission.
    pub tx_dropped: u64,
}

/// One end of a [`Link`], attached to a node.
///
/// [`Link`]: crate::link::Link
#[derive(Debug)]
pub struct Interface {
    id: InterfaceId,
    node: NodeId,
    link: LinkId,
    name: String,
    address: Option<(Ipv4Addr, u8)>,
    queue_disc: Option<Box<dyn QueueDisc>>,
    busy: bool,
    stats: InterfaceStats,
}

impl Interface {
    pub(crate) fn new(id: InterfaceId, node: NodeId, link: LinkId, name: String) -> Self {
        Self {
            id,
            node,
            link,
            name,
            address: None,
            queue_disc: None,
            busy: false,
            stats: InterfaceStats::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> InterfaceId {
        self.id
    }

    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Name of the interface on its node (`sim0`, `sim1`, ...).
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.address.map(|(addr, _)| addr)
    }

    #[inline]
    pub fn prefix_len(&self) -> Option<u8> {
        self.address.map(|(_, len)| len)
    }

    pub(crate) fn set_address(&mut self, addr: Ipv4Addr, prefix_len: u8) {
        self.address = Some((addr, prefix_len));
    }

    /// Whether `addr` is in the subnet this interface is directly
    /// connected to.
    pub fn is_on_link(&self, addr: Ipv4Addr) -> bool {
        let Some((own, prefix_len)) = self.address else {
            return false;
        };
        let mask = if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - prefix_len as u32)
        };
        u32::from(own) & mask == u32::from(addr) & mask
    }

    pub fn queue_disc(&self) -> Option<&dyn QueueDisc> {
        self.queue_disc.as_deref()
    }

    pub(crate) fn queue_disc_mut(&mut self) -> Option<&mut (dyn QueueDisc + 'static)> {
        self.queue_disc.as_deref_mut()
    }

    pub(crate) fn replace_queue_disc(
        &mut self,
        queue_disc: Option<Box<dyn QueueDisc>>,
    ) -> Option<Box<dyn QueueDisc>> {
        std::mem::replace(&mut self.queue_disc, queue_disc)
    }

    /// Whether a packet is being serialized on the link.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub(crate) fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    #[inline]
    pub fn stats(&self) -> &InterfaceStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut InterfaceStats {
        &mut self.stats
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
