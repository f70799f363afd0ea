//! The three node dumbbell: `sender ── access ── router ── bottleneck ── receiver`.

use ccsim_core::{
    DataRate, SimError, SimTime,
    address::Ipv4AddressAllocator,
    interface::InterfaceId,
    link::LinkId,
    network::Network,
    node::NodeId,
};
use std::net::Ipv4Addr;
use tracing::debug;

/// Rate and propagation delay of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    pub data_rate: DataRate,
    pub delay: SimTime,
}

impl LinkParams {
    pub const fn new(data_rate: DataRate, delay: SimTime) -> Self {
        Self { data_rate, delay }
    }
}

/// An interface and the address assigned to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub interface: InterfaceId,
    pub address: Ipv4Addr,
}

/// Handles on the nodes, links and interfaces of the dumbbell.
#[derive(Debug, Clone)]
pub struct Topology {
    pub sender: NodeId,
    pub router: NodeId,
    pub receiver: NodeId,

    pub access: LinkId,
    /// The only bottleneck of the topology.
    pub bottleneck: LinkId,

    pub sender_if: Attachment,
    pub router_access_if: Attachment,
    pub router_bottleneck_if: Attachment,
    pub receiver_if: Attachment,
}

impl Topology {
    /// Create the three nodes, then the access link, then the bottleneck
    /// link. Each link gets the next subnet of `allocator`: the first end
    /// of a link is `.1`, the second `.2`.
    pub fn build(
        network: &mut Network,
        allocator: &mut Ipv4AddressAllocator,
        access: LinkParams,
        bottleneck: LinkParams,
    ) -> Result<Self, SimError> {
        let sender = network.new_node().set_name("sender").build();
        let router = network.new_node().set_name("router").build();
        let receiver = network.new_node().set_name("receiver").build();

        let (access_link, [sender_if, router_access_if]) =
            install_link(network, allocator, sender, router, access)?;
        let (bottleneck_link, [router_bottleneck_if, receiver_if]) =
            install_link(network, allocator, router, receiver, bottleneck)?;

        Ok(Self {
            sender,
            router,
            receiver,
            access: access_link,
            bottleneck: bottleneck_link,
            sender_if,
            router_access_if,
            router_bottleneck_if,
            receiver_if,
        })
    }

    /// The router's interface on the bottleneck link, where the queue
    /// builds up.
    #[inline]
    pub fn bottleneck_egress(&self) -> InterfaceId {
        self.router_bottleneck_if.interface
    }

    /// Address the traffic is sent to.
    #[inline]
    pub fn receiver_address(&self) -> Ipv4Addr {
        self.receiver_if.address
    }
}

fn install_link(
    network: &mut Network,
    allocator: &mut Ipv4AddressAllocator,
    a: NodeId,
    b: NodeId,
    params: LinkParams,
) -> Result<(LinkId, [Attachment; 2]), SimError> {
    let link = network
        .connect(a, b)
        .set_data_rate(params.data_rate)
        .set_delay(params.delay)
        .apply()?;
    let mut subnet = allocator.allocate()?;

    let [a_if, b_if] = network.link(link)?.ends();
    let mut attach = |interface: InterfaceId| -> Result<Attachment, SimError> {
        let address = subnet.assign()?;
        network.set_address(interface, address, subnet.prefix_len())?;
        Ok(Attachment { interface, address })
    };
    let ends = [attach(a_if)?, attach(b_if)?];
    debug!(%link, a = %ends[0].address, b = %ends[1].address, "link addressed");
    Ok((link, ends))
}
