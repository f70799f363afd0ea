//! The simulated network: nodes, links, interfaces and the sockets open on
//! them.
//!
//! [`Network`] is the world the [`Clock`] drives. Every packet movement is
//! an action registered on the [`Scheduler`]: a packet handed to an
//! interface goes through its queue discipline, is serialized at the link
//! rate, travels for the link delay and is received by the peer interface,
//! which forwards it or delivers it to a socket.
//!
//! ```
//! use ccsim_core::{
//!     clock::Clock,
//!     network::Network,
//!     stack::{InternetStack, Route, SocketFactory, Stack},
//!     DataRate, SimTime,
//! };
//! use std::net::{Ipv4Addr, SocketAddrV4};
//!
//! let mut network = Network::new();
//! let client = network.new_node().set_name("client").build();
//! let server = network.new_node().set_name("server").build();
//! let link = network
//!     .connect(client, server)
//!     .set_data_rate(DataRate::from_mbps(10))
//!     .set_delay(SimTime::from_millis(5))
//!     .apply()
//!     .unwrap();
//!
//! let [a, b] = network.link(link).unwrap().ends();
//! network.set_address(a, Ipv4Addr::new(10, 0, 0, 1), 24).unwrap();
//! network.set_address(b, Ipv4Addr::new(10, 0, 0, 2), 24).unwrap();
//! network.install_stack(client, Stack::Simulated(InternetStack::new())).unwrap();
//! network.install_stack(server, Stack::Simulated(InternetStack::new())).unwrap();
//!
//! let mut clock = Clock::new();
//! let sink = network.tcp_listen(server, SocketFactory::Simulated, 50000).unwrap();
//! network
//!     .tcp_connect(
//!         clock.scheduler(),
//!         client,
//!         SocketFactory::Simulated,
//!         SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 50000),
//!     )
//!     .unwrap();
//!
//! clock.stop_at(SimTime::from_secs(1));
//! clock.run(&mut network).unwrap();
//! assert!(network.listener_bytes_received(sink).unwrap() > 0);
//! ```
//!
//! [`Clock`]: crate::clock::Clock

use crate::{
    clock::Scheduler,
    data_rate::DataRate,
    defaults::{DEFAULT_MTU, INTERFACE_PREFIX, KERNEL_EPHEMERAL_PORTS},
    error::SimError,
    interface::{Interface, InterfaceId},
    link::{Link, LinkId},
    node::{Node, NodeId},
    packet::{Ecn, Packet, PacketId, Segment},
    pcap::PcapWriter,
    queue_disc::{PfifoFast, QueueDisc},
    stack::{
        IpCommand, KernelError, KernelStack, Route, SocketFactory, SsOptions, Stack, StackError,
        StackMode, ss_report,
    },
    stats::{InterfaceSnapshot, LinkStats, NetworkStats, NodeStats},
    tcp::{ListenerId, Output, SocketError, SocketId, TcpInfo, TcpSocket, TcpState},
    time::SimTime,
};
use rand_chacha::ChaChaRng;
use rand_core::{Rng, SeedableRng as _};
use std::{
    collections::{BTreeMap, HashMap},
    fmt::Write as _,
    io,
    net::{Ipv4Addr, SocketAddrV4},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Error returned when a node, link or interface cannot be found, or a
/// packet has nowhere to go.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Node ({0}) Not Found")]
    NodeNotFound(NodeId),
    #[error("Link ({0}) Not Found")]
    LinkNotFound(LinkId),
    #[error("Interface ({0}) Not Found")]
    InterfaceNotFound(InterfaceId),
    /// A link needs two distinct nodes.
    #[error("Node {0} cannot be linked to itself")]
    SelfLink(NodeId),
    /// Neither a connected subnet nor a static route covers `destination`.
    #[error("Node {node} has no route to {destination}")]
    NoRoute { node: NodeId, destination: Ipv4Addr },
    #[error("Gateway {gateway} is not on the subnet of {interface}")]
    GatewayNotOnLink {
        gateway: Ipv4Addr,
        interface: InterfaceId,
    },
}

/// A binary that ran to completion inside a kernel stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub pid: u32,
    pub node: NodeId,
    pub stdout: String,
}

#[derive(Debug)]
struct Listener {
    node: NodeId,
    port: u16,
    open: bool,
    accepted: Vec<SocketId>,
}

/// This is the entry point for every activity of [`ccsim_core`].
///
/// See the [module](self) documentation for a complete example.
///
/// [`ccsim_core`]: crate
#[derive(Debug)]
pub struct Network {
    nodes: Vec<Node>,
    links: Vec<Link>,
    interfaces: Vec<Interface>,

    sockets: Vec<TcpSocket>,
    listeners: Vec<Listener>,
    /// (node, local, remote) of every socket ever opened
    connections: HashMap<(NodeId, SocketAddrV4, SocketAddrV4), SocketId>,

    mtu: u32,
    checksum: bool,
    next_packet_id: u64,
    undeliverable: u64,

    captures: BTreeMap<InterfaceId, PcapWriter>,

    /// Centralised RNG, the only source of randomness of the simulation.
    ///
    /// A single source guarantees that the simulation is reproducible when
    /// seeded via [`Network::set_seed`].
    rng: ChaChaRng,
}

/// Builder for configuring a new node before registering it with the network.
///
/// Obtained via [`Network::new_node`].
pub struct NodeBuilder<'a> {
    name: Option<String>,
    network: &'a mut Network,
}

impl NodeBuilder<'_> {
    /// Set the node's name, used in logs and statistics. Defaults to
    /// `node<id>`.
    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Finalise the node configuration and register it with the network.
    ///
    /// Node IDs are assigned sequentially starting at `0`.
    pub fn build(self) -> NodeId {
        let Self { name, network } = self;
        let id = NodeId::new(network.nodes.len() as u32);
        let name = name.unwrap_or_else(|| format!("node{id}"));
        debug!(node = %id, %name, "new node");
        network.nodes.push(Node::new(id, name));
        id
    }
}

/// Builder for a point-to-point link between two nodes.
///
/// Obtained via [`Network::connect`]. Call [`LinkBuilder::apply`] to
/// commit the configuration.
pub struct LinkBuilder<'a> {
    a: NodeId,
    b: NodeId,
    data_rate: DataRate,
    delay: SimTime,
    network: &'a mut Network,
}

impl LinkBuilder<'_> {
    /// Set the rate both directions serialize packets at.
    pub fn set_data_rate(mut self, data_rate: DataRate) -> Self {
        self.data_rate = data_rate;
        self
    }

    /// Set the one-way propagation delay.
    pub fn set_delay(mut self, delay: SimTime) -> Self {
        self.delay = delay;
        self
    }

    /// Commit the link: one new interface on each node, the first one on
    /// `a`.
    pub fn apply(self) -> Result<LinkId, RouteError> {
        let Self {
            a,
            b,
            data_rate,
            delay,
            network,
        } = self;
        if a == b {
            return Err(RouteError::SelfLink(a));
        }
        network.node(a)?;
        network.node(b)?;

        let id = LinkId::new(network.links.len() as u32);
        let ends = [network.new_interface(a, id), network.new_interface(b, id)];
        network.links.push(Link::new(id, data_rate, delay, ends));
        debug!(link = %id, %a, %b, %data_rate, %delay, "new link");
        Ok(id)
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    /// Create a new, empty simulated network.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            links: Vec::new(),
            interfaces: Vec::new(),
            sockets: Vec::new(),
            listeners: Vec::new(),
            connections: HashMap::new(),
            mtu: DEFAULT_MTU,
            checksum: false,
            next_packet_id: 0,
            undeliverable: 0,
            captures: BTreeMap::new(),
            rng: ChaChaRng::seed_from_u64(0),
        }
    }

    /// Re-seed the network's random-number generator.
    ///
    /// The default seed is `0`.
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = ChaChaRng::seed_from_u64(seed);
    }

    /// Compute IPv4 and TCP checksums in the packet captures.
    pub fn set_checksum(&mut self, checksum: bool) {
        self.checksum = checksum;
    }

    #[inline]
    pub fn checksum(&self) -> bool {
        self.checksum
    }

    /// MTU of every interface, applies to the sockets opened afterwards.
    pub fn set_mtu(&mut self, mtu: u32) {
        self.mtu = mtu;
    }

    #[inline]
    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    /// Create a new node and return a builder to configure it.
    pub fn new_node(&mut self) -> NodeBuilder<'_> {
        NodeBuilder {
            name: None,
            network: self,
        }
    }

    /// Link two nodes.
    ///
    /// Returns a [`LinkBuilder`], 100Mbps without delay unless told
    /// otherwise.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> LinkBuilder<'_> {
        LinkBuilder {
            a,
            b,
            data_rate: DataRate::from_mbps(100),
            delay: SimTime::ZERO,
            network: self,
        }
    }

    fn new_interface(&mut self, node: NodeId, link: LinkId) -> InterfaceId {
        let id = InterfaceId::new(self.interfaces.len() as u32);
        let index = self.nodes[node.index()].add_interface(id);
        let mut interface = Interface::new(id, node, link, format!("{INTERFACE_PREFIX}{index}"));
        if self.nodes[node.index()].stack().is_some() {
            interface.replace_queue_disc(Some(Box::new(PfifoFast::default())));
        }
        self.interfaces.push(interface);
        id
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, RouteError> {
        self.nodes
            .get(id.index())
            .ok_or(RouteError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, RouteError> {
        self.nodes
            .get_mut(id.index())
            .ok_or(RouteError::NodeNotFound(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn link(&self, id: LinkId) -> Result<&Link, RouteError> {
        self.links
            .get(id.index())
            .ok_or(RouteError::LinkNotFound(id))
    }

    pub fn interface(&self, id: InterfaceId) -> Result<&Interface, RouteError> {
        self.interfaces
            .get(id.index())
            .ok_or(RouteError::InterfaceNotFound(id))
    }

    fn interface_mut(&mut self, id: InterfaceId) -> Result<&mut Interface, RouteError> {
        self.interfaces
            .get_mut(id.index())
            .ok_or(RouteError::InterfaceNotFound(id))
    }

    /// The interface of `node` named `name`.
    pub fn interface_by_name(&self, node: NodeId, name: &str) -> Option<InterfaceId> {
        self.node(node)
            .ok()?
            .interfaces()
            .iter()
            .copied()
            .find(|&iface| self.interfaces[iface.index()].name() == name)
    }

    pub fn set_address(
        &mut self,
        interface: InterfaceId,
        addr: Ipv4Addr,
        prefix_len: u8,
    ) -> Result<(), RouteError> {
        let interface = self.interface_mut(interface)?;
        interface.set_address(addr, prefix_len.min(32));
        debug!(iface = %interface.id(), name = interface.name(), %addr, prefix_len, "address assigned");
        Ok(())
    }

    /// Whether `addr` is one of the addresses of `node`.
    pub fn is_local(&self, node: NodeId, addr: Ipv4Addr) -> bool {
        self.node(node).is_ok_and(|node| {
            node.interfaces()
                .iter()
                .any(|iface| self.interfaces[iface.index()].address() == Some(addr))
        })
    }

    /// Install the network stack of `node`.
    ///
    /// Every interface of the node without a queue discipline gets a
    /// default [`PfifoFast`].
    pub fn install_stack(&mut self, node: NodeId, stack: Stack) -> Result<(), SimError> {
        let mode = stack.mode();
        self.node_mut(node)?.install_stack(stack)?;

        for iface in self.nodes[node.index()].interfaces().to_vec() {
            let interface = &mut self.interfaces[iface.index()];
            if interface.queue_disc().is_none() {
                interface.replace_queue_disc(Some(Box::new(PfifoFast::default())));
            }
        }
        debug!(%node, %mode, "stack installed");
        Ok(())
    }

    pub fn stack(&self, node: NodeId) -> Result<&Stack, SimError> {
        Ok(self
            .node(node)?
            .stack()
            .ok_or(StackError::NotInstalled(node))?)
    }

    pub fn stack_mut(&mut self, node: NodeId) -> Result<&mut Stack, SimError> {
        Ok(self
            .node_mut(node)?
            .stack_mut()
            .ok_or(StackError::NotInstalled(node))?)
    }

    /// The kernel stack of `node`.
    pub fn kernel_mut(&mut self, node: NodeId) -> Result<&mut KernelStack, SimError> {
        let stack = self.stack_mut(node)?;
        let actual = stack.mode();
        stack.as_kernel_mut().ok_or_else(|| {
            StackError::WrongMode {
                node,
                expected: StackMode::Kernel,
                actual,
            }
            .into()
        })
    }

    /// Set a sysctl of the kernel stack of `node`.
    pub fn sysctl_set(&mut self, node: NodeId, key: &str, value: &str) -> Result<(), SimError> {
        self.kernel_mut(node)?.sysctl_set(key, value)?;
        Ok(())
    }

    /// Boot the kernel stack of `node`, applying its pending sysctls.
    pub fn boot_kernel(&mut self, node: NodeId) -> Result<(), SimError> {
        let kernel = self.kernel_mut(node)?;
        kernel.boot()?;
        info!(%node, congestion_control = kernel.congestion_control(), "kernel booted");
        Ok(())
    }

    /// Add a static route to the stack of `node`. The gateway must be on
    /// the subnet of the route's interface.
    pub fn add_route(&mut self, node: NodeId, route: Route) -> Result<(), SimError> {
        let interface = self.interface(route.interface)?;
        if interface.node() != node {
            return Err(RouteError::InterfaceNotFound(route.interface).into());
        }
        if !interface.is_on_link(route.gateway) {
            return Err(RouteError::GatewayNotOnLink {
                gateway: route.gateway,
                interface: route.interface,
            }
            .into());
        }
        self.stack_mut(node)?.routes_mut().add(route);
        debug!(%node, %route, "route added");
        Ok(())
    }

    /// Replace the queue discipline of `interface`, returning the previous
    /// one.
    pub fn attach_queue_disc(
        &mut self,
        interface: InterfaceId,
        queue_disc: Box<dyn QueueDisc>,
    ) -> Result<Option<Box<dyn QueueDisc>>, RouteError> {
        let interface = self.interface_mut(interface)?;
        debug!(iface = %interface.id(), queue_disc = queue_disc.name(), limit = %queue_disc.limit(), "queue disc attached");
        Ok(interface.replace_queue_disc(Some(queue_disc)))
    }

    /// Remove the queue discipline of `interface`. Packets handed to an
    /// interface without one are dropped.
    pub fn detach_queue_disc(
        &mut self,
        interface: InterfaceId,
    ) -> Result<Option<Box<dyn QueueDisc>>, RouteError> {
        Ok(self.interface_mut(interface)?.replace_queue_disc(None))
    }

    pub fn queue_disc(&self, interface: InterfaceId) -> Option<&dyn QueueDisc> {
        self.interface(interface).ok()?.queue_disc()
    }

    /// Capture every packet sent or received on both ends of `link` into
    /// `<dir>/<prefix>-<node>-<interface index>.pcap`.
    pub fn enable_pcap(
        &mut self,
        link: LinkId,
        dir: &Path,
        prefix: &str,
    ) -> Result<Vec<PathBuf>, SimError> {
        let ends = self.link(link)?.ends();
        let mut paths = Vec::with_capacity(ends.len());
        for iface in ends {
            let node = self.interface(iface)?.node();
            let index = self
                .node(node)?
                .interfaces()
                .iter()
                .position(|&i| i == iface)
                .ok_or(RouteError::InterfaceNotFound(iface))?;
            let path = dir.join(format!("{prefix}-{node}-{index}.pcap"));
            let writer = PcapWriter::create(&path, self.checksum)?;
            debug!(%link, path = %path.display(), "capture enabled");
            self.captures.insert(iface, writer);
            paths.push(path);
        }
        Ok(paths)
    }

    /// Flush the capture files to disk.
    pub fn flush_captures(&mut self) -> io::Result<()> {
        for writer in self.captures.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn check_factory(&self, node: NodeId, factory: SocketFactory) -> Result<&Stack, SimError> {
        let stack = self.stack(node)?;
        if stack.mode() != factory.mode() {
            return Err(StackError::FactoryMismatch {
                node,
                factory,
                mode: stack.mode(),
            }
            .into());
        }
        if !stack.is_ready() {
            return Err(StackError::NotReady(node).into());
        }
        Ok(stack)
    }

    /// Listen on `port` on every address of `node`.
    pub fn tcp_listen(
        &mut self,
        node: NodeId,
        factory: SocketFactory,
        port: u16,
    ) -> Result<ListenerId, SimError> {
        self.check_factory(node, factory)?;
        if self
            .listeners
            .iter()
            .any(|l| l.open && l.node == node && l.port == port)
        {
            return Err(SocketError::PortInUse { node, port }.into());
        }

        let id = ListenerId::new(self.listeners.len() as u32);
        self.listeners.push(Listener {
            node,
            port,
            open: true,
            accepted: Vec::new(),
        });
        debug!(listener = %id, %node, port, %factory, "listening");
        Ok(id)
    }

    /// Stop accepting connections and close the accepted ones.
    pub fn close_listener(&mut self, listener: ListenerId) -> Result<(), SocketError> {
        let entry = self
            .listeners
            .get_mut(listener.index())
            .ok_or(SocketError::ListenerNotFound(listener))?;
        entry.open = false;
        for socket in &entry.accepted {
            self.sockets[socket.index()].close();
        }
        debug!(%listener, "listener closed");
        Ok(())
    }

    /// Total in order bytes received by the connections `listener`
    /// accepted.
    pub fn listener_bytes_received(&self, listener: ListenerId) -> Result<u64, SocketError> {
        let entry = self
            .listeners
            .get(listener.index())
            .ok_or(SocketError::ListenerNotFound(listener))?;
        Ok(entry
            .accepted
            .iter()
            .map(|socket| self.sockets[socket.index()].bytes_received())
            .sum())
    }

    /// Open a connection from `node` to `remote`. The SYN leaves
    /// immediately; data follows as soon as the connection is established
    /// and never stops until the socket is closed.
    pub fn tcp_connect(
        &mut self,
        scheduler: &mut Scheduler<Network>,
        node: NodeId,
        factory: SocketFactory,
        remote: SocketAddrV4,
    ) -> Result<SocketId, SimError> {
        let config = self.check_factory(node, factory)?.socket_config(self.mtu);
        let iface = self.route(node, *remote.ip())?;
        let local_ip = self.interfaces[iface.index()]
            .address()
            .ok_or(SocketError::NoLocalAddress(node))?;
        let port = self.ephemeral_port(node, local_ip, remote)?;
        let local = SocketAddrV4::new(local_ip, port);

        let id = SocketId::new(self.sockets.len() as u32);
        let (socket, out) = TcpSocket::connect(id, node, local, remote, config, scheduler.now());
        self.sockets.push(socket);
        self.connections.insert((node, local, remote), id);
        debug!(socket = %id, %local, %remote, variant = %config.variant, "connecting");

        self.apply_output(scheduler, id, out)?;
        Ok(id)
    }

    fn ephemeral_port(
        &mut self,
        node: NodeId,
        local_ip: Ipv4Addr,
        remote: SocketAddrV4,
    ) -> Result<u16, SimError> {
        let Self {
            nodes,
            connections,
            rng,
            ..
        } = self;
        let in_use =
            |port| connections.contains_key(&(node, SocketAddrV4::new(local_ip, port), remote));

        let stack = nodes[node.index()]
            .stack_mut()
            .ok_or(StackError::NotInstalled(node))?;
        match stack {
            Stack::Simulated(stack) => {
                while let Some(port) = stack.next_ephemeral_port() {
                    if !in_use(port) {
                        return Ok(port);
                    }
                }
            }
            Stack::Kernel(_) => {
                let first = *KERNEL_EPHEMERAL_PORTS.start() as u32;
                let span = *KERNEL_EPHEMERAL_PORTS.end() as u32 - first + 1;
                for _ in 0..span {
                    let port = (first + rng.next_u32() % span) as u16;
                    if !in_use(port) {
                        return Ok(port);
                    }
                }
            }
        }
        Err(SocketError::NoEphemeralPort(node).into())
    }

    /// Close a socket: it stops sending and ignores what it receives.
    pub fn tcp_close(&mut self, socket: SocketId) -> Result<(), SocketError> {
        self.sockets
            .get_mut(socket.index())
            .ok_or(SocketError::NotFound(socket))?
            .close();
        debug!(%socket, "closed");
        Ok(())
    }

    pub fn socket_info(&self, socket: SocketId) -> Result<TcpInfo, SocketError> {
        self.sockets
            .get(socket.index())
            .map(TcpSocket::info)
            .ok_or(SocketError::NotFound(socket))
    }

    /// Sockets of `node` that are not closed.
    pub fn sockets_on(&self, node: NodeId) -> impl Iterator<Item = SocketId> + '_ {
        self.sockets
            .iter()
            .filter(move |socket| socket.node() == node && socket.state() != TcpState::Closed)
            .map(TcpSocket::id)
    }

    /// Record the congestion window changes of `socket` from `now` on.
    pub fn enable_cwnd_trace(&mut self, socket: SocketId, now: SimTime) -> Result<(), SocketError> {
        self.sockets
            .get_mut(socket.index())
            .ok_or(SocketError::NotFound(socket))?
            .enable_cwnd_trace(now);
        Ok(())
    }

    /// The recorded `(time, cwnd in bytes)` changes, if tracing is on.
    pub fn cwnd_trace(&self, socket: SocketId) -> Result<Option<&[(SimTime, u64)]>, SocketError> {
        Ok(self
            .sockets
            .get(socket.index())
            .ok_or(SocketError::NotFound(socket))?
            .cwnd_trace())
    }

    /// Run one of the binaries a kernel stack ships with (`ss` or `ip`)
    /// inside `node` and collect what it prints.
    ///
    /// # Errors
    ///
    /// The node must run a booted kernel stack. Unknown binaries and
    /// malformed arguments are [`KernelError`]s.
    pub fn launch(&mut self, node: NodeId, binary: &str, args: &str) -> Result<Process, SimError> {
        if !self.kernel_mut(node)?.is_booted() {
            return Err(KernelError::NotBooted.into());
        }

        let name = binary.rsplit('/').next().unwrap_or(binary);
        let stdout = match name {
            "ss" => self.ss(node, SsOptions::parse(args)?),
            "ip" => self.ip(node, IpCommand::parse(args)?)?,
            _ => return Err(KernelError::BinaryNotFound(binary.to_owned()).into()),
        };
        let pid = self.kernel_mut(node)?.next_pid();
        trace!(%node, pid, binary, args, "launched");
        Ok(Process { pid, node, stdout })
    }

    fn ss(&self, node: NodeId, options: SsOptions) -> String {
        let listeners: Vec<SocketAddrV4> = self
            .listeners
            .iter()
            .filter(|l| l.open && l.node == node)
            .map(|l| SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, l.port))
            .collect();
        let sockets: Vec<TcpInfo> = self
            .sockets
            .iter()
            .filter(|socket| socket.node() == node && socket.state() != TcpState::Closed)
            .map(TcpSocket::info)
            .collect();
        ss_report(options, &listeners, &sockets)
    }

    fn ip(&mut self, node: NodeId, command: IpCommand) -> Result<String, SimError> {
        match command {
            IpCommand::RouteAdd {
                destination,
                prefix_len,
                gateway,
                device,
            } => {
                let interface = self
                    .interface_by_name(node, &device)
                    .ok_or(KernelError::UnknownDevice(device))?;
                self.add_route(
                    node,
                    Route {
                        destination,
                        prefix_len,
                        gateway,
                        interface,
                    },
                )?;
                Ok(String::new())
            }
            IpCommand::RouteShow => {
                let mut out = String::new();
                let node_ref = self.node(node)?;
                if let Some(stack) = node_ref.stack() {
                    for route in stack.routes().iter() {
                        let device = self.interfaces[route.interface.index()].name();
                        if route.prefix_len == 0 {
                            let _ = writeln!(out, "default via {} dev {device}", route.gateway);
                        } else {
                            let _ = writeln!(
                                out,
                                "{}/{} via {} dev {device}",
                                route.destination, route.prefix_len, route.gateway
                            );
                        }
                    }
                }
                for iface in node_ref.interfaces() {
                    let interface = &self.interfaces[iface.index()];
                    if let (Some(addr), Some(len)) = (interface.address(), interface.prefix_len()) {
                        let mask = if len == 0 { 0 } else { u32::MAX << (32 - len as u32) };
                        let subnet = Ipv4Addr::from(u32::from(addr) & mask);
                        let _ = writeln!(
                            out,
                            "{subnet}/{len} dev {} proto kernel scope link src {addr}",
                            interface.name()
                        );
                    }
                }
                Ok(out)
            }
        }
    }

    /// Snapshot of the network counters.
    pub fn stats(&self) -> NetworkStats {
        let nodes = self
            .nodes
            .iter()
            .map(|node| NodeStats {
                id: node.id(),
                name: node.name().to_owned(),
                stack: node.stack().map(Stack::mode),
                sockets: self.sockets_on(node.id()).count(),
            })
            .collect();
        let links = self
            .links
            .iter()
            .map(|link| LinkStats {
                id: link.id(),
                data_rate: link.data_rate(),
                delay: link.delay(),
                ends: link.ends(),
            })
            .collect();
        let interfaces = self
            .interfaces
            .iter()
            .map(|iface| InterfaceSnapshot {
                id: iface.id(),
                node: iface.node(),
                name: iface.name().to_owned(),
                counters: *iface.stats(),
                queue_disc: iface.queue_disc().map(|qd| (qd.name(), qd.stats().clone())),
            })
            .collect();

        NetworkStats {
            nodes,
            links,
            interfaces,
            undeliverable: self.undeliverable,
        }
    }

    /// Interface `node` sends packets for `destination` through.
    fn route(&self, node: NodeId, destination: Ipv4Addr) -> Result<InterfaceId, RouteError> {
        let node_ref = self.node(node)?;
        if let Some(&iface) = node_ref
            .interfaces()
            .iter()
            .find(|iface| self.interfaces[iface.index()].is_on_link(destination))
        {
            return Ok(iface);
        }
        node_ref
            .stack()
            .and_then(|stack| stack.routes().lookup(destination))
            .map(|route| route.interface)
            .ok_or(RouteError::NoRoute { node, destination })
    }

    fn next_packet_id(&mut self) -> PacketId {
        let id = PacketId::new(self.next_packet_id);
        self.next_packet_id += 1;
        id
    }

    fn apply_output(
        &mut self,
        scheduler: &mut Scheduler<Network>,
        socket: SocketId,
        out: Output,
    ) -> Result<(), SimError> {
        let Output { segments, timer } = out;
        let (node, local, remote, ecn) = {
            let s = &self.sockets[socket.index()];
            (s.node(), s.local(), s.remote(), s.ecn())
        };
        let now = scheduler.now();

        for segment in segments {
            let mut packet = Packet::new(self.next_packet_id(), local, remote, segment, now);
            if ecn && matches!(segment, Segment::Data { .. }) {
                packet = packet.with_ecn(Ecn::Ect);
            }
            let iface = self.route(node, *remote.ip())?;
            self.enqueue(scheduler, iface, packet)?;
        }

        if let Some((deadline, generation)) = timer {
            scheduler.schedule(deadline, "tcp-timer", move |scheduler, network| {
                network.on_socket_timer(scheduler, socket, generation)
            });
        }
        Ok(())
    }

    fn on_socket_timer(
        &mut self,
        scheduler: &mut Scheduler<Network>,
        socket: SocketId,
        generation: u64,
    ) -> Result<(), SimError> {
        let out = self
            .sockets
            .get_mut(socket.index())
            .ok_or(SocketError::NotFound(socket))?
            .on_timer(scheduler.now(), generation);
        self.apply_output(scheduler, socket, out)
    }

    fn enqueue(
        &mut self,
        scheduler: &mut Scheduler<Network>,
        iface: InterfaceId,
        packet: Packet,
    ) -> Result<(), SimError> {
        let now = scheduler.now();
        let interface = self.interface_mut(iface)?;
        let Some(queue_disc) = interface.queue_disc_mut() else {
            trace!(%iface, packet = %packet.id(), "no queue disc, dropped");
            interface.stats_mut().tx_dropped += 1;
            return Ok(());
        };
        if let Err(packet) = queue_disc.enqueue(packet, now) {
            trace!(%iface, packet = %packet.id(), "queue full, dropped");
            interface.stats_mut().tx_dropped += 1;
            return Ok(());
        }
        self.start_tx(scheduler, iface)
    }

    fn start_tx(
        &mut self,
        scheduler: &mut Scheduler<Network>,
        iface: InterfaceId,
    ) -> Result<(), SimError> {
        let now = scheduler.now();
        let interface = self
            .interfaces
            .get_mut(iface.index())
            .ok_or(RouteError::InterfaceNotFound(iface))?;
        if interface.is_busy() {
            return Ok(());
        }
        let Some(packet) = interface
            .queue_disc_mut()
            .and_then(|queue_disc| queue_disc.dequeue(now))
        else {
            return Ok(());
        };

        interface.set_busy(true);
        let stats = interface.stats_mut();
        stats.tx_packets += 1;
        stats.tx_bytes += packet.size() as u64;

        let link = &self.links[interface.link().index()];
        let peer = link.peer(iface).ok_or(RouteError::InterfaceNotFound(iface))?;
        let tx_time = link.data_rate().transmission_time(packet.size() as u64);
        let arrival = tx_time + link.delay();

        if let Some(writer) = self.captures.get_mut(&iface) {
            writer.write_packet(now, &packet)?;
        }

        scheduler.schedule_in(tx_time, "tx-complete", move |scheduler, network| {
            network.tx_complete(scheduler, iface)
        });
        scheduler.schedule_in(arrival, "rx", move |scheduler, network| {
            network.receive(scheduler, peer, packet)
        });
        Ok(())
    }

    fn tx_complete(
        &mut self,
        scheduler: &mut Scheduler<Network>,
        iface: InterfaceId,
    ) -> Result<(), SimError> {
        self.interface_mut(iface)?.set_busy(false);
        self.start_tx(scheduler, iface)
    }

    fn receive(
        &mut self,
        scheduler: &mut Scheduler<Network>,
        iface: InterfaceId,
        packet: Packet,
    ) -> Result<(), SimError> {
        if let Some(writer) = self.captures.get_mut(&iface) {
            writer.write_packet(scheduler.now(), &packet)?;
        }
        let interface = self.interface_mut(iface)?;
        let stats = interface.stats_mut();
        stats.rx_packets += 1;
        stats.rx_bytes += packet.size() as u64;
        let node = interface.node();

        let (ready, forwarding) = match self.node(node)?.stack() {
            Some(stack) => (stack.is_ready(), stack.forwarding()),
            None => (false, false),
        };
        let destination = *packet.dst().ip();

        if !ready {
            trace!(%node, packet = %packet.id(), "stack down, dropped");
            self.undeliverable += 1;
            Ok(())
        } else if self.is_local(node, destination) {
            self.deliver(scheduler, node, packet)
        } else if forwarding && let Ok(out) = self.route(node, destination) {
            self.enqueue(scheduler, out, packet)
        } else {
            trace!(%node, packet = %packet.id(), %destination, "not forwarded, dropped");
            self.undeliverable += 1;
            Ok(())
        }
    }

    fn deliver(
        &mut self,
        scheduler: &mut Scheduler<Network>,
        node: NodeId,
        packet: Packet,
    ) -> Result<(), SimError> {
        let now = scheduler.now();
        let ce = packet.ecn() == Ecn::Ce;

        if let Some(&socket) = self.connections.get(&(node, packet.dst(), packet.src())) {
            let out = self.sockets[socket.index()].on_segment(
                now,
                packet.segment(),
                ce,
                packet.sent_at(),
            );
            return self.apply_output(scheduler, socket, out);
        }

        let listener = self
            .listeners
            .iter()
            .position(|l| l.open && l.node == node && l.port == packet.dst().port());
        match (packet.segment(), listener) {
            (Segment::Syn, Some(listener)) => {
                let config = self.stack(node)?.socket_config(self.mtu);
                let id = SocketId::new(self.sockets.len() as u32);
                let (socket, out) = TcpSocket::accept(id, node, packet.dst(), packet.src(), config);
                self.sockets.push(socket);
                self.connections
                    .insert((node, packet.dst(), packet.src()), id);
                self.listeners[listener].accepted.push(id);
                debug!(socket = %id, local = %packet.dst(), remote = %packet.src(), "accepted");
                self.apply_output(scheduler, id, out)
            }
            _ => {
                trace!(%node, packet = %packet.id(), dst = %packet.dst(), "no socket, dropped");
                self.undeliverable += 1;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::Clock,
        queue_disc::{QueueSize, QueueSizeUnit},
        stack::{InternetStack, SYSCTL_CONGESTION_CONTROL},
    };

    const RECEIVER: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 1, 2), 50000);

    struct Dumbbell {
        network: Network,
        sender: NodeId,
        router: NodeId,
        receiver: NodeId,
        access: LinkId,
        bottleneck: LinkId,
    }

    fn dumbbell() -> Dumbbell {
        let mut network = Network::new();
        network.set_mtu(400);
        let sender = network.new_node().set_name("sender").build();
        let router = network.new_node().set_name("router").build();
        let receiver = network.new_node().set_name("receiver").build();

        let access = network
            .connect(sender, router)
            .set_data_rate(DataRate::from_mbps(10))
            .set_delay(SimTime::from_millis(45))
            .apply()
            .unwrap();
        let bottleneck = network
            .connect(router, receiver)
            .set_data_rate(DataRate::from_mbps(2))
            .set_delay(SimTime::from_micros(10))
            .apply()
            .unwrap();

        let [s0, r0] = network.link(access).unwrap().ends();
        let [r1, d0] = network.link(bottleneck).unwrap().ends();
        network.set_address(s0, Ipv4Addr::new(10, 0, 0, 1), 24).unwrap();
        network.set_address(r0, Ipv4Addr::new(10, 0, 0, 2), 24).unwrap();
        network.set_address(r1, Ipv4Addr::new(10, 0, 1, 1), 24).unwrap();
        network.set_address(d0, Ipv4Addr::new(10, 0, 1, 2), 24).unwrap();

        Dumbbell {
            network,
            sender,
            router,
            receiver,
            access,
            bottleneck,
        }
    }

    fn simulated(d: &mut Dumbbell) {
        for node in [d.sender, d.router, d.receiver] {
            d.network
                .install_stack(node, Stack::Simulated(InternetStack::new()))
                .unwrap();
        }
        let [s0, _] = d.network.link(d.access).unwrap().ends();
        let [_, d0] = d.network.link(d.bottleneck).unwrap().ends();
        d.network
            .add_route(d.sender, Route::default_via(Ipv4Addr::new(10, 0, 0, 2), s0))
            .unwrap();
        d.network
            .add_route(d.receiver, Route::default_via(Ipv4Addr::new(10, 0, 1, 1), d0))
            .unwrap();
    }

    #[test]
    fn interfaces_are_named_per_node() {
        let d = dumbbell();
        let router = d.network.node(d.router).unwrap();
        let names: Vec<&str> = router
            .interfaces()
            .iter()
            .map(|&iface| d.network.interface(iface).unwrap().name())
            .collect();
        assert_eq!(names, ["sim0", "sim1"]);
        assert!(d.network.interface_by_name(d.sender, "sim1").is_none());
    }

    #[test]
    fn self_link() {
        let mut network = Network::new();
        let node = network.new_node().build();
        assert_eq!(
            network.connect(node, node).apply(),
            Err(RouteError::SelfLink(node))
        );
    }

    #[test]
    fn stack_gets_default_queue_discs() {
        let mut d = dumbbell();
        let [_, r0] = d.network.link(d.access).unwrap().ends();
        assert!(d.network.queue_disc(r0).is_none());

        simulated(&mut d);
        let queue_disc = d.network.queue_disc(r0).unwrap();
        assert_eq!(queue_disc.name(), PfifoFast::NAME);
        assert_eq!(queue_disc.limit().unit(), QueueSizeUnit::Packets);
    }

    #[test]
    fn gateway_must_be_on_link() {
        let mut d = dumbbell();
        simulated(&mut d);
        let [s0, _] = d.network.link(d.access).unwrap().ends();
        let error = d
            .network
            .add_route(d.sender, Route::default_via(Ipv4Addr::new(10, 0, 1, 1), s0))
            .unwrap_err();
        assert!(matches!(
            error,
            SimError::Route(RouteError::GatewayNotOnLink { .. })
        ));
    }

    #[test]
    fn bulk_transfer_through_the_router() {
        let mut d = dumbbell();
        simulated(&mut d);
        let mut clock = Clock::new();

        let sink = d
            .network
            .tcp_listen(d.receiver, SocketFactory::Simulated, 50000)
            .unwrap();
        let socket = d
            .network
            .tcp_connect(clock.scheduler(), d.sender, SocketFactory::Simulated, RECEIVER)
            .unwrap();
        assert_eq!(
            d.network.socket_info(socket).unwrap().local,
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 49153)
        );

        clock.stop_at(SimTime::from_secs(2));
        clock.run(&mut d.network).unwrap();

        let received = d.network.listener_bytes_received(sink).unwrap();
        assert!(received > 0);
        // never more than the bottleneck can carry
        assert!(received <= 2_000_000 / 8 * 2);
        assert_eq!(
            d.network.socket_info(socket).unwrap().state,
            TcpState::Established
        );
    }

    #[test]
    fn small_bottleneck_queue_drops() {
        let mut d = dumbbell();
        simulated(&mut d);
        let [r1, _] = d.network.link(d.bottleneck).unwrap().ends();
        d.network
            .attach_queue_disc(r1, Box::new(PfifoFast::new(QueueSize::packets(5)).unwrap()))
            .unwrap();

        let mut clock = Clock::new();
        d.network
            .tcp_listen(d.receiver, SocketFactory::Simulated, 50000)
            .unwrap();
        d.network
            .tcp_connect(clock.scheduler(), d.sender, SocketFactory::Simulated, RECEIVER)
            .unwrap();
        clock.stop_at(SimTime::from_secs(10));
        clock.run(&mut d.network).unwrap();

        let stats = d.network.queue_disc(r1).unwrap().stats();
        assert!(stats.sent_packets > 0);
        assert!(stats.dropped_packets() > 0);
        assert!(d.network.stats().queue_drops() > 0);
    }

    #[test]
    fn factory_must_match_the_stack() {
        let mut d = dumbbell();
        simulated(&mut d);
        let error = d
            .network
            .tcp_listen(d.receiver, SocketFactory::Kernel, 50000)
            .unwrap_err();
        assert!(matches!(
            error,
            SimError::Stack(StackError::FactoryMismatch { .. })
        ));
    }

    #[test]
    fn port_in_use() {
        let mut d = dumbbell();
        simulated(&mut d);
        let listener = d
            .network
            .tcp_listen(d.receiver, SocketFactory::Simulated, 50000)
            .unwrap();
        assert!(
            d.network
                .tcp_listen(d.receiver, SocketFactory::Simulated, 50000)
                .is_err()
        );
        d.network.close_listener(listener).unwrap();
        d.network
            .tcp_listen(d.receiver, SocketFactory::Simulated, 50000)
            .unwrap();
    }

    #[test]
    fn kernel_needs_boot() {
        let mut d = dumbbell();
        d.network
            .install_stack(d.sender, Stack::Kernel(KernelStack::new()))
            .unwrap();
        let mut clock = Clock::new();

        let error = d
            .network
            .tcp_connect(clock.scheduler(), d.sender, SocketFactory::Kernel, RECEIVER)
            .unwrap_err();
        assert!(matches!(error, SimError::Stack(StackError::NotReady(_))));
        assert!(matches!(
            d.network.launch(d.sender, "ip", "route"),
            Err(SimError::Kernel(KernelError::NotBooted))
        ));
    }

    #[test]
    fn kernel_boot_validates_congestion_control() {
        let mut d = dumbbell();
        d.network
            .install_stack(d.sender, Stack::Kernel(KernelStack::new()))
            .unwrap();
        d.network
            .sysctl_set(d.sender, SYSCTL_CONGESTION_CONTROL, "ledbat")
            .unwrap();
        assert!(matches!(
            d.network.boot_kernel(d.sender),
            Err(SimError::Kernel(KernelError::UnsupportedCongestionControl(_)))
        ));
    }

    #[test]
    fn ip_route_add() {
        let mut d = dumbbell();
        d.network
            .install_stack(d.sender, Stack::Kernel(KernelStack::new()))
            .unwrap();
        d.network.boot_kernel(d.sender).unwrap();

        let process = d
            .network
            .launch(d.sender, "ip", "route add default via 10.0.0.2 dev sim0")
            .unwrap();
        assert_eq!(process.stdout, "");

        let show = d.network.launch(d.sender, "/sbin/ip", "route show").unwrap();
        assert!(show.pid > process.pid);
        assert_eq!(
            show.stdout,
            "default via 10.0.0.2 dev sim0\n\
             10.0.0.0/24 dev sim0 proto kernel scope link src 10.0.0.1\n"
        );

        assert!(matches!(
            d.network
                .launch(d.sender, "ip", "route add default via 10.0.0.2 dev sim7"),
            Err(SimError::Kernel(KernelError::UnknownDevice(_)))
        ));
        assert!(matches!(
            d.network.launch(d.sender, "iperf", ""),
            Err(SimError::Kernel(KernelError::BinaryNotFound(_)))
        ));
    }

    #[test]
    fn launch_needs_a_kernel_stack() {
        let mut d = dumbbell();
        simulated(&mut d);
        assert!(matches!(
            d.network.launch(d.sender, "ss", "-a"),
            Err(SimError::Stack(StackError::WrongMode { .. }))
        ));
    }

    #[test]
    fn kernel_transfer_and_ss() {
        let mut d = dumbbell();
        d.network.set_seed(7);
        for node in [d.sender, d.receiver] {
            d.network
                .install_stack(node, Stack::Kernel(KernelStack::new()))
                .unwrap();
            d.network.boot_kernel(node).unwrap();
        }
        d.network
            .install_stack(d.router, Stack::Simulated(InternetStack::new()))
            .unwrap();
        d.network
            .launch(d.sender, "ip", "route add default via 10.0.0.2 dev sim0")
            .unwrap();
        d.network
            .launch(d.receiver, "ip", "route add default via 10.0.1.1 dev sim0")
            .unwrap();

        let mut clock = Clock::new();
        let sink = d
            .network
            .tcp_listen(d.receiver, SocketFactory::Kernel, 50000)
            .unwrap();
        let socket = d
            .network
            .tcp_connect(clock.scheduler(), d.sender, SocketFactory::Kernel, RECEIVER)
            .unwrap();
        let port = d.network.socket_info(socket).unwrap().local.port();
        assert!(KERNEL_EPHEMERAL_PORTS.contains(&port));

        clock.stop_at(SimTime::from_secs(2));
        clock.run(&mut d.network).unwrap();
        assert!(d.network.listener_bytes_received(sink).unwrap() > 0);

        let ss = d.network.launch(d.sender, "ss", "-a -e -i").unwrap();
        assert!(ss.stdout.contains("ESTAB"));
        assert!(ss.stdout.contains("10.0.1.2:50000"));
        let ss = d.network.launch(d.receiver, "ss", "-a").unwrap();
        assert!(ss.stdout.contains("0.0.0.0:50000"));
    }

    #[test]
    fn closed_sockets_stop_sending() {
        let mut d = dumbbell();
        simulated(&mut d);
        let mut clock = Clock::new();
        let sink = d
            .network
            .tcp_listen(d.receiver, SocketFactory::Simulated, 50000)
            .unwrap();
        let socket = d
            .network
            .tcp_connect(clock.scheduler(), d.sender, SocketFactory::Simulated, RECEIVER)
            .unwrap();

        clock.stop_at(SimTime::from_secs(1));
        clock.run(&mut d.network).unwrap();
        d.network.tcp_close(socket).unwrap();
        d.network.close_listener(sink).unwrap();
        assert_eq!(d.network.sockets_on(d.sender).count(), 0);

        let received = d.network.listener_bytes_received(sink).unwrap();
        clock.stop_at(SimTime::from_secs(2));
        clock.run(&mut d.network).unwrap();
        assert_eq!(d.network.listener_bytes_received(sink).unwrap(), received);
    }

    #[test]
    fn cwnd_trace() {
        let mut d = dumbbell();
        simulated(&mut d);
        let mut clock = Clock::new();
        d.network
            .tcp_listen(d.receiver, SocketFactory::Simulated, 50000)
            .unwrap();
        let socket = d
            .network
            .tcp_connect(clock.scheduler(), d.sender, SocketFactory::Simulated, RECEIVER)
            .unwrap();
        d.network.enable_cwnd_trace(socket, SimTime::ZERO).unwrap();

        clock.stop_at(SimTime::from_secs(2));
        clock.run(&mut d.network).unwrap();
        let trace = d.network.cwnd_trace(socket).unwrap().unwrap();
        assert!(trace.len() > 1);
        assert!(trace.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn pcap_files() {
        let mut d = dumbbell();
        simulated(&mut d);
        d.network.set_checksum(true);
        let dir = std::env::temp_dir().join(format!("ccsim-pcap-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let paths = d.network.enable_pcap(d.bottleneck, &dir, "trace").unwrap();
        assert_eq!(paths, [dir.join("trace-1-1.pcap"), dir.join("trace-2-0.pcap")]);

        let mut clock = Clock::new();
        d.network
            .tcp_listen(d.receiver, SocketFactory::Simulated, 50000)
            .unwrap();
        d.network
            .tcp_connect(clock.scheduler(), d.sender, SocketFactory::Simulated, RECEIVER)
            .unwrap();
        clock.stop_at(SimTime::from_secs(1));
        clock.run(&mut d.network).unwrap();
        d.network.flush_captures().unwrap();

        for path in &paths {
            assert!(std::fs::metadata(path).unwrap().len() > 24);
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unrouted_connect_fails() {
        let mut d = dumbbell();
        for node in [d.sender, d.router, d.receiver] {
            d.network
                .install_stack(node, Stack::Simulated(InternetStack::new()))
                .unwrap();
        }
        let mut clock = Clock::new();
        let error = d
            .network
            .tcp_connect(clock.scheduler(), d.sender, SocketFactory::Simulated, RECEIVER)
            .unwrap_err();
        assert!(matches!(
            error,
            SimError::Route(RouteError::NoRoute { .. })
        ));
    }
}
