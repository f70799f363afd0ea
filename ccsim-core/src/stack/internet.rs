use super::RoutingTable;
use crate::{defaults::SIMULATED_EPHEMERAL_PORT, tcp::TcpVariant};

/// The simulated Internet stack: IPv4 with static routing and the
/// reference TCP engine.
///
/// It is ready as soon as it is installed. Forwarding is on by default.
#[derive(Debug, Clone)]
pub struct InternetStack {
    forwarding: bool,
    routes: RoutingTable,
    variant: TcpVariant,
    ecn: bool,
    next_port: u16,
}

impl InternetStack {
    pub fn new() -> Self {
        Self {
            forwarding: true,
            routes: RoutingTable::new(),
            variant: TcpVariant::default(),
            ecn: false,
            next_port: SIMULATED_EPHEMERAL_PORT,
        }
    }

    pub fn with_variant(mut self, variant: TcpVariant) -> Self {
        self.variant = variant;
        self
    }

    #[inline]
    pub fn forwarding(&self) -> bool {
        self.forwarding
    }

    pub fn set_forwarding(&mut self, forwarding: bool) {
        self.forwarding = forwarding;
    }

    /// The congestion control of the sockets opened from now on.
    #[inline]
    pub fn variant(&self) -> TcpVariant {
        self.variant
    }

    pub fn set_variant(&mut self, variant: TcpVariant) {
        self.variant = variant;
    }

    #[inline]
    pub fn ecn(&self) -> bool {
        self.ecn
    }

    pub fn set_ecn(&mut self, ecn: bool) {
        self.ecn = ecn;
    }

    #[inline]
    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    #[inline]
    pub fn routes_mut(&mut self) -> &mut RoutingTable {
        &mut self.routes
    }

    /// Next port of the sequential ephemeral range, `None` once exhausted.
    pub(crate) fn next_ephemeral_port(&mut self) -> Option<u16> {
        let port = self.next_port;
        self.next_port = self.next_port.checked_add(1)?;
        Some(port)
    }
}

impl Default for InternetStack {
    fn default() -> Self {
        Self::new()
    }
}
