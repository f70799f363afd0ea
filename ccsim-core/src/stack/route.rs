use crate::interface::InterfaceId;
use std::{fmt, net::Ipv4Addr};

/// A static route: packets to `destination/prefix_len` leave through
/// `interface` towards `gateway`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Ipv4Addr,
    pub interface: InterfaceId,
}

impl Route {
    pub fn default_via(gateway: Ipv4Addr, interface: InterfaceId) -> Self {
        Self {
            destination: Ipv4Addr::UNSPECIFIED,
            prefix_len: 0,
            gateway,
            interface,
        }
    }

    fn mask(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix_len as u32)
        }
    }

    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask() == u32::from(self.destination) & self.mask()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix_len == 0 {
            write!(f, "default via {} dev {}", self.gateway, self.interface)
        } else {
            write!(
                f,
                "{}/{} via {} dev {}",
                self.destination, self.prefix_len, self.gateway, self.interface
            )
        }
    }
}

/// Static routes of a stack.
///
/// Directly connected subnets are not listed here: they follow from the
/// addresses of the node's interfaces.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route, replacing any route to the same destination.
    pub fn add(&mut self, route: Route) {
        self.routes.retain(|r| {
            !(r.destination == route.destination && r.prefix_len == route.prefix_len)
        });
        self.routes.push(route);
    }

    /// Longest prefix match.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<&Route> {
        self.routes
            .iter()
            .filter(|route| route.matches(addr))
            .max_by_key(|route| route.prefix_len)
    }

    pub fn default_route(&self) -> Option<&Route> {
        self.routes.iter().find(|route| route.prefix_len == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        let mut table = RoutingTable::new();
        table.add(Route::default_via(
            Ipv4Addr::new(10, 0, 0, 2),
            InterfaceId::new(0),
        ));
        table.add(Route {
            destination: Ipv4Addr::new(10, 0, 5, 0),
            prefix_len: 24,
            gateway: Ipv4Addr::new(10, 0, 0, 3),
            interface: InterfaceId::new(0),
        });

        let route = table.lookup(Ipv4Addr::new(10, 0, 5, 9)).unwrap();
        assert_eq!(route.gateway, Ipv4Addr::new(10, 0, 0, 3));

        let route = table.lookup(Ipv4Addr::new(10, 0, 1, 2)).unwrap();
        assert_eq!(route.gateway, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn default_route_is_replaced() {
        let mut table = RoutingTable::new();
        assert!(table.lookup(Ipv4Addr::new(1, 1, 1, 1)).is_none());

        table.add(Route::default_via(Ipv4Addr::new(10, 0, 0, 2), InterfaceId::new(0)));
        table.add(Route::default_via(Ipv4Addr::new(10, 0, 0, 3), InterfaceId::new(0)));
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.default_route().unwrap().gateway,
            Ipv4Addr::new(10, 0, 0, 3)
        );
    }
}
