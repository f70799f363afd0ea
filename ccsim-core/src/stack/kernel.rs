//! A kernel network stack running inside the simulation.
//!
//! The stack is configured through sysctl keys. Values set before the
//! stack boots are kept pending and validated at boot, the way a kernel
//! applies its configuration while starting up: an invalid value (for
//! instance a congestion control the kernel was not built with) fails the
//! boot.

use super::RoutingTable;
use crate::{
    defaults::KERNEL_DEFAULT_CONGESTION_CONTROL,
    tcp::{CongestionAlgorithm, TcpInfo},
};
use std::{
    collections::BTreeMap,
    fmt::Write as _,
    net::{Ipv4Addr, SocketAddrV4},
};
use thiserror::Error;
use tracing::debug;

pub const SYSCTL_CONGESTION_CONTROL: &str = "net.ipv4.tcp_congestion_control";
pub const SYSCTL_AVAILABLE_CONGESTION_CONTROL: &str = "net.ipv4.tcp_available_congestion_control";
pub const SYSCTL_ECN: &str = "net.ipv4.tcp_ecn";
pub const SYSCTL_IP_FORWARD: &str = "net.ipv4.ip_forward";
pub const SYSCTL_DEFAULT_FORWARDING: &str = "net.ipv4.conf.default.forwarding";

/// Congestion controls the kernel is built with.
pub const AVAILABLE_CONGESTION_CONTROL: [&str; 13] = [
    "reno",
    "cubic",
    "bic",
    "highspeed",
    "htcp",
    "hybla",
    "illinois",
    "lp",
    "scalable",
    "vegas",
    "veno",
    "westwood",
    "yeah",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Congestion control `{0}' is not available in the kernel")]
    UnsupportedCongestionControl(String),
    #[error("Invalid value `{value}' for sysctl {key}")]
    InvalidSysctl { key: String, value: String },
    #[error("sysctl {0} is read only")]
    ReadOnlySysctl(String),
    #[error("Malformed command `{0}'")]
    MalformedCommand(String),
    #[error("Malformed address `{0}'")]
    MalformedAddress(String),
    #[error("No such device `{0}'")]
    UnknownDevice(String),
    #[error("No such binary `{0}'")]
    BinaryNotFound(String),
    #[error("The kernel stack has not booted yet")]
    NotBooted,
}

/// `.net.ipv4.tcp_ecn` and `net/ipv4/tcp_ecn` are the same key.
fn normalize_key(key: &str) -> String {
    key.trim_start_matches(['.', '/']).replace('/', ".")
}

#[derive(Debug, Clone)]
pub struct KernelStack {
    sysctl: BTreeMap<String, String>,
    pending: Vec<(String, String)>,
    booted: bool,
    routes: RoutingTable,
    next_pid: u32,
}

impl KernelStack {
    pub fn new() -> Self {
        let sysctl = [
            (SYSCTL_CONGESTION_CONTROL, KERNEL_DEFAULT_CONGESTION_CONTROL.to_owned()),
            (
                SYSCTL_AVAILABLE_CONGESTION_CONTROL,
                AVAILABLE_CONGESTION_CONTROL.join(" "),
            ),
            (SYSCTL_ECN, "2".to_owned()),
            (SYSCTL_IP_FORWARD, "0".to_owned()),
            (SYSCTL_DEFAULT_FORWARDING, "0".to_owned()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect();

        Self {
            sysctl,
            pending: Vec::new(),
            booted: false,
            routes: RoutingTable::new(),
            next_pid: 1,
        }
    }

    #[inline]
    pub fn is_booted(&self) -> bool {
        self.booted
    }

    /// Set a sysctl key.
    ///
    /// Before boot the value is only recorded: it is validated when the
    /// stack boots. After boot it is validated and applied immediately.
    pub fn sysctl_set(&mut self, key: &str, value: &str) -> Result<(), KernelError> {
        let key = normalize_key(key);
        let value = value.trim().to_owned();
        if self.booted {
            self.apply(key, value)
        } else {
            self.pending.push((key, value));
            Ok(())
        }
    }

    /// Current value of a sysctl key. Pending values are not visible
    /// before boot.
    pub fn sysctl_get(&self, key: &str) -> Option<&str> {
        self.sysctl.get(&normalize_key(key)).map(String::as_str)
    }

    /// Apply the pending configuration.
    ///
    /// # Errors
    ///
    /// The first invalid value stops the boot and is reported; the stack
    /// stays down.
    pub fn boot(&mut self) -> Result<(), KernelError> {
        if self.booted {
            return Ok(());
        }
        for (key, value) in std::mem::take(&mut self.pending) {
            self.apply(key, value)?;
        }
        self.booted = true;
        debug!(congestion_control = self.congestion_control(), "kernel stack booted");
        Ok(())
    }

    fn apply(&mut self, key: String, value: String) -> Result<(), KernelError> {
        match key.as_str() {
            SYSCTL_CONGESTION_CONTROL => {
                if !AVAILABLE_CONGESTION_CONTROL.contains(&value.as_str()) {
                    return Err(KernelError::UnsupportedCongestionControl(value));
                }
            }
            SYSCTL_AVAILABLE_CONGESTION_CONTROL => {
                return Err(KernelError::ReadOnlySysctl(key.clone()));
            }
            SYSCTL_ECN if !matches!(value.as_str(), "0" | "1" | "2") => {
                return Err(KernelError::InvalidSysctl {
                    key: key.clone(),
                    value,
                });
            }
            SYSCTL_IP_FORWARD | SYSCTL_DEFAULT_FORWARDING
                if !matches!(value.as_str(), "0" | "1") =>
            {
                return Err(KernelError::InvalidSysctl {
                    key: key.clone(),
                    value,
                });
            }
            _ => {}
        }
        self.sysctl.insert(key, value);
        Ok(())
    }

    pub fn congestion_control(&self) -> &str {
        self.sysctl_get(SYSCTL_CONGESTION_CONTROL)
            .unwrap_or(KERNEL_DEFAULT_CONGESTION_CONTROL)
    }

    pub fn congestion_algorithm(&self) -> CongestionAlgorithm {
        CongestionAlgorithm::from_kernel_name(self.congestion_control())
            .unwrap_or(CongestionAlgorithm::Cubic)
    }

    /// Whether the stack requests ECN on the connections it opens.
    pub fn ecn(&self) -> bool {
        self.sysctl_get(SYSCTL_ECN) == Some("1")
    }

    pub fn forwarding(&self) -> bool {
        self.sysctl_get(SYSCTL_IP_FORWARD) == Some("1")
            || self.sysctl_get(SYSCTL_DEFAULT_FORWARDING) == Some("1")
    }

    #[inline]
    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    #[inline]
    pub fn routes_mut(&mut self) -> &mut RoutingTable {
        &mut self.routes
    }

    pub(crate) fn next_pid(&mut self) -> u32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }
}

impl Default for KernelStack {
    fn default() -> Self {
        Self::new()
    }
}

/// A command accepted by the `ip` binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpCommand {
    RouteAdd {
        destination: Ipv4Addr,
        prefix_len: u8,
        gateway: Ipv4Addr,
        device: String,
    },
    RouteShow,
}

impl IpCommand {
    /// Parse the arguments of `ip`, e.g. `route add default via 10.0.0.2 dev sim0`.
    ///
    /// ```
    /// # use ccsim_core::stack::IpCommand;
    /// # use std::net::Ipv4Addr;
    /// let command = IpCommand::parse("route add default via 10.0.0.2 dev sim0").unwrap();
    /// assert_eq!(
    ///     command,
    ///     IpCommand::RouteAdd {
    ///         destination: Ipv4Addr::UNSPECIFIED,
    ///         prefix_len: 0,
    ///         gateway: Ipv4Addr::new(10, 0, 0, 2),
    ///         device: "sim0".to_owned(),
    ///     }
    /// );
    /// ```
    pub fn parse(args: &str) -> Result<Self, KernelError> {
        let malformed = || KernelError::MalformedCommand(args.to_owned());
        let words: Vec<&str> = args.split_whitespace().collect();

        match words.as_slice() {
            ["route"] | ["route", "show"] => Ok(Self::RouteShow),
            ["route", "add", destination, "via", gateway, "dev", device] => {
                let (destination, prefix_len) = parse_destination(destination)?;
                let gateway = gateway
                    .parse()
                    .map_err(|_| KernelError::MalformedAddress((*gateway).to_owned()))?;
                Ok(Self::RouteAdd {
                    destination,
                    prefix_len,
                    gateway,
                    device: (*device).to_owned(),
                })
            }
            _ => Err(malformed()),
        }
    }
}

fn parse_destination(destination: &str) -> Result<(Ipv4Addr, u8), KernelError> {
    let malformed = || KernelError::MalformedAddress(destination.to_owned());
    if destination == "default" {
        return Ok((Ipv4Addr::UNSPECIFIED, 0));
    }

    let (addr, prefix_len) = match destination.split_once('/') {
        Some((addr, len)) => (addr, len.parse::<u8>().map_err(|_| malformed())?),
        None => (destination, 32),
    };
    if prefix_len > 32 {
        return Err(malformed());
    }
    let addr = addr.parse::<Ipv4Addr>().map_err(|_| malformed())?;
    Ok((addr, prefix_len))
}

/// Options of the `ss` binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SsOptions {
    /// `-a`: listening sockets too
    pub all: bool,
    /// `-e`: extended socket information
    pub extended: bool,
    /// `-i`: TCP internals
    pub info: bool,
}

impl SsOptions {
    pub fn parse(args: &str) -> Result<Self, KernelError> {
        let mut options = Self::default();
        for word in args.split_whitespace() {
            let Some(flags) = word.strip_prefix('-') else {
                return Err(KernelError::MalformedCommand(args.to_owned()));
            };
            for flag in flags.chars() {
                match flag {
                    'a' => options.all = true,
                    'e' => options.extended = true,
                    'i' => options.info = true,
                    // tcp only, numeric: always the case here
                    't' | 'n' => {}
                    _ => return Err(KernelError::MalformedCommand(args.to_owned())),
                }
            }
        }
        Ok(options)
    }
}

/// Render the socket table the way `ss` prints it.
pub(crate) fn ss_report(options: SsOptions, listeners: &[SocketAddrV4], sockets: &[TcpInfo]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<10} {:<6} {:<6} {:<21} {:<21}",
        "State", "Recv-Q", "Send-Q", "Local Address:Port", "Peer Address:Port"
    );

    if options.all {
        for listener in listeners {
            let _ = writeln!(
                out,
                "{:<10} {:<6} {:<6} {:<21} {:<21}",
                "LISTEN",
                0,
                0,
                listener.to_string(),
                "0.0.0.0:*"
            );
        }
    }

    for socket in sockets {
        let _ = write!(
            out,
            "{:<10} {:<6} {:<6} {:<21} {:<21}",
            socket.state.to_string(),
            0,
            0,
            socket.local.to_string(),
            socket.remote.to_string()
        );
        if options.extended {
            let _ = write!(out, " sk:{}", socket.id);
        }
        let _ = writeln!(out);

        if options.info {
            let _ = write!(out, "\t {}", socket.variant.algorithm);
            if socket.ecn {
                let _ = write!(out, " ecn");
            }
            let _ = write!(out, " rto:{}", socket.rto.as_micros() / 1000);
            if let Some(srtt) = socket.srtt {
                let _ = write!(
                    out,
                    " rtt:{:.3}/{:.3}",
                    srtt.as_micros() as f64 / 1000.0,
                    socket.rttvar.as_micros() as f64 / 1000.0
                );
            }
            let _ = write!(out, " mss:{} cwnd:{}", socket.mss, socket.cwnd);
            if let Some(ssthresh) = socket.ssthresh {
                let _ = write!(out, " ssthresh:{ssthresh}");
            }
            let _ = writeln!(
                out,
                " bytes_acked:{} bytes_received:{} segs_out:{} retrans:{}",
                socket.bytes_acked, socket.bytes_received, socket.segments_out, socket.retransmits
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_until_boot() {
        let mut kernel = KernelStack::new();
        kernel
            .sysctl_set(".net.ipv4.tcp_congestion_control", "reno")
            .unwrap();
        assert_eq!(kernel.congestion_control(), "cubic");

        kernel.boot().unwrap();
        assert_eq!(kernel.congestion_control(), "reno");
        assert_eq!(kernel.congestion_algorithm(), CongestionAlgorithm::NewReno);
    }

    #[test]
    fn unsupported_congestion_control_fails_boot() {
        let mut kernel = KernelStack::new();
        kernel
            .sysctl_set(".net.ipv4.tcp_congestion_control", "ledbat")
            .unwrap();
        assert_eq!(
            kernel.boot(),
            Err(KernelError::UnsupportedCongestionControl("ledbat".to_owned()))
        );
        assert!(!kernel.is_booted());
    }

    #[test]
    fn validated_after_boot() {
        let mut kernel = KernelStack::new();
        kernel.boot().unwrap();
        assert!(kernel.sysctl_set("net/ipv4/tcp_ecn", "1").is_ok());
        assert!(kernel.ecn());
        assert!(kernel.sysctl_set("net.ipv4.tcp_ecn", "7").is_err());
        assert!(matches!(
            kernel.sysctl_set(SYSCTL_AVAILABLE_CONGESTION_CONTROL, "reno"),
            Err(KernelError::ReadOnlySysctl(_))
        ));
    }

    #[test]
    fn forwarding() {
        let mut kernel = KernelStack::new();
        assert!(!kernel.forwarding());
        kernel
            .sysctl_set(".net.ipv4.conf.default.forwarding", "1")
            .unwrap();
        kernel.boot().unwrap();
        assert!(kernel.forwarding());
    }

    #[test]
    fn ip_route_parse() {
        assert_eq!(
            IpCommand::parse("route add 10.0.5.0/24 via 10.0.0.2 dev sim1").unwrap(),
            IpCommand::RouteAdd {
                destination: Ipv4Addr::new(10, 0, 5, 0),
                prefix_len: 24,
                gateway: Ipv4Addr::new(10, 0, 0, 2),
                device: "sim1".to_owned()
            }
        );
        assert_eq!(IpCommand::parse("route").unwrap(), IpCommand::RouteShow);
    }

    #[test]
    fn ip_route_rejects_malformed_addresses() {
        assert!(matches!(
            IpCommand::parse("route add default via 10.0.0.256 dev sim0"),
            Err(KernelError::MalformedAddress(_))
        ));
        assert!(matches!(
            IpCommand::parse("route add 10.0.0.0/33 via 10.0.0.2 dev sim0"),
            Err(KernelError::MalformedAddress(_))
        ));
        assert!(matches!(
            IpCommand::parse("route add default 10.0.0.2"),
            Err(KernelError::MalformedCommand(_))
        ));
    }

    #[test]
    fn ss_options() {
        let options = SsOptions::parse("-a -e -i").unwrap();
        assert!(options.all && options.extended && options.info);
        assert!(SsOptions::parse("-x").is_err());
        assert!(SsOptions::parse("foo").is_err());
    }
}
