//! TCP over the simulated network.
//!
//! Every congestion control is approximated by one loss based AIMD window:
//! slow start, additive increase, and a multiplicative decrease whose factor
//! comes from the [`CongestionAlgorithm`]. Westwood keeps its bandwidth
//! estimate and uses it to set the slow start threshold after a loss.
//! Loss is detected with three duplicate acknowledgements (NewReno fast
//! recovery) or with the retransmission timeout (go back N).

mod estimator;
mod socket;

pub(crate) use self::socket::{Output, SocketConfig, TcpSocket};
use crate::{node::NodeId, time::SimTime};
use std::{fmt, net::SocketAddrV4};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SocketError {
    #[error("Socket {0} does not exist")]
    NotFound(SocketId),
    #[error("Listener {0} does not exist")]
    ListenerNotFound(ListenerId),
    #[error("Port {port} is already listening on node {node}")]
    PortInUse { node: NodeId, port: u16 },
    #[error("Address {0} is already connected")]
    AlreadyConnected(SocketAddrV4),
    #[error("Node {0} has no address to connect from")]
    NoLocalAddress(NodeId),
    #[error("No ephemeral port left on node {0}")]
    NoEphemeralPort(NodeId),
}

/// # Socket Identifier
///
/// Unique for the lifetime of the [`Network`] it was opened on.
///
/// [`Network`]: crate::network::Network
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketId(u32);

impl SocketId {
    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// Identifier of a listening socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u32);

impl ListenerId {
    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// The congestion control algorithms a stack can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CongestionAlgorithm {
    NewReno,
    Cubic,
    Bic,
    HighSpeed,
    Htcp,
    Hybla,
    Illinois,
    Ledbat,
    Lp,
    Scalable,
    Vegas,
    Veno,
    Westwood,
    Yeah,
}

impl CongestionAlgorithm {
    pub const ALL: [Self; 14] = [
        Self::NewReno,
        Self::Cubic,
        Self::Bic,
        Self::HighSpeed,
        Self::Htcp,
        Self::Hybla,
        Self::Illinois,
        Self::Ledbat,
        Self::Lp,
        Self::Scalable,
        Self::Vegas,
        Self::Veno,
        Self::Westwood,
        Self::Yeah,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::NewReno => "newreno",
            Self::Cubic => "cubic",
            Self::Bic => "bic",
            Self::HighSpeed => "highspeed",
            Self::Htcp => "htcp",
            Self::Hybla => "hybla",
            Self::Illinois => "illinois",
            Self::Ledbat => "ledbat",
            Self::Lp => "lp",
            Self::Scalable => "scalable",
            Self::Vegas => "vegas",
            Self::Veno => "veno",
            Self::Westwood => "westwood",
            Self::Yeah => "yeah",
        }
    }

    /// Algorithm behind a kernel `tcp_congestion_control` value.
    ///
    /// ```
    /// # use ccsim_core::tcp::CongestionAlgorithm;
    /// assert_eq!(CongestionAlgorithm::from_kernel_name("reno"), Some(CongestionAlgorithm::NewReno));
    /// assert_eq!(CongestionAlgorithm::from_kernel_name("ledbat"), None);
    /// ```
    pub fn from_kernel_name(name: &str) -> Option<Self> {
        match name {
            "reno" => Some(Self::NewReno),
            "cubic" => Some(Self::Cubic),
            "bic" => Some(Self::Bic),
            "highspeed" => Some(Self::HighSpeed),
            "htcp" => Some(Self::Htcp),
            "hybla" => Some(Self::Hybla),
            "illinois" => Some(Self::Illinois),
            "lp" => Some(Self::Lp),
            "scalable" => Some(Self::Scalable),
            "vegas" => Some(Self::Vegas),
            "veno" => Some(Self::Veno),
            "westwood" => Some(Self::Westwood),
            "yeah" => Some(Self::Yeah),
            _ => None,
        }
    }

    /// Multiplicative decrease factor, in thousandths.
    pub(crate) fn beta_permille(self) -> u64 {
        match self {
            Self::Cubic => 700,
            Self::Bic => 800,
            Self::Scalable => 875,
            Self::NewReno
            | Self::HighSpeed
            | Self::Htcp
            | Self::Hybla
            | Self::Illinois
            | Self::Ledbat
            | Self::Lp
            | Self::Vegas
            | Self::Veno
            | Self::Westwood
            | Self::Yeah => 500,
        }
    }
}

impl fmt::Display for CongestionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a [`TcpVariant`] samples the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperatingMode {
    #[default]
    Standard,
    /// Westwood bandwidth estimate sampled once per round trip.
    WestwoodPlus,
}

/// The congestion control a simulated stack hands to its sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcpVariant {
    pub algorithm: CongestionAlgorithm,
    pub mode: OperatingMode,
}

impl TcpVariant {
    pub const fn new(algorithm: CongestionAlgorithm) -> Self {
        Self {
            algorithm,
            mode: OperatingMode::Standard,
        }
    }

    pub const fn with_mode(mut self, mode: OperatingMode) -> Self {
        self.mode = mode;
        self
    }
}

impl Default for TcpVariant {
    fn default() -> Self {
        Self::new(CongestionAlgorithm::NewReno)
    }
}

impl fmt::Display for TcpVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            OperatingMode::Standard => write!(f, "{}", self.algorithm),
            OperatingMode::WestwoodPlus => write!(f, "{}+", self.algorithm),
        }
    }
}

/// State of a TCP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    SynSent,
    Established,
    Closed,
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SynSent => f.write_str("SYN-SENT"),
            Self::Established => f.write_str("ESTAB"),
            Self::Closed => f.write_str("CLOSED"),
        }
    }
}

/// Snapshot of a socket's internals, as reported by `ss -i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpInfo {
    pub id: SocketId,
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
    pub state: TcpState,
    pub variant: TcpVariant,
    pub ecn: bool,
    pub mss: u32,
    /// congestion window, in segments
    pub cwnd: u64,
    /// slow start threshold in segments, `None` while unbounded
    pub ssthresh: Option<u64>,
    pub srtt: Option<SimTime>,
    pub rttvar: SimTime,
    pub rto: SimTime,
    pub bytes_acked: u64,
    pub bytes_received: u64,
    pub segments_out: u64,
    pub retransmits: u64,
}
