//! The applications: one bulk sender and the sink it sends to.
//!
//! Both are described up front and [`install`]ed on the scheduler: the
//! sockets only exist between their start and stop times.
//!
//! [`install`]: BulkSender::install

use crate::error::ConfigError;
use ccsim_core::{
    SimTime,
    clock::Scheduler,
    network::Network,
    node::NodeId,
    stack::SocketFactory,
    tcp::{ListenerId, SocketId, TcpInfo},
};
use std::{cell::Cell, net::SocketAddrV4, rc::Rc};
use tracing::info;

fn check_window(start: SimTime, stop: SimTime) -> Result<(), ConfigError> {
    if stop < start {
        return Err(ConfigError::StopBeforeStart { start, stop });
    }
    Ok(())
}

/// Sends as fast as the congestion window allows, from `start` until
/// `stop`.
#[derive(Debug, Clone, Copy)]
pub struct BulkSender {
    pub node: NodeId,
    pub factory: SocketFactory,
    pub remote: SocketAddrV4,
    pub start: SimTime,
    pub stop: SimTime,
    /// Record the congestion window of the connection.
    pub trace_cwnd: bool,
}

/// The connection of an installed [`BulkSender`], once it is opened.
#[derive(Debug, Clone, Default)]
pub struct SenderHandle {
    socket: Rc<Cell<Option<SocketId>>>,
}

impl SenderHandle {
    pub fn socket(&self) -> Option<SocketId> {
        self.socket.get()
    }

    pub fn info(&self, network: &Network) -> Option<TcpInfo> {
        network.socket_info(self.socket()?).ok()
    }
}

impl BulkSender {
    pub fn install(self, scheduler: &mut Scheduler<Network>) -> Result<SenderHandle, ConfigError> {
        check_window(self.start, self.stop)?;
        let handle = SenderHandle::default();

        let socket = Rc::clone(&handle.socket);
        scheduler.schedule(self.start, "bulk-send-start", move |scheduler, network| {
            let id = network.tcp_connect(scheduler, self.node, self.factory, self.remote)?;
            if self.trace_cwnd {
                network.enable_cwnd_trace(id, scheduler.now())?;
            }
            socket.set(Some(id));
            info!(socket = %id, remote = %self.remote, "bulk sender started");
            Ok(())
        });

        let socket = Rc::clone(&handle.socket);
        scheduler.schedule(self.stop, "bulk-send-stop", move |_, network| {
            if let Some(id) = socket.get() {
                network.tcp_close(id)?;
                info!(socket = %id, "bulk sender stopped");
            }
            Ok(())
        });

        Ok(handle)
    }
}

/// Accepts connections on `port` and counts what it receives.
#[derive(Debug, Clone, Copy)]
pub struct PacketSink {
    pub node: NodeId,
    pub factory: SocketFactory,
    pub port: u16,
    pub start: SimTime,
    pub stop: SimTime,
}

#[derive(Debug, Clone, Default)]
pub struct SinkHandle {
    listener: Rc<Cell<Option<ListenerId>>>,
}

impl SinkHandle {
    pub fn listener(&self) -> Option<ListenerId> {
        self.listener.get()
    }

    /// Bytes received in order by every accepted connection.
    pub fn bytes_received(&self, network: &Network) -> u64 {
        self.listener()
            .and_then(|listener| network.listener_bytes_received(listener).ok())
            .unwrap_or_default()
    }
}

impl PacketSink {
    pub fn install(self, scheduler: &mut Scheduler<Network>) -> Result<SinkHandle, ConfigError> {
        check_window(self.start, self.stop)?;
        let handle = SinkHandle::default();

        let listener = Rc::clone(&handle.listener);
        scheduler.schedule(self.start, "sink-start", move |_, network| {
            let id = network.tcp_listen(self.node, self.factory, self.port)?;
            listener.set(Some(id));
            info!(%id, node = %self.node, port = self.port, "sink listening");
            Ok(())
        });

        let listener = Rc::clone(&handle.listener);
        scheduler.schedule(self.stop, "sink-stop", move |_, network| {
            if let Some(id) = listener.get() {
                network.close_listener(id)?;
            }
            Ok(())
        });

        Ok(handle)
    }
}
