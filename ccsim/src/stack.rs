//! Stack selection: which network stack each node of the [`Topology`] runs.
//!
//! The leaves (sender and receiver) run the stack of the [`StackMode`].
//! The router is not a measurement endpoint: it always runs the simulated
//! stack, which forwards.

use crate::topology::{Attachment, Topology};
use ccsim_core::{
    SimError, SimTime,
    clock::Scheduler,
    network::Network,
    node::NodeId,
    stack::{
        InternetStack, KernelStack, Route, SYSCTL_DEFAULT_FORWARDING, SocketFactory, Stack,
        StackMode,
    },
};
use tracing::{debug, info};

/// What [`select_stacks`] installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackLayout {
    pub mode: StackMode,
    /// Routes and sysctls are in place from this time on.
    pub ready_at: SimTime,
    /// Factory of the sockets the leaves open.
    pub factory: SocketFactory,
}

/// Install the stacks and the leaves' default routes.
///
/// In [`StackMode::Kernel`] the leaves boot at `0` and get their default
/// route from `ip route` at [`StackMode::configuration_deadline`]; both
/// are registered on `scheduler`.
pub fn select_stacks(
    network: &mut Network,
    scheduler: &mut Scheduler<Network>,
    topology: &Topology,
    mode: StackMode,
) -> Result<StackLayout, SimError> {
    network.install_stack(topology.router, Stack::Simulated(InternetStack::new()))?;

    let leaves = [
        (topology.sender, topology.sender_if, topology.router_access_if),
        (topology.receiver, topology.receiver_if, topology.router_bottleneck_if),
    ];
    let ready_at = mode.configuration_deadline();

    match mode {
        StackMode::Simulated => {
            for (node, leaf, gateway) in leaves {
                network.install_stack(node, Stack::Simulated(InternetStack::new()))?;
                network.add_route(node, Route::default_via(gateway.address, leaf.interface))?;
            }
        }
        StackMode::Kernel => {
            for (node, leaf, gateway) in leaves {
                network.install_stack(node, Stack::Kernel(KernelStack::new()))?;
                network.sysctl_set(node, SYSCTL_DEFAULT_FORWARDING, "1")?;
                schedule_kernel_boot(scheduler, node);
                schedule_default_route(network, scheduler, node, leaf, gateway, ready_at)?;
            }
        }
    }

    info!(%mode, ready_at = %ready_at, "stacks installed");
    Ok(StackLayout {
        mode,
        ready_at,
        factory: mode.socket_factory(),
    })
}

fn schedule_kernel_boot(scheduler: &mut Scheduler<Network>, node: NodeId) {
    scheduler.schedule(SimTime::ZERO, "kernel-boot", move |_, network| {
        network.boot_kernel(node)
    });
}

fn schedule_default_route(
    network: &Network,
    scheduler: &mut Scheduler<Network>,
    node: NodeId,
    leaf: Attachment,
    gateway: Attachment,
    at: SimTime,
) -> Result<(), SimError> {
    let device = network.interface(leaf.interface)?.name().to_owned();
    let args = format!("route add default via {} dev {device}", gateway.address);
    scheduler.schedule(at, "ip-route", move |_, network| {
        let process = network.launch(node, "ip", &args)?;
        debug!(%node, pid = process.pid, %args, "default route installed");
        Ok(())
    });
    Ok(())
}
