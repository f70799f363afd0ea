mod id;

pub use self::id::NodeId;
use crate::{
    interface::InterfaceId,
    stack::{Stack, StackError},
};

/// A host or a router of the simulated [`Network`].
///
/// A node is created bare: it gains interfaces when links are installed
/// and a network stack when one is installed on it. You never construct a
/// `Node` directly, use [`Network::new_node`].
///
/// [`Network`]: crate::network::Network
/// [`Network::new_node`]: crate::network::Network::new_node
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    name: String,
    stack: Option<Stack>,
    interfaces: Vec<InterfaceId>,
}

impl Node {
    pub(crate) fn new(id: NodeId, name: String) -> Self {
        Self {
            id,
            name,
            stack: None,
            interfaces: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn stack(&self) -> Option<&Stack> {
        self.stack.as_ref()
    }

    #[inline]
    pub(crate) fn stack_mut(&mut self) -> Option<&mut Stack> {
        self.stack.as_mut()
    }

    /// Install the network stack. The stack of a node never changes once
    /// installed.
    pub(crate) fn install_stack(&mut self, stack: Stack) -> Result<(), StackError> {
        if self.stack.is_some() {
            return Err(StackError::AlreadyInstalled(self.id));
        }
        self.stack = Some(stack);
        Ok(())
    }

    /// Interfaces in creation order: `interfaces()[n]` is named `sim<n>`.
    #[inline]
    pub fn interfaces(&self) -> &[InterfaceId] {
        &self.interfaces
    }

    pub(crate) fn add_interface(&mut self, interface: InterfaceId) -> usize {
        self.interfaces.push(interface);
        self.interfaces.len() - 1
    }
}
