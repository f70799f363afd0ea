mod id;

pub use self::id::LinkId;
use crate::{data_rate::DataRate, interface::InterfaceId, time::SimTime};

/// A full duplex point-to-point link between two interfaces.
///
/// Each direction serializes packets at the link's [`DataRate`]
/// independently, then the packet travels for the propagation `delay`.
#[derive(Debug, Clone)]
pub struct Link {
    id: LinkId,
    data_rate: DataRate,
    delay: SimTime,
    ends: [InterfaceId; 2],
}

impl Link {
    pub(crate) fn new(
        id: LinkId,
        data_rate: DataRate,
        delay: SimTime,
        ends: [InterfaceId; 2],
    ) -> Self {
        Self {
            id,
            data_rate,
            delay,
            ends,
        }
    }

    #[inline]
    pub fn id(&self) -> LinkId {
        self.id
    }

    #[inline]
    pub fn data_rate(&self) -> DataRate {
        self.data_rate
    }

    /// One way propagation delay.
    #[inline]
    pub fn delay(&self) -> SimTime {
        self.delay
    }

    /// The two interfaces, in the order the link was installed.
    #[inline]
    pub fn ends(&self) -> [InterfaceId; 2] {
        self.ends
    }

    /// The interface at the other end of `interface`.
    pub fn peer(&self, interface: InterfaceId) -> Option<InterfaceId> {
        match self.ends {
            [a, b] if a == interface => Some(b),
            [a, b] if b == interface => Some(a),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer() {
        let a = InterfaceId::new(0);
        let b = InterfaceId::new(1);
        let link = Link::new(
            LinkId::new(0),
            DataRate::from_mbps(10),
            SimTime::from_millis(45),
            [a, b],
        );
        assert_eq!(link.peer(a), Some(b));
        assert_eq!(link.peer(b), Some(a));
        assert_eq!(link.peer(InterfaceId::new(2)), None);
    }
}
